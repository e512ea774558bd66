use std::fmt;
use std::fs::File;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use symphonia::core::io::MediaSource;

/// Addressable byte stream for one track.
///
/// Implementations are supplied by whatever resolves track identity (local
/// files, HTTP range readers, in-memory buffers). The engine only opens and
/// reads them; it never resolves a track to a location itself.
pub trait TrackSource: Send + Sync + fmt::Debug {
    /// Human readable name used in logs and error messages.
    fn describe(&self) -> String;

    /// Opens a fresh seekable stream positioned at byte 0.
    fn open(&self) -> io::Result<Box<dyn MediaSource>>;

    /// Container hint (e.g. "mp3") for the format probe.
    fn extension_hint(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileSource {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TrackSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> io::Result<Box<dyn MediaSource>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(file))
    }

    fn extension_hint(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

/// Already-fetched encoded bytes.
#[derive(Clone)]
pub struct MemorySource {
    name: String,
    bytes: Arc<[u8]>,
    extension: Option<String>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        MemorySource {
            name: name.into(),
            bytes: bytes.into(),
            extension: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySource")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .field("extension", &self.extension)
            .finish()
    }
}

impl TrackSource for MemorySource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn open(&self) -> io::Result<Box<dyn MediaSource>> {
        Ok(Box::new(Cursor::new(self.bytes.clone())))
    }

    fn extension_hint(&self) -> Option<String> {
        self.extension.clone()
    }
}

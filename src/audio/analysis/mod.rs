mod filters;
pub mod waveform;

pub use waveform::{WaveformAnalyzer, target_sample_count};

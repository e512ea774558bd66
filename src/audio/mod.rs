pub mod analysis;
pub mod cache;
pub mod config;
pub(crate) mod decoding;
pub mod devices;
pub mod effects;
pub mod errors;
pub mod graph;
pub mod playback;
pub mod source;
pub mod types;

use serde::Deserialize;

use super::errors::ConfigError;

// --- Waveform Analysis Constants ---
/// Output rate of a waveform series, independent of the track's native rate.
pub const WAVEFORM_SAMPLES_PER_SECOND: f64 = 100.0;
pub const WAVEFORM_LOW_CUTOFF_HZ: f32 = 250.0;
pub const WAVEFORM_HIGH_CUTOFF_HZ: f32 = 4000.0;

// Fixed band gains. Changing these changes the rendered waveform.
pub const WAVEFORM_TOTAL_GAIN: f32 = 3.0;
pub const WAVEFORM_LOW_GAIN: f32 = 4.0;
pub const WAVEFORM_MID_GAIN: f32 = 4.0;
pub const WAVEFORM_HIGH_GAIN: f32 = 6.0;

// Cooperative yield cadence for long buffers
pub const ANALYSIS_FILTER_YIELD_INTERVAL: usize = 50_000;
pub const ANALYSIS_CHUNK_YIELD_INTERVAL: usize = 500;

// --- Waveform Cache Constants ---
pub const WAVEFORM_CACHE_CAPACITY: usize = 20;

// --- Track Source Constants ---
/// Streams smaller than this are failed or blocked fetches, not audio.
pub const MIN_ENCODED_TRACK_BYTES: u64 = 1000;
pub const DEFAULT_MONO_SAMPLE_CAPACITY: usize = 1024 * 256;
pub const RESAMPLER_CHUNK_FRAMES: usize = 1024;

// --- Tone Stage Constants ---
pub const TONE_SHELF_HZ: f32 = 250.0;
// Q factor for shelf filters
pub const SHELF_Q_FACTOR: f32 = 0.5;
pub const TONE_CUT_DB: f32 = -40.0;

// --- Tempo Constants ---
pub const MIN_TEMPO_RATIO: f64 = 0.5;
pub const MAX_TEMPO_RATIO: f64 = 2.0;

// --- Engine Thread Constants ---
// Interval for position ticks and event draining, in milliseconds.
pub const ENGINE_TICK_INTERVAL_MS: u64 = 20;
pub const ENGINE_COMMAND_CHAN_SIZE: usize = 32;
pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 44100;
/// Largest block the mix bus renders per pass.
pub const RENDER_BLOCK_FRAMES: usize = 1024;

/// Runtime-tunable engine settings.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub waveform_cache_capacity: usize,
    pub output_sample_rate: u32,
    pub tick_interval_ms: u64,
    pub tone_cut_db: f32,
    pub min_tempo_ratio: f64,
    pub max_tempo_ratio: f64,
    pub open_output_device: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            waveform_cache_capacity: WAVEFORM_CACHE_CAPACITY,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            tick_interval_ms: ENGINE_TICK_INTERVAL_MS,
            tone_cut_db: TONE_CUT_DB,
            min_tempo_ratio: MIN_TEMPO_RATIO,
            max_tempo_ratio: MAX_TEMPO_RATIO,
            open_output_device: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.waveform_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "waveformCacheCapacity must be at least 1".to_string(),
            ));
        }
        if self.output_sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "outputSampleRate must be positive".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tickIntervalMs must be positive".to_string(),
            ));
        }
        if !(self.min_tempo_ratio > 0.0
            && self.min_tempo_ratio <= 1.0
            && self.max_tempo_ratio >= 1.0)
        {
            return Err(ConfigError::Invalid(format!(
                "tempo range {}..{} must contain 1.0 and stay positive",
                self.min_tempo_ratio, self.max_tempo_ratio
            )));
        }
        Ok(())
    }

    pub(crate) fn clamp_tempo(&self, ratio: f64) -> f64 {
        ratio.clamp(self.min_tempo_ratio, self.max_tempo_ratio)
    }
}

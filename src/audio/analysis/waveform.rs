use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;

use super::filters::{BandSplitter, Bands};
use crate::audio::config;
use crate::audio::decoding::decode_source_to_mono_samples;
use crate::audio::source::TrackSource;
use crate::audio::types::{WaveformSample, WaveformSeries};

/// Number of summary samples for a track of `duration_seconds`.
pub fn target_sample_count(duration_seconds: f64) -> usize {
    (duration_seconds * config::WAVEFORM_SAMPLES_PER_SECOND).ceil() as usize
}

/// Bounds of chunk `index` when `len` samples are split into `count`
/// contiguous chunks. Widths differ by at most one sample.
fn chunk_bounds(index: usize, count: usize, len: usize) -> Range<usize> {
    let start = (index as u64 * len as u64 / count as u64) as usize;
    let end = ((index as u64 + 1) * len as u64 / count as u64) as usize;
    start..end
}

fn rms(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (*v as f64) * (*v as f64)).sum();
    (sum_sq / values.len() as f64).sqrt() as f32
}

#[inline]
fn normalize(rms: f32, gain: f32) -> f32 {
    let scaled = rms * gain;
    if scaled.is_finite() {
        scaled.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn summarize_chunk(raw: &[f32], bands: &Bands, range: Range<usize>) -> WaveformSample {
    WaveformSample {
        low: normalize(rms(&bands.low[range.clone()]), config::WAVEFORM_LOW_GAIN),
        mid: normalize(rms(&bands.mid[range.clone()]), config::WAVEFORM_MID_GAIN),
        high: normalize(rms(&bands.high[range.clone()]), config::WAVEFORM_HIGH_GAIN),
        total: normalize(rms(&raw[range]), config::WAVEFORM_TOTAL_GAIN),
    }
}

/// Produces the fixed-rate, three-band loudness summary of a mono buffer.
///
/// Every failure mode (empty buffer, nonsensical rate or duration, decode
/// failure upstream) yields an empty series. Callers treat that as "no
/// visualization" and never as a playback error.
#[derive(Debug, Clone)]
pub struct WaveformAnalyzer {
    filter_yield_interval: usize,
    chunk_yield_interval: usize,
}

impl Default for WaveformAnalyzer {
    fn default() -> Self {
        WaveformAnalyzer {
            filter_yield_interval: config::ANALYSIS_FILTER_YIELD_INTERVAL,
            chunk_yield_interval: config::ANALYSIS_CHUNK_YIELD_INTERVAL,
        }
    }
}

impl WaveformAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    fn chunk_count(samples: &[f32], sample_rate: f32, duration_seconds: f64) -> Option<usize> {
        if samples.is_empty() {
            log::warn!("Waveform Analysis: Empty sample buffer. Returning empty series.");
            return None;
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            log::warn!("Waveform Analysis: Invalid sample rate {}. Returning empty series.", sample_rate);
            return None;
        }
        if !(duration_seconds.is_finite() && duration_seconds > 0.0) {
            log::warn!(
                "Waveform Analysis: Invalid duration {}. Returning empty series.",
                duration_seconds
            );
            return None;
        }
        // Each summary point needs at least one sample behind it.
        let wanted = (duration_seconds * config::WAVEFORM_SAMPLES_PER_SECOND).ceil();
        if wanted > samples.len() as f64 {
            log::warn!(
                "Waveform Analysis: Duration {}s does not fit {} samples. Returning empty series.",
                duration_seconds,
                samples.len()
            );
            return None;
        }
        Some(target_sample_count(duration_seconds))
    }

    /// Blocking analysis. Chunk RMS runs on the rayon pool.
    pub fn analyze(&self, samples: &[f32], sample_rate: f32, duration_seconds: f64) -> WaveformSeries {
        let Some(count) = Self::chunk_count(samples, sample_rate, duration_seconds) else {
            return WaveformSeries::empty();
        };

        let mut bands = Bands::with_capacity(samples.len());
        BandSplitter::new(sample_rate).process_into(samples, &mut bands);

        let len = samples.len();
        let summary: Vec<WaveformSample> = (0..count)
            .into_par_iter()
            .map(|i| summarize_chunk(samples, &bands, chunk_bounds(i, count, len)))
            .collect();

        log::debug!(
            "Waveform Analysis: {} samples @ {} Hz -> {} points",
            len,
            sample_rate,
            summary.len()
        );
        WaveformSeries::new(summary)
    }

    /// Same result as [`analyze`](Self::analyze), yielding to the runtime
    /// between filter blocks and between chunk batches.
    pub async fn analyze_cooperative(
        &self,
        samples: &[f32],
        sample_rate: f32,
        duration_seconds: f64,
    ) -> WaveformSeries {
        let Some(count) = Self::chunk_count(samples, sample_rate, duration_seconds) else {
            return WaveformSeries::empty();
        };

        let mut bands = Bands::with_capacity(samples.len());
        let mut splitter = BandSplitter::new(sample_rate);
        for block in samples.chunks(self.filter_yield_interval.max(1)) {
            splitter.process_into(block, &mut bands);
            tokio::task::yield_now().await;
        }

        let len = samples.len();
        let batch = self.chunk_yield_interval.max(1);
        let mut summary: Vec<WaveformSample> = Vec::with_capacity(count);
        let mut batch_start = 0;
        while batch_start < count {
            let batch_end = (batch_start + batch).min(count);
            summary.par_extend(
                (batch_start..batch_end)
                    .into_par_iter()
                    .map(|i| summarize_chunk(samples, &bands, chunk_bounds(i, count, len))),
            );
            batch_start = batch_end;
            tokio::task::yield_now().await;
        }

        log::debug!(
            "Waveform Analysis: {} samples @ {} Hz -> {} points (cooperative)",
            len,
            sample_rate,
            summary.len()
        );
        WaveformSeries::new(summary)
    }

    /// Decode a track source off the runtime thread, then analyze it.
    pub async fn analyze_track_source(&self, source: Arc<dyn TrackSource>) -> WaveformSeries {
        let source_name = source.describe();
        let decoded =
            tokio::task::spawn_blocking(move || decode_source_to_mono_samples(source.as_ref())).await;

        match decoded {
            Ok(Ok((samples, sample_rate))) => {
                let duration_seconds = samples.len() as f64 / sample_rate as f64;
                self.analyze_cooperative(&samples, sample_rate, duration_seconds)
                    .await
            }
            Ok(Err(e)) => {
                log::warn!(
                    "Waveform Analysis: Decode failed for '{}': {}. No waveform.",
                    source_name,
                    e
                );
                WaveformSeries::empty()
            }
            Err(join_error) => {
                log::error!(
                    "Waveform Analysis: Decode task for '{}' failed: {}",
                    source_name,
                    join_error
                );
                WaveformSeries::empty()
            }
        }
    }
}

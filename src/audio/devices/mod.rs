use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig, SupportedStreamConfigRange};

use crate::audio::errors::PlaybackError;
use crate::audio::graph::{MixBus, RenderScratch};

const PREFERRED_CHANNELS: u16 = 2;

/// Picks an f32 output config that can run at `sample_rate`, preferring
/// stereo.
fn choose_output_config(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Option<StreamConfig> {
    let mut best: Option<SupportedStreamConfigRange> = None;
    for range in ranges {
        if range.sample_format() != cpal::SampleFormat::F32 {
            continue;
        }
        if range.min_sample_rate().0 > sample_rate || range.max_sample_rate().0 < sample_rate {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => {
                current.channels() != PREFERRED_CHANNELS && range.channels() == PREFERRED_CHANNELS
            }
        };
        if better {
            best = Some(range);
        }
    }
    best.map(|range| range.with_sample_rate(SampleRate(sample_rate)).config())
}

/// Opens the default output device and starts a stream that pulls from
/// `bus`. The stream stops when dropped and must stay on the thread that
/// created it.
pub fn open_output_stream(bus: MixBus) -> Result<cpal::Stream, PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(PlaybackError::NoDefaultOutputDevice)?;
    let device_name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());

    let sample_rate = bus.sample_rate();
    let ranges = device
        .supported_output_configs()
        .map_err(|e| PlaybackError::OutputStreamInitError(e.to_string()))?;
    let config = choose_output_config(ranges, sample_rate).ok_or_else(|| {
        PlaybackError::UnsupportedSampleFormat(format!(
            "'{}' has no f32 output at {} Hz",
            device_name, sample_rate
        ))
    })?;
    let channels = config.channels as usize;

    let mut scratch = RenderScratch::new();
    let data_callback = move |output: &mut [f32], _: &cpal::OutputCallbackInfo| {
        bus.render(output, channels, &mut scratch);
    };
    let error_callback = |err: cpal::StreamError| {
        log::error!("Output Stream: {}", err);
    };

    let stream = device
        .build_output_stream(&config, data_callback, error_callback, None)
        .map_err(|e| PlaybackError::OutputStreamError(e.to_string()))?;
    stream
        .play()
        .map_err(|e| PlaybackError::OutputStreamError(e.to_string()))?;

    log::info!(
        "Output Stream: Playing on '{}' ({} Hz, {} channels)",
        device_name,
        sample_rate,
        channels
    );
    Ok(stream)
}

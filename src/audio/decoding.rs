use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CODEC_TYPE_NULL, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use super::config::{DEFAULT_MONO_SAMPLE_CAPACITY, MIN_ENCODED_TRACK_BYTES, RESAMPLER_CHUNK_FRAMES};
use super::errors::AudioDecodingError;
use super::source::TrackSource;

/// Decodes a track source to mono f32 samples at the track's native rate.
pub(crate) fn decode_source_to_mono_samples(
    source: &dyn TrackSource,
) -> Result<(Vec<f32>, f32), AudioDecodingError> {
    let source_name = source.describe();
    let media = source
        .open()
        .map_err(|e| AudioDecodingError::SourceOpenError { source_name: source_name.clone(), source: e })?;

    if let Some(len) = media.byte_len() {
        if len < MIN_ENCODED_TRACK_BYTES {
            return Err(AudioDecodingError::SourceTooSmall { source_name, len });
        }
    }

    let mss = MediaSourceStream::new(media, Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = source.extension_hint() {
        hint.with_extension(&ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioDecodingError::FormatError { source_name: source_name.clone(), source: e })?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| AudioDecodingError::NoSuitableTrack { source_name: source_name.clone() })?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioDecodingError::MissingSampleRate { source_name: source_name.clone() })? as f32;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| AudioDecodingError::MissingChannelInfo { source_name: source_name.clone() })?
        .count();
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| AudioDecodingError::DecoderCreationError { source_name: source_name.clone(), source: e })?;

    let mut samples: Vec<f32> = Vec::with_capacity(DEFAULT_MONO_SAMPLE_CAPACITY);
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        match format.next_packet() {
            Ok(packet) => {
                if packet.track_id() != track_id {
                    continue;
                }
                match decoder.decode(&packet) {
                    Ok(audio_buf) => {
                        if sample_buf.is_none() {
                            sample_buf = Some(SampleBuffer::<f32>::new(
                                audio_buf.capacity() as u64,
                                *audio_buf.spec(),
                            ));
                        }
                        if let Some(buf) = sample_buf.as_mut() {
                            buf.copy_interleaved_ref(audio_buf);
                            let raw_samples = buf.samples();
                            if channels > 1 {
                                samples.extend(
                                    raw_samples
                                        .chunks_exact(channels)
                                        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32),
                                );
                            } else {
                                samples.extend_from_slice(raw_samples);
                            }
                        }
                    }
                    Err(SymphoniaError::DecodeError(err_desc)) => {
                        log::warn!("Decode: Ignoring decode error in '{}': {}", source_name, err_desc);
                    }
                    Err(e) => {
                        return Err(AudioDecodingError::FatalDecodeError { source_name, source: e });
                    }
                }
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                log::debug!("Decode: Reached EOF for '{}'", source_name);
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                log::warn!("Decode: Decoder reset required unexpectedly for '{}'", source_name);
                break;
            }
            Err(e) => {
                return Err(AudioDecodingError::PacketReadIoError { source_name, source: e });
            }
        }
    }

    decoder.finalize();
    log::debug!(
        "Decode: Decoded {} mono samples at {} Hz for '{}'",
        samples.len(),
        sample_rate,
        source_name
    );
    if samples.is_empty() {
        return Err(AudioDecodingError::NoSamplesDecoded { source_name });
    }

    Ok((samples, sample_rate))
}

/// Converts mono samples to the output bus rate. Returns the input untouched
/// when the rates already match.
pub(crate) fn resample_mono(
    samples: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, AudioDecodingError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }
    let resample_err = |reason: String| AudioDecodingError::ResampleError {
        from: from_rate,
        to: to_rate,
        reason,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLER_CHUNK_FRAMES, 1)
        .map_err(|e| resample_err(e.to_string()))?;

    let expected_len = (samples.len() as f64 * ratio).round() as usize;
    let mut output: Vec<f32> = Vec::with_capacity(expected_len + RESAMPLER_CHUNK_FRAMES);

    // One chunk of trailing silence flushes the filter delay.
    let mut padded = samples;
    padded.extend(std::iter::repeat_n(0.0f32, RESAMPLER_CHUNK_FRAMES));

    let mut chunks = padded.chunks_exact(RESAMPLER_CHUNK_FRAMES);
    for chunk in chunks.by_ref() {
        let wave_in: &[&[f32]] = &[chunk];
        let frames = resampler
            .process(wave_in, None)
            .map_err(|e| resample_err(e.to_string()))?;
        output.extend_from_slice(&frames[0]);
    }
    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let wave_in: &[&[f32]] = &[remainder];
        let frames = resampler
            .process_partial(Some(wave_in), None)
            .map_err(|e| resample_err(e.to_string()))?;
        output.extend_from_slice(&frames[0]);
    }

    output.resize(expected_len, 0.0);
    log::debug!(
        "Decode: Resampled {} Hz -> {} Hz ({} samples)",
        from_rate,
        to_rate,
        output.len()
    );
    Ok(output)
}

/// Decode, then bring the audio to the bus rate. Used by deck loads.
pub(crate) fn decode_for_playback(
    source: &dyn TrackSource,
    bus_sample_rate: u32,
) -> Result<Vec<f32>, AudioDecodingError> {
    let (samples, native_rate) = decode_source_to_mono_samples(source)?;
    resample_mono(samples, native_rate as u32, bus_sample_rate)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    /// Encodes a mono 16-bit WAV in memory.
    pub(crate) fn wav_bytes(samples: &[f32], sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in samples {
                writer
                    .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                    .unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    pub(crate) fn sine(freq: f32, sample_rate: u32, seconds: f32, amplitude: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }
}

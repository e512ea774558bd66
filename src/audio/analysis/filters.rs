use std::f32::consts::PI;

use crate::audio::config::{WAVEFORM_HIGH_CUTOFF_HZ, WAVEFORM_LOW_CUTOFF_HZ};

fn rc_and_dt(cutoff_hz: f32, sample_rate: f32) -> (f32, f32) {
    (1.0 / (2.0 * PI * cutoff_hz), 1.0 / sample_rate)
}

/// Single-pole low-pass. The first sample passes through unchanged.
#[derive(Debug, Clone)]
pub(crate) struct OnePoleLowPass {
    alpha: f32,
    prev_out: Option<f32>,
}

impl OnePoleLowPass {
    pub(crate) fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        let (rc, dt) = rc_and_dt(cutoff_hz, sample_rate);
        OnePoleLowPass {
            alpha: dt / (rc + dt),
            prev_out: None,
        }
    }

    #[inline]
    pub(crate) fn run(&mut self, x: f32) -> f32 {
        let y = match self.prev_out {
            Some(prev) => prev + self.alpha * (x - prev),
            None => x,
        };
        self.prev_out = Some(y);
        y
    }
}

/// Single-pole high-pass. The first sample passes through unchanged.
#[derive(Debug, Clone)]
pub(crate) struct OnePoleHighPass {
    alpha: f32,
    prev_in: Option<f32>,
    prev_out: f32,
}

impl OnePoleHighPass {
    pub(crate) fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        let (rc, dt) = rc_and_dt(cutoff_hz, sample_rate);
        OnePoleHighPass {
            alpha: rc / (rc + dt),
            prev_in: None,
            prev_out: 0.0,
        }
    }

    #[inline]
    pub(crate) fn run(&mut self, x: f32) -> f32 {
        let y = match self.prev_in {
            Some(prev_in) => self.alpha * (self.prev_out + x - prev_in),
            None => x,
        };
        self.prev_in = Some(x);
        self.prev_out = y;
        y
    }
}

/// Band-filtered copies of one buffer.
#[derive(Debug, Default)]
pub(crate) struct Bands {
    pub(crate) low: Vec<f32>,
    pub(crate) mid: Vec<f32>,
    pub(crate) high: Vec<f32>,
}

impl Bands {
    pub(crate) fn with_capacity(len: usize) -> Self {
        Bands {
            low: Vec::with_capacity(len),
            mid: Vec::with_capacity(len),
            high: Vec::with_capacity(len),
        }
    }
}

/// Splits a signal into low / mid / high bands. Filter state carries over
/// between calls so a buffer can be fed in blocks.
#[derive(Debug, Clone)]
pub(crate) struct BandSplitter {
    low: OnePoleLowPass,
    high: OnePoleHighPass,
    mid_high_pass: OnePoleHighPass,
    mid_low_pass: OnePoleLowPass,
}

impl BandSplitter {
    pub(crate) fn new(sample_rate: f32) -> Self {
        BandSplitter {
            low: OnePoleLowPass::new(WAVEFORM_LOW_CUTOFF_HZ, sample_rate),
            high: OnePoleHighPass::new(WAVEFORM_HIGH_CUTOFF_HZ, sample_rate),
            mid_high_pass: OnePoleHighPass::new(WAVEFORM_LOW_CUTOFF_HZ, sample_rate),
            mid_low_pass: OnePoleLowPass::new(WAVEFORM_HIGH_CUTOFF_HZ, sample_rate),
        }
    }

    pub(crate) fn process_into(&mut self, input: &[f32], bands: &mut Bands) {
        for &x in input {
            bands.low.push(self.low.run(x));
            bands.high.push(self.high.run(x));
            let hp = self.mid_high_pass.run(x);
            bands.mid.push(self.mid_low_pass.run(hp));
        }
    }
}

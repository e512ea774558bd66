//! Tempo-sync and quantization arithmetic. Pure functions over positions
//! and tempo metadata; nothing here touches the audio graph.

/// Tempo ratio that makes the follower's effective bpm match the master's.
/// Returns `None` when either bpm is unusable.
pub fn follower_tempo_ratio(master_bpm: f64, master_tempo_ratio: f64, follower_bpm: f64) -> Option<f64> {
    if !(master_bpm.is_finite() && follower_bpm.is_finite() && master_tempo_ratio.is_finite()) {
        return None;
    }
    if master_bpm <= 0.0 || follower_bpm.abs() < 1e-6 || master_tempo_ratio <= 0.0 {
        return None;
    }
    Some((master_bpm / follower_bpm) * master_tempo_ratio)
}

/// Length of one beat in track seconds.
pub fn beat_interval(bpm: f64) -> Option<f64> {
    (bpm.is_finite() && bpm > 0.0).then(|| 60.0 / bpm)
}

/// Position within the current beat, in [0, 1).
pub fn beat_phase(position_seconds: f64, bpm: f64, first_beat_seconds: f64) -> Option<f64> {
    let interval = beat_interval(bpm)?;
    let beats = (position_seconds - first_beat_seconds) / interval;
    Some(beats.rem_euclid(1.0))
}

/// Shortest signed distance from `follower` phase to `master` phase, in
/// beats, wrapped to [-0.5, 0.5].
pub fn signed_phase_difference(master_phase: f64, follower_phase: f64) -> f64 {
    let diff = master_phase - follower_phase;
    diff - diff.round()
}

/// Nearest beat boundary of the reference grid to `position_seconds`.
pub fn nearest_beat_boundary(position_seconds: f64, bpm: f64, first_beat_seconds: f64) -> Option<f64> {
    let interval = beat_interval(bpm)?;
    let beats = ((position_seconds - first_beat_seconds) / interval).round();
    Some(first_beat_seconds + beats * interval)
}

/// Follower position after shifting it onto the master's beat phase.
pub(crate) fn aligned_follower_position(
    follower_position: f64,
    follower_bpm: f64,
    follower_first_beat: f64,
    master_phase: f64,
) -> Option<f64> {
    let follower_phase = beat_phase(follower_position, follower_bpm, follower_first_beat)?;
    let interval = beat_interval(follower_bpm)?;
    let shift = signed_phase_difference(master_phase, follower_phase) * interval;
    Some((follower_position + shift).max(0.0))
}

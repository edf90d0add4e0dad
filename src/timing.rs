// src/timing.rs
//
// Pitch, phase and start-time alignment.

use crate::config::{ANGLEBASE, MAX_STOP_TIME};
use crate::error::{EngineError, EngineResult};
use crate::sound::{GetNext, Sound};

/// MIDI-style step number of a frequency; 440 Hz is step 69.
#[inline]
pub fn hz_to_step(hz: f64) -> f64 {
    69.0 + 12.0 * (hz / 440.0).log2()
}

#[inline]
pub fn step_to_hz(step: f64) -> f64 {
    440.0 * ((step - 69.0) / 12.0).exp2()
}

/// Table position and per-sample increment for a table oscillator.
///
/// The table holds one period of pitch `key` sampled at `table_sr`. `phase`
/// is the starting phase in degrees and `n` the number of output samples
/// (at `new_sr`) already elapsed at frequency `freq`. The position is
/// derived from `n` rather than accumulated, so it does not drift.
pub fn compute_phase(
    phase: f64,
    key: f64,
    n: i64,
    table_sr: f64,
    new_sr: f64,
    freq: f64,
) -> (f64, f64) {
    let period = 1.0 / step_to_hz(key);
    let table_len = table_sr * period;
    let start = table_len * (phase / ANGLEBASE);
    let incr = (table_sr / new_sr) * freq * period;
    let pos = (start + n as f64 * incr).rem_euclid(table_len);
    (pos, incr)
}

/// Two cursors brought to a common start.
pub struct SortedPair {
    /// The earlier starting cursor.
    pub first: Sound,
    /// The later one, padded with zeros back to `first`'s start.
    pub second: Sound,
    /// Zeros prepended to `second`.
    pub prepended: i64,
    /// True if the arguments came back in reverse order.
    pub swapped: bool,
}

/// Order by start time, then by descending sample rate, and pad the later
/// cursor so both start within one sample period of each other.
///
/// Cursors that have been read start at their read position.
pub fn sort_pair(mut a: Sound, mut b: Sound) -> EngineResult<SortedPair> {
    a.restart_here();
    b.restart_here();
    let swapped = b.t0() < a.t0() || (b.t0() == a.t0() && b.srate() > a.srate());
    let (first, mut second) = if swapped { (b, a) } else { (a, b) };
    let prepended = second.prepend_zeros(first.t0())?;
    Ok(SortedPair {
        first,
        second,
        prepended,
        swapped,
    })
}

/// Pad every cursor back to the earliest start among them. Returns that
/// start time. Read cursors start at their read position.
pub fn align_all(sounds: &mut [Sound]) -> EngineResult<f64> {
    sounds.iter_mut().for_each(Sound::restart_here);
    let Some(start) = sounds.iter().map(Sound::t0).reduce(f64::min) else {
        return Err(EngineError::InvalidArgument("nothing to align".into()));
    };
    for snd in sounds.iter_mut() {
        snd.prepend_zeros(start)?;
    }
    Ok(start)
}

/// Make an unread cursor start at `t`, padding with zeros or dropping
/// leading samples as needed.
pub fn align_start(mut snd: Sound, t: f64) -> EngineResult<Sound> {
    if snd.mode() != GetNext::First || snd.current() != 0 {
        return Err(EngineError::CursorAlreadyRead);
    }
    if t < snd.t0() {
        snd.prepend_zeros(t)?;
        return Ok(snd);
    }
    let t0 = snd.t0();
    Ok(snd.xform(snd.srate(), t0, t, MAX_STOP_TIME, 1.0))
}

// Table-lookup oscillator.

use std::f64::consts::TAU;

use crate::block::BlockPool;
use crate::config::{ANGLEBASE, MAX_BLOCK_LEN, Sample};
use crate::operator::{Fetch, HostId, Marker, Operator, OperatorCore, TreePrinter};
use crate::stop::StopState;
use crate::table::{Table, TableRef};
use crate::timing::{compute_phase, step_to_hz};

const SINE_TABLE_LEN: usize = 2048;
const SINE_TABLE_KEY: f64 = 69.0;

/// One period of a waveform.
#[derive(Debug, Clone)]
pub struct Wavetable {
    pub table: TableRef,
    /// Pitch of the stored period, as a step number.
    pub key: f64,
    /// Rate the period was sampled at.
    pub sample_rate: f64,
}

impl Wavetable {
    /// 2048-point sine at A4.
    pub fn sine() -> Self {
        let samples: Vec<Sample> = (0..SINE_TABLE_LEN)
            .map(|i| (TAU * i as f64 / SINE_TABLE_LEN as f64).sin() as Sample)
            .collect();
        Self {
            table: TableRef::new(Table::new(samples)),
            key: SINE_TABLE_KEY,
            sample_rate: SINE_TABLE_LEN as f64 * step_to_hz(SINE_TABLE_KEY),
        }
    }

    /// Period length in table samples.
    pub fn period_len(&self) -> f64 {
        self.sample_rate / step_to_hz(self.key)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Oscillator
// ═══════════════════════════════════════════════════════════════════

/// Reads a wavetable at frequency `freq`. Runs forever unless given a
/// duration.
pub struct OscOp {
    core: OperatorCore,
    stop: StopState,
    wave: Wavetable,
    freq: f64,
    /// Phase in degrees at sample `origin`.
    phase: f64,
    origin: i64,
    host: Option<HostId>,
}

impl OscOp {
    pub fn new(wave: Wavetable, freq: f64, phase: f64, t0: f64, sr: f64, pool: BlockPool) -> Self {
        log::debug!("osc {} Hz at sr {}", freq, sr);
        Self {
            core: OperatorCore::new("osc", t0, sr, pool),
            stop: StopState::new(),
            wave,
            freq,
            phase,
            origin: 0,
            host: None,
        }
    }

    pub fn sine(freq: f64, phase: f64, t0: f64, sr: f64, pool: BlockPool) -> Self {
        Self::new(Wavetable::sine(), freq, phase, t0, sr, pool)
    }

    /// Stop after `len` samples.
    pub fn with_duration(mut self, len: i64) -> Self {
        self.stop.terminate_cnt = len.max(0);
        self
    }

    /// Report `id` (the host object owning the table) when marked.
    pub fn with_host_ref(mut self, id: HostId) -> Self {
        self.host = Some(id);
        self
    }

    /// Continue at a different output rate from the current position.
    pub fn set_output_rate(&mut self, sr: f64) {
        let (pos, _) = self.position();
        self.phase = pos / self.wave.period_len() * ANGLEBASE;
        self.origin = self.core.current;
        self.core.sr = sr;
    }

    fn position(&self) -> (f64, f64) {
        compute_phase(
            self.phase,
            self.wave.key,
            self.core.current - self.origin,
            self.wave.sample_rate,
            self.core.sr,
            self.freq,
        )
    }
}

impl Operator for OscOp {
    fn core(&self) -> &OperatorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperatorCore {
        &mut self.core
    }

    fn fetch(&mut self) -> Fetch {
        let (mut pos, incr) = self.position();
        let mut block = self.core.pool.alloc();
        let out = block.samples_mut();
        let mut cnt = 0;
        while cnt < MAX_BLOCK_LEN {
            let Some(togo) = self.stop.limit(&self.core, cnt, MAX_BLOCK_LEN - cnt) else {
                break;
            };
            for s in &mut out[cnt..cnt + togo] {
                *s = self.wave.table.interpolate(pos) as Sample;
                pos += incr;
            }
            cnt += togo;
        }
        self.stop.finish(&mut self.core, block, cnt)
    }

    fn mark(&self, marker: &mut dyn Marker) {
        if let Some(id) = self.host {
            marker.mark(id);
        }
    }

    fn print_tree(&self, printer: &mut TreePrinter) {
        printer.line(format!(
            "osc {} Hz, table {} samples (t0 {}, sr {})",
            self.freq,
            self.wave.table.length(),
            self.core.t0,
            self.core.sr
        ));
    }
}

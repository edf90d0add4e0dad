// src/stop.rs
//
// Termination and logical-stop bookkeeping.
//
// Operators read their inputs through `Input`, which tracks the block being
// consumed and notices the moment an input terminates or reaches its logical
// stop. Those events are projected into the operator's own sample
// coordinates and folded in one of two ways:
//
//   sequential: the earliest input decides (`min_cnt`)
//   lock-step:  nothing is decided until every input has reported; the
//               latest logical stop (and the last termination) wins
//
// `StopState` then shapes the operator's output blocks so they end exactly
// at the termination point and are split at the logical stop.

use crate::block::{BlockBuilder, BlockRef};
use crate::config::{MAX_BLOCK_LEN, Sample, UNKNOWN};
use crate::operator::{Fetch, Marker, OperatorCore, TreePrinter};
use crate::sound::Sound;

// ═══════════════════════════════════════════════════════════════════════════
// Projection
// ═══════════════════════════════════════════════════════════════════════════

/// Sample `index` of `snd`, expressed as a sample index of `core`, rounded.
#[inline]
pub fn project_cnt(snd: &Sound, index: i64, core: &OperatorCore) -> i64 {
    let t = index as f64 / snd.srate() + snd.t0();
    ((t - core.t0) * core.sr + 0.5).floor() as i64
}

/// Fold a projected count into `slot`, keeping the minimum.
pub fn min_cnt(slot: &mut i64, snd: &Sound, index: i64, core: &OperatorCore) {
    let c = project_cnt(snd, index, core);
    if *slot == UNKNOWN || *slot > c {
        *slot = c;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Input
// ═══════════════════════════════════════════════════════════════════════════

/// An operator's view of one input sound.
///
/// After the input terminates it keeps serving zeros so operators never have
/// to special-case an exhausted input inside their inner loops.
pub struct Input {
    sound: Sound,
    block: BlockRef,
    offset: usize,
    remaining: usize,
    terminated: bool,
    log_seen: bool,
}

impl Input {
    pub fn new(sound: Sound) -> Self {
        Self {
            sound,
            block: BlockRef::zero(),
            offset: 0,
            remaining: 0,
            terminated: false,
            log_seen: false,
        }
    }

    pub fn sound(&self) -> &Sound {
        &self.sound
    }

    pub fn into_sound(self) -> Sound {
        self.sound
    }

    /// Samples left in the current block.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Unscaled samples left in the current block.
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.block.samples()[self.offset..self.offset + self.remaining]
    }

    #[inline]
    pub fn scale(&self) -> Sample {
        self.sound.scale()
    }

    /// Next sample, scaled, without consuming it. Call after a `check`.
    #[inline]
    pub fn peek(&self) -> Sample {
        self.block.samples()[self.offset] * self.sound.scale()
    }

    #[inline]
    pub fn next_sample(&mut self) -> Sample {
        let s = self.peek();
        self.take(1);
        s
    }

    /// Consume `n` samples of the current block.
    #[inline]
    pub fn take(&mut self, n: usize) {
        let n = n.min(self.remaining);
        self.offset += n;
        self.remaining -= n;
    }

    /// Fetch the next block. Returns true if this fetch found the end.
    fn refill(&mut self) -> bool {
        self.offset = 0;
        if self.terminated {
            self.remaining = MAX_BLOCK_LEN;
            return false;
        }
        let chunk = self.sound.get_next();
        if chunk.is_terminal() {
            self.terminated = true;
            self.block = chunk.block;
            self.remaining = MAX_BLOCK_LEN;
            return true;
        }
        self.block = chunk.block;
        self.remaining = chunk.len;
        false
    }

    /// Make sure a sample is available, ignoring stop events.
    pub fn check(&mut self) {
        if self.remaining == 0 {
            self.refill();
        }
    }

    /// Refill if empty and fold termination into `stop`.
    pub fn check_term(&mut self, core: &OperatorCore, stop: &mut StopState) {
        if self.remaining == 0 && self.refill() {
            min_cnt(&mut stop.terminate_cnt, &self.sound, self.sound.current(), core);
        }
    }

    /// Refill if empty and fold the logical stop into `core`.
    pub fn check_log(&mut self, core: &mut OperatorCore) {
        if self.remaining == 0 {
            self.refill();
            if let Some(index) = self.logical_stop_test() {
                let mut slot = core.log_stop_cnt;
                min_cnt(&mut slot, &self.sound, index, core);
                core.log_stop_cnt = slot;
            }
        }
    }

    /// Sequential discipline: both termination and logical stop.
    pub fn check_term_log(&mut self, core: &mut OperatorCore, stop: &mut StopState) {
        if self.remaining == 0 {
            if self.refill() {
                min_cnt(&mut stop.terminate_cnt, &self.sound, self.sound.current(), core);
            }
            if let Some(index) = self.logical_stop_test() {
                let mut slot = core.log_stop_cnt;
                min_cnt(&mut slot, &self.sound, index, core);
                core.log_stop_cnt = slot;
            }
        }
    }

    /// Lock-step discipline: report events for input `index` to `lock`.
    pub fn check_lockstep(
        &mut self,
        index: usize,
        lock: &mut LockStep,
        core: &mut OperatorCore,
        stop: &mut StopState,
    ) {
        if self.remaining == 0 {
            if self.refill() {
                let c = project_cnt(&self.sound, self.sound.current(), core);
                lock.terminated(index, c, stop);
            }
            if let Some(at) = self.logical_stop_test() {
                let c = project_cnt(&self.sound, at, core);
                lock.logically_stopped(index, c, core);
            }
        }
    }

    /// The input's logical stop, the first time it has been reached.
    fn logical_stop_test(&mut self) -> Option<i64> {
        let lsc = self.sound.logical_stop_cnt();
        if self.log_seen || lsc == UNKNOWN || lsc > self.sound.current() {
            return None;
        }
        self.log_seen = true;
        Some(lsc)
    }

    pub fn mark(&self, marker: &mut dyn Marker) {
        self.sound.mark(marker);
    }

    pub fn print_tree(&self, printer: &mut TreePrinter) {
        self.sound.print_tree_into(printer);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Lock-step reducer
// ═══════════════════════════════════════════════════════════════════════════

/// One bit per input for each kind of event.
#[derive(Debug, Clone)]
pub struct LockStep {
    all: u32,
    log_bits: u32,
    term_bits: u32,
    stop_max: i64,
}

impl LockStep {
    pub fn new(inputs: usize) -> Self {
        let all = if inputs >= 32 { u32::MAX } else { (1u32 << inputs) - 1 };
        Self {
            all,
            log_bits: 0,
            term_bits: 0,
            stop_max: UNKNOWN,
        }
    }

    /// Input `index` reached its logical stop at `projected`. Once every
    /// input has, the latest of them becomes the operator's logical stop.
    pub fn logically_stopped(&mut self, index: usize, projected: i64, core: &mut OperatorCore) {
        let bit = 1 << index;
        if self.log_bits & bit != 0 {
            return;
        }
        self.log_bits |= bit;
        self.stop_max = self.stop_max.max(projected);
        if self.log_bits == self.all {
            core.log_stop_cnt = self.stop_max;
        }
    }

    /// Input `index` terminated at `projected`. The operator terminates
    /// where the last input does.
    pub fn terminated(&mut self, index: usize, projected: i64, stop: &mut StopState) {
        self.term_bits |= 1 << index;
        if self.term_bits == self.all {
            stop.terminate_cnt = projected;
        }
    }

    pub fn all_terminated(&self) -> bool {
        self.term_bits == self.all
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Output shaping
// ═══════════════════════════════════════════════════════════════════════════

/// Output-side stop state of an operator.
#[derive(Debug, Clone)]
pub struct StopState {
    pub terminate_cnt: i64,
    pub logically_stopped: bool,
}

impl Default for StopState {
    fn default() -> Self {
        Self::new()
    }
}

impl StopState {
    pub fn new() -> Self {
        Self {
            terminate_cnt: UNKNOWN,
            logically_stopped: false,
        }
    }

    /// Trim the next run of `togo` samples, `cnt` samples into the block
    /// being built. `None` means the block ends here.
    pub fn limit(&mut self, core: &OperatorCore, cnt: usize, togo: usize) -> Option<usize> {
        let at = core.current + cnt as i64;
        let mut togo = togo as i64;

        if self.terminate_cnt != UNKNOWN && self.terminate_cnt <= at + togo {
            togo = (self.terminate_cnt - at).max(0);
            if togo == 0 {
                return None;
            }
        }

        if !self.logically_stopped && core.log_stop_cnt != UNKNOWN {
            let to_stop = (core.log_stop_cnt - at).max(0);
            if to_stop < togo {
                if to_stop == 0 {
                    if cnt > 0 {
                        // the next block starts at the logical stop
                        return None;
                    }
                    self.logically_stopped = true;
                } else {
                    togo = to_stop;
                }
            }
        }
        Some(togo as usize)
    }

    /// Close a block holding `cnt` samples.
    pub fn finish(&mut self, core: &mut OperatorCore, block: BlockBuilder, cnt: usize) -> Fetch {
        if cnt == 0 {
            return Fetch::Terminated;
        }
        core.current += cnt as i64;
        let flagged = self.logically_stopped;
        if !flagged && core.log_stop_cnt == core.current {
            self.logically_stopped = true;
        }
        Fetch::Block {
            block: block.freeze(),
            len: cnt,
            logically_stopped: flagged,
        }
    }
}

// src/sound.rs
//
// Stream cursors.
//
// A `Sound` is what consumers hold: a position in a shared block list plus
// the framing (start time, sample rate, clipping bound, scale) through which
// that list is read. Reframing a sound (`xform`, `prepend_zeros`) never
// touches samples; it only adjusts how the cursor walks the list.

use std::any::Any;
use std::rc::Rc;

use crate::block::{BlockPool, BlockRef};
use crate::config::{
    EngineConfig, MAX_BLOCK_LEN, MAX_STOP, MAX_STOP_TIME, MIN_START_TIME, Sample, UNKNOWN,
};
use crate::error::{EngineError, EngineResult};
use crate::list::SndList;
use crate::operator::{Marker, Operator, TreePrinter};
use crate::table::{Table, TableRef};

/// Which routine the next `get_next` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetNext {
    /// Not read yet; decides between the others.
    First,
    /// Walk the list.
    Normal,
    /// Drop `-current` leading samples, then walk.
    Flush,
    /// Supply `prepend_cnt` zeros, then switch to `after_prepend`.
    Zeros,
}

/// Samples handed out by `get_next`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub block: BlockRef,
    pub len: usize,
}

impl Chunk {
    /// Valid, unscaled samples.
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.block.samples()[..self.len]
    }

    /// True if this is the end of the sound.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.block.is_zero()
    }
}

/// The last chunk handed out, kept for `sref`.
#[derive(Debug, Clone)]
struct Window {
    block: BlockRef,
    start: i64,
    len: usize,
}

/// A cursor over a lazily computed sound.
///
/// Cloning is `sound_copy`: the copy shares every computed and future block
/// but advances independently.
#[derive(Clone)]
pub struct Sound {
    get_next: GetNext,
    after_prepend: GetNext,

    /// Logical starting time.
    time: f64,
    /// Quantized time of the first sample.
    t0: f64,
    /// Exact time of the first sample.
    true_t0: f64,

    /// Clipping bound, in samples.
    stop: i64,
    sr: f64,

    /// Next sample index. Negative while leading samples are still to be
    /// dropped.
    current: i64,
    logical_stop_cnt: i64,

    list: SndList,
    scale: f32,

    prepend_cnt: i64,
    table: Option<TableRef>,
    extra: Option<Rc<dyn Any>>,
    pool: BlockPool,
    window: Option<Window>,
}

impl Sound {
    /// Wrap an operator (`sound_create`).
    pub fn new(op: Box<dyn Operator>, t0: f64, sr: f64, scale: f64) -> Self {
        let pool = op.core().pool.clone();
        log::debug!("sound for {} at t0 {} sr {}", op.core().name, t0, sr);
        Self::with_list(SndList::pending(op), pool, t0, sr, scale)
    }

    /// A sound that has already ended (`sound_zero`).
    pub fn zero(t0: f64, sr: f64) -> Self {
        Self::with_list(SndList::terminal(), BlockPool::new(), t0, sr, 1.0)
    }

    fn with_list(list: SndList, pool: BlockPool, t0: f64, sr: f64, scale: f64) -> Self {
        Self {
            get_next: GetNext::First,
            after_prepend: GetNext::Normal,
            time: t0,
            t0,
            true_t0: t0,
            stop: MAX_STOP,
            sr,
            current: 0,
            logical_stop_cnt: UNKNOWN,
            list,
            scale: scale as f32,
            prepend_cnt: 0,
            table: None,
            extra: None,
            pool,
            window: None,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn t0(&self) -> f64 {
        self.t0
    }

    pub fn true_t0(&self) -> f64 {
        self.true_t0
    }

    pub fn srate(&self) -> f64 {
        self.sr
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn stop(&self) -> i64 {
        self.stop
    }

    /// Index of the next sample to be delivered.
    pub fn current(&self) -> i64 {
        self.current.max(0)
    }

    /// Logical stop in this cursor's samples, or `UNKNOWN`.
    pub fn logical_stop_cnt(&self) -> i64 {
        self.logical_stop_cnt
    }

    pub fn mode(&self) -> GetNext {
        self.get_next
    }

    pub fn prepend_cnt(&self) -> i64 {
        self.prepend_cnt
    }

    pub fn table(&self) -> Option<&TableRef> {
        self.table.as_ref()
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }

    pub(crate) fn list(&self) -> &SndList {
        &self.list
    }

    pub fn set_extra<T: Any>(&mut self, value: T) {
        self.extra = Some(Rc::new(value));
    }

    pub fn extra<T: Any>(&self) -> Option<&T> {
        self.extra.as_deref().and_then(|e| e.downcast_ref::<T>())
    }

    /// End time implied by the clipping bound (`snd_stop_time`).
    pub fn stop_time(&self) -> f64 {
        if self.stop == MAX_STOP {
            MAX_STOP_TIME
        } else {
            self.t0 + (self.stop as f64 + 0.5) / self.sr
        }
    }

    /// Set the logical stop from a time. Times before `t0` become 0.
    pub fn set_logical_stop_time(&mut self, when: f64) {
        let n = ((when - self.t0) * self.sr + 0.5).floor() as i64;
        if n < 0 {
            log::warn!("logical stop time {} is before sound start {}", when, self.t0);
        }
        self.logical_stop_cnt = n.max(0);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Reading
    // ═══════════════════════════════════════════════════════════════════

    /// Next chunk of samples. After the end, always the zero block with a
    /// count of 0.
    pub fn get_next(&mut self) -> Chunk {
        let chunk = match self.get_next {
            GetNext::First => self.get_first(),
            GetNext::Normal => self.next_normal(),
            GetNext::Flush => self.flush(),
            GetNext::Zeros => self.next_zeros(),
        };
        self.window = (!chunk.is_terminal()).then(|| Window {
            block: chunk.block.clone(),
            start: self.current - chunk.len as i64,
            len: chunk.len,
        });
        chunk
    }

    fn get_first(&mut self) -> Chunk {
        self.get_next = if self.prepend_cnt > 0 {
            self.after_prepend = GetNext::Normal;
            GetNext::Zeros
        } else if self.current < 0 {
            GetNext::Flush
        } else {
            GetNext::Normal
        };
        match self.get_next {
            GetNext::Zeros => self.next_zeros(),
            GetNext::Flush => self.flush(),
            _ => self.next_normal(),
        }
    }

    fn next_normal(&mut self) -> Chunk {
        if self.current >= self.stop {
            return self.terminate();
        }
        let node = self.list.force(false);
        if node.logically_stopped && self.logical_stop_cnt == UNKNOWN {
            self.logical_stop_cnt = self.current;
        }
        let Some(next) = node.next else {
            return self.terminate();
        };
        let len = (node.len as i64).min(self.stop - self.current);
        self.list = next;
        self.current += len;
        Chunk {
            block: node.block,
            len: len as usize,
        }
    }

    fn next_zeros(&mut self) -> Chunk {
        let room = self.stop - self.current;
        if room <= 0 {
            return self.terminate();
        }
        let n = self.prepend_cnt.min(MAX_BLOCK_LEN as i64).min(room);
        self.prepend_cnt -= n;
        self.current += n;
        if self.prepend_cnt == 0 {
            self.get_next = self.after_prepend;
        }
        Chunk {
            block: BlockRef::silent(),
            len: n as usize,
        }
    }

    fn flush(&mut self) -> Chunk {
        while self.current < 0 {
            let node = self.list.force(false);
            let Some(next) = node.next else {
                self.current = 0;
                return self.terminate();
            };
            let len = node.len as i64;
            if self.current + len <= 0 {
                if node.logically_stopped && self.logical_stop_cnt == UNKNOWN {
                    self.logical_stop_cnt = 0;
                }
                self.current += len;
                self.list = next;
                continue;
            }
            // Keep the tail of a partially dropped block in a fresh cell.
            let skip = (-self.current) as usize;
            let tail = &node.block.samples()[skip..node.len];
            let mut builder = self.pool.alloc();
            builder.samples_mut()[..tail.len()].copy_from_slice(tail);
            self.list = SndList::resolved(builder.freeze(), tail.len(), node.logically_stopped, next);
            self.current = 0;
        }
        self.get_next = GetNext::Normal;
        self.next_normal()
    }

    fn terminate(&mut self) -> Chunk {
        if !self.list.is_terminal() {
            self.list = SndList::terminal();
        }
        if self.logical_stop_cnt == UNKNOWN {
            self.logical_stop_cnt = self.current();
        }
        self.get_next = GetNext::Normal;
        self.prepend_cnt = 0;
        Chunk {
            block: BlockRef::zero(),
            len: 0,
        }
    }

    /// First sample of the next chunk, without consuming it.
    fn peek_sample(&mut self) -> Option<f32> {
        match self.get_next {
            GetNext::Zeros => Some(0.0),
            GetNext::Normal if self.current < self.stop => {
                let node = self.list.force(true);
                (node.next.is_some() && node.len > 0).then(|| node.block.samples()[0])
            }
            _ => None,
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Reframing
    // ═══════════════════════════════════════════════════════════════════

    /// Same samples, scaled (`sound_scale`).
    pub fn scaled(&self, factor: f64) -> Sound {
        let mut snd = self.clone();
        snd.scale *= factor as f32;
        snd.table = None;
        snd
    }

    /// Reframe (`snd_xform`): reinterpret at `sr` starting at `time`, keep
    /// only `[start_time, stop_time)` and multiply by `scale`.
    ///
    /// Samples are dropped or clipped lazily; nothing is recomputed.
    pub fn xform(&self, sr: f64, time: f64, start_time: f64, stop_time: f64, scale: f64) -> Sound {
        let start_cnt = if start_time <= MIN_START_TIME {
            0
        } else {
            let c = (start_time - time) * sr + 0.5;
            if c > 0.0 { c as i64 } else { 0 }
        };

        let mut stop_cnt = if stop_time >= MAX_STOP_TIME {
            MAX_STOP
        } else {
            let c = (stop_time - time) * sr + 0.5;
            if c < MAX_STOP as f64 {
                c as i64
            } else {
                log::warn!("stop count overflow in xform");
                MAX_STOP
            }
        };

        let mut snd = self.clone();
        snd.rebase();
        if stop_cnt > snd.stop {
            stop_cnt = snd.stop;
        }

        if stop_cnt < 0 || start_cnt >= stop_cnt {
            log::debug!("xform leaves an empty sound at {}", time);
            let mut zero = Sound::zero(time, sr);
            zero.pool = self.pool.clone();
            return zero;
        }

        snd.time = time;
        snd.t0 = time + start_cnt as f64 / sr;
        snd.true_t0 = snd.t0;
        if start_cnt > 0 {
            let from_prepend = start_cnt.min(snd.prepend_cnt);
            snd.prepend_cnt -= from_prepend;
            snd.current -= start_cnt - from_prepend;
            snd.get_next = GetNext::First;
            stop_cnt -= start_cnt;
            if snd.logical_stop_cnt != UNKNOWN {
                snd.logical_stop_cnt = (snd.logical_stop_cnt - start_cnt).max(0);
            }
        }
        snd.stop = stop_cnt;
        snd.sr = sr;
        snd.scale *= scale as f32;
        snd.table = None;
        snd
    }

    /// Make the current read position sample 0.
    fn rebase(&mut self) {
        if self.current > 0 {
            let c = self.current;
            if self.stop != MAX_STOP {
                self.stop -= c;
            }
            if self.logical_stop_cnt != UNKNOWN {
                self.logical_stop_cnt = (self.logical_stop_cnt - c).max(0);
            }
            self.t0 += c as f64 / self.sr;
            self.current = 0;
        }
        self.window = None;
    }

    /// Make the read position sample 0 of an unread cursor over the rest of
    /// the sound. The start time moves forward by the samples already read.
    pub fn restart_here(&mut self) {
        if self.get_next == GetNext::First {
            return;
        }
        self.rebase();
        self.true_t0 = self.t0;
        self.table = None;
        self.get_next = GetNext::First;
    }

    /// Start earlier by prepending zeros (`sound_prepend_zeros`). Only valid
    /// before the first read. Returns the number of zeros added.
    pub fn prepend_zeros(&mut self, t0: f64) -> EngineResult<i64> {
        if self.get_next != GetNext::First || self.current != 0 {
            return Err(EngineError::CursorAlreadyRead);
        }
        let n = ((self.true_t0 - t0) * self.sr + 0.5).floor() as i64;
        if n <= 0 {
            return Ok(0);
        }
        self.prepend_cnt += n;
        self.t0 -= n as f64 / self.sr;
        self.true_t0 = t0;
        if self.stop != MAX_STOP {
            self.stop = (self.stop + n).min(MAX_STOP);
        }
        if self.logical_stop_cnt != UNKNOWN {
            self.logical_stop_cnt += n;
        }
        Ok(n)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Materialization and random access
    // ═══════════════════════════════════════════════════════════════════

    /// Drain a copy into a table (`sound_to_table`). The table is cached on
    /// this cursor.
    pub fn to_table(&mut self, config: &EngineConfig) -> EngineResult<TableRef> {
        if let Some(table) = &self.table {
            return Ok(table.acquire());
        }
        let bound = config.table_stop_bound;
        let mut copy = self.clone();
        let scale = copy.scale;
        let mut samples: Vec<Sample> = Vec::new();
        loop {
            let chunk = copy.get_next();
            if chunk.is_terminal() {
                break;
            }
            if (samples.len() + chunk.len) as i64 > bound {
                log::warn!("sound still running after {} samples", bound);
                return Err(EngineError::UnboundedStream { bound });
            }
            samples.extend(chunk.samples().iter().map(|s| s * scale));
        }
        // Running into the implicit clip is not the end of the sound.
        if copy.stop == MAX_STOP && copy.current >= MAX_STOP {
            log::warn!("sound reached the clipping limit without terminating");
            return Err(EngineError::UnboundedStream { bound });
        }
        let table = TableRef::new(Table::new(samples));
        self.table = Some(table.acquire());
        Ok(table)
    }

    /// Value at time `t` (`snd_sref`), linearly interpolated.
    ///
    /// Advances this cursor to the block containing `t`. Asking for a time
    /// before that block fails; read an earlier copy instead.
    pub fn sref(&mut self, t: f64) -> EngineResult<f64> {
        let exact = (t - self.t0) * self.sr;
        if exact < 0.0 {
            return Ok(0.0);
        }
        let index = exact.floor() as i64;
        let frac = exact - index as f64;

        let (block, start, len) = loop {
            match &self.window {
                Some(w) if index < w.start => {
                    return Err(EngineError::InvalidBackwardAccess {
                        current: w.start,
                        requested: index,
                    });
                }
                Some(w) if index < w.start + w.len as i64 => {
                    break (w.block.clone(), w.start, w.len);
                }
                None if index < self.current() => {
                    return Err(EngineError::InvalidBackwardAccess {
                        current: self.current(),
                        requested: index,
                    });
                }
                _ => {}
            }
            if self.get_next().is_terminal() {
                return Ok(0.0);
            }
        };

        let offset = (index - start) as usize;
        let x1 = block.samples()[offset] as f64;
        let x2 = if frac == 0.0 {
            x1
        } else if offset + 1 < len {
            block.samples()[offset + 1] as f64
        } else {
            self.peek_sample().map_or(x1, |s| s as f64)
        };
        Ok((x1 + frac * (x2 - x1)) * self.scale as f64)
    }

    /// First time at which the sound reaches `value` (`snd_sref_inverse`),
    /// interpolating between the bracketing samples.
    ///
    /// Scans a copy; this cursor is not moved.
    pub fn sref_inverse(&self, value: f64, config: &EngineConfig) -> EngineResult<f64> {
        let mut copy = self.clone();
        let scale = copy.scale as f64;
        let mut prev: Option<f64> = None;
        loop {
            let chunk = copy.get_next();
            if chunk.is_terminal() {
                return Err(EngineError::NotFound { value });
            }
            let start = copy.current - chunk.len as i64;
            if start > config.table_stop_bound {
                return Err(EngineError::UnboundedStream {
                    bound: config.table_stop_bound,
                });
            }
            for (i, s) in chunk.samples().iter().enumerate() {
                let x = *s as f64 * scale;
                let idx = start + i as i64;
                if x == value {
                    return Ok(self.t0 + idx as f64 / self.sr);
                }
                if let Some(p) = prev {
                    if (p < value && value < x) || (x < value && value < p) {
                        let frac = (value - p) / (x - p);
                        return Ok(self.t0 + ((idx - 1) as f64 + frac) / self.sr);
                    }
                }
                prev = Some(x);
            }
        }
    }

    /// Number of samples, counting at most `max` (`snd_length`).
    pub fn length(&self, max: i64) -> i64 {
        let mut copy = self.clone();
        let mut total = 0;
        while total < max {
            let chunk = copy.get_next();
            if chunk.is_terminal() {
                break;
            }
            total += chunk.len as i64;
        }
        total.min(max)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Host hooks and debugging
    // ═══════════════════════════════════════════════════════════════════

    /// Report host objects reachable from the operator behind this cursor.
    pub fn mark(&self, marker: &mut dyn Marker) {
        self.list.visit_operator(|op| op.mark(marker));
    }

    pub fn print_tree_into(&self, printer: &mut TreePrinter) {
        printer.line(format!(
            "sound t0 {} sr {} scale {} current {} stop {}",
            self.t0,
            self.sr,
            self.scale,
            self.current(),
            self.stop
        ));
        printer.nest(|p| {
            if self.list.visit_operator(|op| op.print_tree(p)).is_none() {
                p.line("(no pending operator)");
            }
        });
    }

    pub fn print_tree(&self) -> String {
        let mut printer = TreePrinter::new();
        self.print_tree_into(&mut printer);
        printer.finish()
    }

    /// Serial of the `n`th block (0-based) a fresh copy would return.
    pub fn nth_block(&self, n: usize) -> Option<u64> {
        let mut copy = self.clone();
        for _ in 0..n {
            if copy.get_next().is_terminal() {
                return None;
            }
        }
        let chunk = copy.get_next();
        (!chunk.is_terminal()).then(|| chunk.block.serial())
    }
}

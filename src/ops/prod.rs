// Binary multiplier. Ends, and stops logically, with whichever input does
// so first.

use crate::block::BlockPool;
use crate::config::MAX_BLOCK_LEN;
use crate::error::{EngineError, EngineResult};
use crate::operator::{Fetch, Marker, Operator, OperatorCore, TreePrinter};
use crate::sound::Sound;
use crate::stop::{Input, StopState};
use crate::timing::sort_pair;

pub struct ProdOp {
    core: OperatorCore,
    stop: StopState,
    s1: Input,
    s2: Input,
}

impl ProdOp {
    /// Multiply two unread sounds at the same sample rate.
    pub fn new(a: Sound, b: Sound, pool: BlockPool) -> EngineResult<Self> {
        if a.srate() != b.srate() {
            return Err(EngineError::SampleRateMismatch {
                expected: a.srate(),
                actual: b.srate(),
            });
        }
        let pair = sort_pair(a, b)?;
        let (t0, sr) = (pair.first.t0(), pair.first.srate());
        log::debug!("prod at t0 {} sr {} ({} zeros prepended)", t0, sr, pair.prepended);
        Ok(Self {
            core: OperatorCore::new("prod", t0, sr, pool),
            stop: StopState::new(),
            s1: Input::new(pair.first),
            s2: Input::new(pair.second),
        })
    }
}

impl Operator for ProdOp {
    fn core(&self) -> &OperatorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperatorCore {
        &mut self.core
    }

    fn fetch(&mut self) -> Fetch {
        let ProdOp { core, stop, s1, s2 } = self;
        let mut block = core.pool.alloc();
        let out = block.samples_mut();
        let mut cnt = 0;
        while cnt < MAX_BLOCK_LEN {
            s1.check_term_log(core, stop);
            s2.check_term_log(core, stop);
            let avail = s1.remaining().min(s2.remaining()).min(MAX_BLOCK_LEN - cnt);
            let Some(togo) = stop.limit(core, cnt, avail) else {
                break;
            };
            let scale = s1.scale() * s2.scale();
            for ((o, x), y) in out[cnt..cnt + togo].iter_mut().zip(s1.samples()).zip(s2.samples()) {
                *o = x * y * scale;
            }
            s1.take(togo);
            s2.take(togo);
            cnt += togo;
        }
        stop.finish(core, block, cnt)
    }

    fn mark(&self, marker: &mut dyn Marker) {
        self.s1.mark(marker);
        self.s2.mark(marker);
    }

    fn print_tree(&self, printer: &mut TreePrinter) {
        printer.line(format!("prod (t0 {}, sr {})", self.core.t0, self.core.sr));
        printer.nest(|p| {
            self.s1.print_tree(p);
            self.s2.print_tree(p);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Sample;
    use crate::ops::ConstOp;

    fn constant(value: Sample, len: i64, t0: f64, sr: f64) -> Sound {
        let op = ConstOp::new(value, len, t0, sr, BlockPool::new());
        Sound::new(Box::new(op), t0, sr, 1.0)
    }

    fn product(a: Sound, b: Sound) -> Sound {
        let op = ProdOp::new(a, b, BlockPool::new()).unwrap();
        let (t0, sr) = (op.core.t0, op.core.sr);
        Sound::new(Box::new(op), t0, sr, 1.0)
    }

    #[test]
    fn ends_with_the_shorter_input() {
        let mut snd = product(constant(2.0, 100, 0.0, 10.0), constant(3.0, 60, 0.0, 10.0));
        let chunk = snd.get_next();
        assert_eq!(chunk.len, 60);
        assert!(chunk.samples().iter().all(|s| *s == 6.0));
        assert!(snd.get_next().is_terminal());
        assert_eq!(snd.logical_stop_cnt(), 60);
    }

    #[test]
    fn earliest_logical_stop_splits_the_output() {
        let b = ConstOp::new(3.0, 60, 0.0, 10.0, BlockPool::new()).with_logical_stop(30);
        let b = Sound::new(Box::new(b), 0.0, 10.0, 1.0);
        let mut snd = product(constant(2.0, 100, 0.0, 10.0), b);
        assert_eq!(snd.get_next().len, 30);
        assert_eq!(snd.logical_stop_cnt(), crate::config::UNKNOWN);
        assert_eq!(snd.get_next().len, 30);
        assert_eq!(snd.logical_stop_cnt(), 30);
        assert!(snd.get_next().is_terminal());
    }

    #[test]
    fn later_input_is_padded_with_zeros() {
        let mut snd = product(constant(2.0, 10, 0.0, 10.0), constant(3.0, 10, 0.5, 10.0));
        let mut out = Vec::new();
        loop {
            let chunk = snd.get_next();
            if chunk.is_terminal() {
                break;
            }
            out.extend_from_slice(chunk.samples());
        }
        assert_eq!(out, [vec![0.0; 5], vec![6.0; 5]].concat());
    }

    #[test]
    fn rates_must_match() {
        let err = ProdOp::new(constant(1.0, 1, 0.0, 10.0), constant(1.0, 1, 0.0, 20.0), BlockPool::new());
        assert!(matches!(
            err,
            Err(EngineError::SampleRateMismatch { expected, actual }) if expected == 10.0 && actual == 20.0
        ));
    }
}

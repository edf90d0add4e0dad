// N-ary mixer. Ends when its last input ends and stops logically when all
// inputs have.

use once_cell::sync::Lazy;

use crate::block::{BlockBuilder, BlockPool};
use crate::config::{MAX_BLOCK_LEN, Sample};
use crate::error::{EngineError, EngineResult};
use crate::interp::{InterpClass, InterpCode, MAX_ARITY, RoutineTable, interp_style};
use crate::operator::{Fetch, Marker, Operator, OperatorCore, TreePrinter};
use crate::sound::Sound;
use crate::stop::{Input, LockStep, StopState};
use crate::timing::align_all;

type MixRoutine = fn(&mut AddOp, &mut BlockBuilder) -> usize;

/// Routine tables per arity. Inputs at the output rate are summed block by
/// block; any other mix reads every input through a `Reader`.
static ROUTINES: Lazy<Vec<RoutineTable<MixRoutine>>> = Lazy::new(|| {
    let readable = [InterpClass::None, InterpClass::Interpolate, InterpClass::Ramp];
    (1..=MAX_ARITY)
        .map(|arity| {
            let mut table = RoutineTable::new(arity);
            let combos = readable.len().pow(arity as u32);
            for mut n in 0..combos {
                let classes: Vec<InterpClass> = (0..arity)
                    .map(|_| {
                        let c = readable[n % readable.len()];
                        n /= readable.len();
                        c
                    })
                    .collect();
                let routine: MixRoutine = if classes.iter().all(|c| *c == InterpClass::None) {
                    mix_aligned
                } else {
                    mix_resampled
                };
                if let Err(e) = InterpCode::pack(&classes).and_then(|code| table.bind_code(code, routine)) {
                    log::error!("add routine for {} inputs not bound: {}", arity, e);
                }
            }
            table
        })
        .collect()
});

/// Reads one input at the output rate.
struct Reader {
    class: InterpClass,
    ratio: f64,
    frac: f64,
    prev: Sample,
    next: Sample,
    primed: bool,
}

impl Reader {
    fn new(class: InterpClass, input_sr: f64, output_sr: f64) -> Self {
        Self {
            class,
            ratio: input_sr / output_sr,
            frac: 0.0,
            prev: 0.0,
            next: 0.0,
            primed: false,
        }
    }

    fn pull(
        index: usize,
        input: &mut Input,
        lock: &mut LockStep,
        core: &mut OperatorCore,
        stop: &mut StopState,
    ) -> Sample {
        input.check_lockstep(index, lock, core, stop);
        input.next_sample()
    }

    fn next(
        &mut self,
        index: usize,
        input: &mut Input,
        lock: &mut LockStep,
        core: &mut OperatorCore,
        stop: &mut StopState,
    ) -> Sample {
        if !self.primed {
            self.prev = Self::pull(index, input, lock, core, stop);
            self.next = Self::pull(index, input, lock, core, stop);
            self.primed = true;
        }
        let value = match self.class {
            InterpClass::None | InterpClass::Step => self.prev,
            InterpClass::Interpolate | InterpClass::Ramp => {
                self.prev + (self.next - self.prev) * self.frac as Sample
            }
        };
        self.frac += self.ratio;
        while self.frac >= 1.0 {
            self.frac -= 1.0;
            self.prev = self.next;
            self.next = Self::pull(index, input, lock, core, stop);
        }
        value
    }
}

pub struct AddOp {
    core: OperatorCore,
    stop: StopState,
    lock: LockStep,
    inputs: Vec<Input>,
    readers: Vec<Reader>,
    code: InterpCode,
    routine: MixRoutine,
}

impl AddOp {
    /// Mix sounds from their read positions. The output runs at the fastest
    /// input rate and starts with the earliest input.
    pub fn new(mut sounds: Vec<Sound>, pool: BlockPool) -> EngineResult<Self> {
        if sounds.is_empty() || sounds.len() > MAX_ARITY {
            return Err(EngineError::InvalidArgument(format!(
                "add takes 1 to {MAX_ARITY} inputs, got {}",
                sounds.len()
            )));
        }
        let sr = sounds.iter().map(Sound::srate).fold(0.0, f64::max);
        let t0 = align_all(&mut sounds)?;

        let classes: Vec<InterpClass> = sounds.iter().map(|s| interp_style(s, sr)).collect();
        let code = InterpCode::pack(&classes)?;
        let routine = ROUTINES[sounds.len() - 1].select(code)?;
        log::debug!("add {} at t0 {} sr {}", code, t0, sr);

        let readers = sounds
            .iter()
            .zip(&classes)
            .map(|(s, class)| Reader::new(*class, s.srate(), sr))
            .collect();
        Ok(Self {
            core: OperatorCore::new("add", t0, sr, pool),
            stop: StopState::new(),
            lock: LockStep::new(sounds.len()),
            inputs: sounds.into_iter().map(Input::new).collect(),
            readers,
            code,
            routine,
        })
    }

    pub fn code(&self) -> InterpCode {
        self.code
    }
}

/// All inputs at the output rate: sum runs of samples.
fn mix_aligned(op: &mut AddOp, block: &mut BlockBuilder) -> usize {
    let AddOp {
        core,
        stop,
        lock,
        inputs,
        ..
    } = op;
    let out = block.samples_mut();
    let mut cnt = 0;
    while cnt < MAX_BLOCK_LEN {
        for (i, input) in inputs.iter_mut().enumerate() {
            input.check_lockstep(i, lock, core, stop);
        }
        let avail = inputs
            .iter()
            .map(Input::remaining)
            .min()
            .unwrap_or(0)
            .min(MAX_BLOCK_LEN - cnt);
        let Some(togo) = stop.limit(core, cnt, avail) else {
            break;
        };
        let run = &mut out[cnt..cnt + togo];
        for input in inputs.iter_mut() {
            let scale = input.scale();
            for (o, s) in run.iter_mut().zip(input.samples()) {
                *o += s * scale;
            }
            input.take(togo);
        }
        cnt += togo;
    }
    cnt
}

/// Mixed rates: one output sample at a time through the readers.
fn mix_resampled(op: &mut AddOp, block: &mut BlockBuilder) -> usize {
    let AddOp {
        core,
        stop,
        lock,
        inputs,
        readers,
        ..
    } = op;
    let out = block.samples_mut();
    let mut cnt = 0;
    while cnt < MAX_BLOCK_LEN && stop.limit(core, cnt, 1).is_some() {
        let mut sum = 0.0;
        for (i, (input, reader)) in inputs.iter_mut().zip(readers.iter_mut()).enumerate() {
            sum += reader.next(i, input, lock, core, stop);
        }
        out[cnt] = sum;
        cnt += 1;
    }
    cnt
}

impl Operator for AddOp {
    fn core(&self) -> &OperatorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperatorCore {
        &mut self.core
    }

    fn fetch(&mut self) -> Fetch {
        let mut block = self.core.pool.alloc();
        let routine = self.routine;
        let cnt = routine(self, &mut block);
        self.stop.finish(&mut self.core, block, cnt)
    }

    fn free(&mut self) {
        log::trace!("add of {} inputs freed", self.inputs.len());
    }

    fn mark(&self, marker: &mut dyn Marker) {
        for input in &self.inputs {
            input.mark(marker);
        }
    }

    fn print_tree(&self, printer: &mut TreePrinter) {
        printer.line(format!("add {} (t0 {}, sr {})", self.code, self.core.t0, self.core.sr));
        printer.nest(|p| {
            for input in &self.inputs {
                input.print_tree(p);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ops::ConstOp;

    fn constant(value: Sample, len: i64, t0: f64, sr: f64) -> Sound {
        let op = ConstOp::new(value, len, t0, sr, BlockPool::new());
        Sound::new(Box::new(op), t0, sr, 1.0)
    }

    fn render(sounds: Vec<Sound>) -> (Vec<Sample>, Sound) {
        let op = AddOp::new(sounds, BlockPool::new()).unwrap();
        let (t0, sr) = (op.core.t0, op.core.sr);
        let mut snd = Sound::new(Box::new(op), t0, sr, 1.0);
        let table = snd.to_table(&EngineConfig::default()).unwrap();
        (table.samples().to_vec(), snd)
    }

    #[test]
    fn any_dominant_class_leaves_the_aligned_routine() {
        let readable = [InterpClass::None, InterpClass::Interpolate, InterpClass::Ramp];
        for arity in 1..=MAX_ARITY {
            let table = &ROUTINES[arity - 1];
            let aligned = table.resolve(&vec![InterpClass::None; arity]).unwrap();
            assert_eq!(aligned as usize, mix_aligned as MixRoutine as usize);
            for n in 1..readable.len().pow(arity as u32) {
                let mut rest = n;
                let classes: Vec<InterpClass> = (0..arity)
                    .map(|_| {
                        let c = readable[rest % readable.len()];
                        rest /= readable.len();
                        c
                    })
                    .collect();
                let routine = table.resolve(&classes).unwrap();
                assert_ne!(routine as usize, aligned as usize, "{classes:?}");
            }
        }
    }

    #[test]
    fn runs_until_the_last_input_ends() {
        let (out, snd) = render(vec![constant(1.0, 100, 0.0, 10.0), constant(2.0, 50, 0.0, 10.0)]);
        assert_eq!(out.len(), 100);
        assert!(out[..50].iter().all(|s| *s == 3.0));
        assert!(out[50..].iter().all(|s| *s == 1.0));
        let mut check = snd.clone();
        while !check.get_next().is_terminal() {}
        assert_eq!(check.logical_stop_cnt(), 100);
    }

    #[test]
    fn later_inputs_are_padded() {
        let (out, snd) = render(vec![constant(1.0, 10, 0.0, 10.0), constant(2.0, 10, 0.5, 10.0)]);
        assert_eq!(out, [vec![1.0; 5], vec![3.0; 5], vec![2.0; 5]].concat());
        assert_eq!(snd.t0(), 0.0);
    }

    #[test]
    fn slower_input_is_ramped() {
        let fast = constant(1.0, 100, 0.0, 100.0);
        let slow = constant(1.0, 50, 0.0, 50.0);
        let op = AddOp::new(vec![fast, slow], BlockPool::new()).unwrap();
        assert_eq!(op.code().to_string(), "nr");
        let (out, _) = render(vec![constant(1.0, 100, 0.0, 100.0), constant(1.0, 50, 0.0, 50.0)]);
        assert_eq!(out.len(), 100);
        assert!(out[..99].iter().all(|s| *s == 2.0));
        assert_eq!(out[99], 1.5);
    }

    #[test]
    fn scale_is_applied_per_input() {
        let quiet = constant(1.0, 10, 0.0, 10.0).scaled(0.5);
        let (out, _) = render(vec![quiet, constant(1.0, 10, 0.0, 10.0)]);
        assert_eq!(out, vec![1.5; 10]);
    }

    #[test]
    fn arity_is_checked() {
        let many = (0..9).map(|_| constant(0.0, 1, 0.0, 10.0)).collect();
        assert!(matches!(
            AddOp::new(many, BlockPool::new()),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(AddOp::new(Vec::new(), BlockPool::new()).is_err());
    }

    #[test]
    fn step_inputs_have_no_routine() {
        let err = ROUTINES[1].resolve(&[InterpClass::None, InterpClass::Step]);
        assert_eq!(
            err.err(),
            Some(EngineError::UnsupportedInterpolationCombination { arity: 2, code: 4 })
        );
    }

    #[test]
    fn print_tree_shows_inputs() {
        let op = AddOp::new(vec![constant(1.0, 1, 0.0, 1.0), constant(1.0, 1, 0.0, 1.0)], BlockPool::new());
        let snd = Sound::new(Box::new(op.unwrap()), 0.0, 1.0, 1.0);
        let text = snd.print_tree();
        assert!(text.contains("add nn"));
        assert_eq!(text.matches("const").count(), 2);
    }
}

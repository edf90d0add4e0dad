// Finite sources: a constant value or a fixed list of samples.

use crate::block::BlockPool;
use crate::config::{MAX_BLOCK_LEN, Sample};
use crate::operator::{Fetch, Operator, OperatorCore, TreePrinter};
use crate::stop::StopState;

enum Source {
    Value(Sample),
    Samples(Vec<Sample>),
}

/// Emits `len` samples, then terminates.
pub struct ConstOp {
    core: OperatorCore,
    stop: StopState,
    source: Source,
}

impl ConstOp {
    pub fn new(value: Sample, len: i64, t0: f64, sr: f64, pool: BlockPool) -> Self {
        log::debug!("const {} x {} at sr {}", value, len, sr);
        let mut stop = StopState::new();
        stop.terminate_cnt = len.max(0);
        Self {
            core: OperatorCore::new("const", t0, sr, pool),
            stop,
            source: Source::Value(value),
        }
    }

    /// Emits exactly `values`.
    pub fn from_samples(values: &[Sample], t0: f64, sr: f64, pool: BlockPool) -> Self {
        let mut op = Self::new(0.0, values.len() as i64, t0, sr, pool);
        op.source = Source::Samples(values.to_vec());
        op
    }

    /// Place the logical stop at sample `at`.
    pub fn with_logical_stop(mut self, at: i64) -> Self {
        self.core.log_stop_cnt = at.max(0);
        self
    }
}

impl Operator for ConstOp {
    fn core(&self) -> &OperatorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperatorCore {
        &mut self.core
    }

    fn fetch(&mut self) -> Fetch {
        let mut block = self.core.pool.alloc();
        let out = block.samples_mut();
        let mut cnt = 0;
        while cnt < MAX_BLOCK_LEN {
            let Some(togo) = self.stop.limit(&self.core, cnt, MAX_BLOCK_LEN - cnt) else {
                break;
            };
            let run = &mut out[cnt..cnt + togo];
            match &self.source {
                Source::Value(v) => run.fill(*v),
                Source::Samples(values) => {
                    let from = (self.core.current as usize) + cnt;
                    run.copy_from_slice(&values[from..from + togo]);
                }
            }
            cnt += togo;
        }
        self.stop.finish(&mut self.core, block, cnt)
    }

    fn print_tree(&self, printer: &mut TreePrinter) {
        let what = match &self.source {
            Source::Value(v) => format!("value {v}"),
            Source::Samples(values) => format!("{} samples", values.len()),
        };
        printer.line(format!(
            "const {} until {} (t0 {}, sr {})",
            what, self.stop.terminate_cnt, self.core.t0, self.core.sr
        ));
    }
}

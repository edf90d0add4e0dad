// src/operator.rs

use std::fmt::Write as _;

use crate::block::{BlockPool, BlockRef};
use crate::config::UNKNOWN;

/// State every operator carries, whatever it computes.
#[derive(Debug, Clone)]
pub struct OperatorCore {
    /// Name for debugging output.
    pub name: String,

    /// Return this many zeros, then compute.
    pub toss_cnt: i64,

    /// Index of the next output sample.
    pub current: i64,

    /// Output sample rate.
    pub sr: f64,

    /// Time of output sample 0.
    pub t0: f64,

    /// Logical stop, in output samples, or `UNKNOWN`.
    pub log_stop_cnt: i64,

    /// Where output blocks come from.
    pub pool: BlockPool,
}

impl OperatorCore {
    pub fn new(name: impl Into<String>, t0: f64, sr: f64, pool: BlockPool) -> Self {
        Self {
            name: name.into(),
            toss_cnt: 0,
            current: 0,
            sr,
            t0,
            log_stop_cnt: UNKNOWN,
            pool,
        }
    }

    pub fn with_toss(mut self, toss_cnt: i64) -> Self {
        self.toss_cnt = toss_cnt.max(0);
        self
    }
}

/// Outcome of one operator invocation.
#[derive(Debug)]
pub enum Fetch {
    /// A new block with `len` valid samples.
    Block {
        block: BlockRef,
        len: usize,
        logically_stopped: bool,
    },

    /// No more samples, ever.
    Terminated,
}

/// Opaque identity of a host-managed object held by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(pub u64);

/// Host garbage-collector hook. Operators report the host objects they keep
/// alive; marking never mutates the graph.
pub trait Marker {
    fn mark(&mut self, id: HostId);
}

impl Marker for Vec<HostId> {
    fn mark(&mut self, id: HostId) {
        self.push(id);
    }
}

/// Indented text sink for `print_tree`.
#[derive(Debug, Default)]
pub struct TreePrinter {
    out: String,
    depth: usize,
}

impl TreePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let _ = writeln!(self.out, "{:indent$}{}", "", text.as_ref(), indent = self.depth * 2);
    }

    /// Print children one level deeper.
    pub fn nest(&mut self, f: impl FnOnce(&mut Self)) {
        self.depth += 1;
        f(self);
        self.depth -= 1;
    }

    pub fn finish(self) -> String {
        self.out
    }
}

/// A lazy block producer.
///
/// The engine guarantees:
/// - `fetch` is called at most once per output block, whatever the fan-out
/// - `toss_cnt` leading zeros have already been emitted on the operator's
///   behalf before the first `fetch`
/// - after `Fetch::Terminated`, `free` is called and the operator is dropped
///
/// Inputs held by an operator must already be aligned to its `t0`.
pub trait Operator {
    fn core(&self) -> &OperatorCore;

    fn core_mut(&mut self) -> &mut OperatorCore;

    /// Compute the next block.
    fn fetch(&mut self) -> Fetch;

    /// Compute the next block for a reader that is looking ahead without
    /// consuming. Most operators don't care who is asking.
    fn keep_fetch(&mut self) -> Fetch {
        self.fetch()
    }

    /// Release resources ahead of drop.
    fn free(&mut self) {}

    /// Report host objects reachable from this operator.
    fn mark(&self, _marker: &mut dyn Marker) {}

    /// Debug dump.
    fn print_tree(&self, printer: &mut TreePrinter) {
        let core = self.core();
        printer.line(format!("{} (t0 {}, sr {})", core.name, core.t0, core.sr));
    }
}

// src/lib.rs
//
// Library entry point for Rust and FFI consumers.

mod block;
mod config;
mod diag;
mod error;
mod interp;
mod list;
mod operator;
mod registry;
mod sound;
mod stop;
mod table;
mod timing;

pub mod ffi;
pub mod ops;

#[cfg(test)]
mod test;

// Re-export key types for Rust consumers
pub use block::{BlockBuilder, BlockPool, BlockRef, PoolStats};
pub use config::{
    ANGLEBASE, EngineConfig, MAX_BLOCK_LEN, MAX_STOP, MAX_STOP_TIME, MIN_START_TIME, Sample,
    SCALE_FACTOR_TO_24BIT, SCALE_FACTOR_TO_BYTE, SCALE_FACTOR_TO_LONG, SCALE_FACTOR_TO_SHORT,
    UNKNOWN,
};
pub use diag::{BlockEvent, Diagnostics};
pub use error::{EngineError, EngineResult};
pub use interp::{
    INTERP_MASK, INTERP_SHIFT, InterpClass, InterpCode, MAX_ARITY, RoutineTable, interp_style,
    standard_combinations,
};
pub use list::{NodeView, SndList};
pub use operator::{Fetch, HostId, Marker, Operator, OperatorCore, TreePrinter};
pub use ops::register_standard_operators;
pub use registry::{OperatorArgs, OperatorFactory, OperatorRegistry, SimpleOperatorFactory};
pub use sound::{Chunk, GetNext, Sound};
pub use stop::{Input, LockStep, StopState, min_cnt, project_cnt};
pub use table::{SampleFormat, Table, TableRef};
pub use timing::{SortedPair, align_all, align_start, compute_phase, hz_to_step, sort_pair, step_to_hz};

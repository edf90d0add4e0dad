// src/ops/mod.rs
//
// Reference operators.

mod add;
mod constant;
mod osc;
mod prod;

pub use add::AddOp;
pub use constant::ConstOp;
pub use osc::{OscOp, Wavetable};
pub use prod::ProdOp;

use crate::block::BlockPool;
use crate::error::{EngineError, EngineResult};
use crate::operator::Operator;
use crate::registry::{OperatorArgs, OperatorRegistry, SimpleOperatorFactory};

// ═══════════════════════════════════════════════════════════════════
// Operator names
// ═══════════════════════════════════════════════════════════════════

pub mod names {
    pub const CONST: &str = "const";
    pub const OSC: &str = "osc";
    pub const ADD: &str = "add";
    pub const PROD: &str = "prod";
}

// ═══════════════════════════════════════════════════════════════════
// Registry Population
// ═══════════════════════════════════════════════════════════════════

/// Populate the registry with the reference operators.
///
/// - `const value len`: `len` samples of `value`
/// - `osc freq [phase]`: endless sine, phase in degrees
/// - `add` over 1 to 8 inputs
/// - `prod` over exactly 2 inputs
pub fn register_standard_operators(registry: &mut OperatorRegistry) {
    registry.register(names::CONST, SimpleOperatorFactory::new(make_const));
    registry.register(names::OSC, SimpleOperatorFactory::new(make_osc));
    registry.register(names::ADD, SimpleOperatorFactory::new(make_add));
    registry.register(names::PROD, SimpleOperatorFactory::new(make_prod));
}

fn make_const(args: OperatorArgs, pool: &BlockPool) -> EngineResult<Box<dyn Operator>> {
    let value = args.param(0, "value")?;
    let len = args.param(1, "len")?;
    if len < 0.0 {
        return Err(EngineError::InvalidArgument(format!("negative length {len}")));
    }
    let op = ConstOp::new(value as f32, len.round() as i64, args.t0, args.sr, pool.clone());
    Ok(Box::new(op))
}

fn make_osc(args: OperatorArgs, pool: &BlockPool) -> EngineResult<Box<dyn Operator>> {
    let freq = args.param(0, "freq")?;
    let phase = args.param_or(1, 0.0);
    Ok(Box::new(OscOp::sine(freq, phase, args.t0, args.sr, pool.clone())))
}

fn make_add(args: OperatorArgs, pool: &BlockPool) -> EngineResult<Box<dyn Operator>> {
    Ok(Box::new(AddOp::new(args.inputs, pool.clone())?))
}

fn make_prod(args: OperatorArgs, pool: &BlockPool) -> EngineResult<Box<dyn Operator>> {
    let mut inputs = args.inputs.into_iter();
    match (inputs.next(), inputs.next(), inputs.next()) {
        (Some(a), Some(b), None) => Ok(Box::new(ProdOp::new(a, b, pool.clone())?)),
        _ => Err(EngineError::InvalidArgument("prod takes exactly 2 inputs".into())),
    }
}

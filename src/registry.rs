// src/registry.rs

use std::collections::HashMap;

use crate::block::BlockPool;
use crate::error::{EngineError, EngineResult};
use crate::operator::Operator;
use crate::sound::Sound;

/// What a factory gets to build one operator.
#[derive(Clone)]
pub struct OperatorArgs {
    pub inputs: Vec<Sound>,
    pub params: Vec<f64>,
    pub t0: f64,
    pub sr: f64,
}

impl OperatorArgs {
    pub fn new(t0: f64, sr: f64) -> Self {
        Self {
            inputs: Vec::new(),
            params: Vec::new(),
            t0,
            sr,
        }
    }

    pub fn with_input(mut self, snd: Sound) -> Self {
        self.inputs.push(snd);
        self
    }

    pub fn with_param(mut self, value: f64) -> Self {
        self.params.push(value);
        self
    }

    /// Parameter `index`, required.
    pub fn param(&self, index: usize, name: &str) -> EngineResult<f64> {
        self.params
            .get(index)
            .copied()
            .ok_or_else(|| EngineError::InvalidArgument(format!("missing parameter {name}")))
    }

    pub fn param_or(&self, index: usize, default: f64) -> f64 {
        self.params.get(index).copied().unwrap_or(default)
    }
}

/// Builds operators of one kind.
pub trait OperatorFactory {
    fn create(&self, args: OperatorArgs, pool: &BlockPool) -> EngineResult<Box<dyn Operator>>;
}

/// Factory from a closure.
pub struct SimpleOperatorFactory<F>
where
    F: Fn(OperatorArgs, &BlockPool) -> EngineResult<Box<dyn Operator>>,
{
    create_fn: F,
}

impl<F> SimpleOperatorFactory<F>
where
    F: Fn(OperatorArgs, &BlockPool) -> EngineResult<Box<dyn Operator>>,
{
    pub fn new(create_fn: F) -> Self {
        Self { create_fn }
    }
}

impl<F> OperatorFactory for SimpleOperatorFactory<F>
where
    F: Fn(OperatorArgs, &BlockPool) -> EngineResult<Box<dyn Operator>>,
{
    fn create(&self, args: OperatorArgs, pool: &BlockPool) -> EngineResult<Box<dyn Operator>> {
        (self.create_fn)(args, pool)
    }
}

/// Operators by name. Every operator made here allocates from one pool.
pub struct OperatorRegistry {
    factories: HashMap<String, Box<dyn OperatorFactory>>,
    pool: BlockPool,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::with_pool(BlockPool::new())
    }

    pub fn with_pool(pool: BlockPool) -> Self {
        Self {
            factories: HashMap::new(),
            pool,
        }
    }

    /// Register a factory, replacing any previous one of the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: impl OperatorFactory + 'static) {
        let name = name.into();
        if self.factories.insert(name.clone(), Box::new(factory)).is_some() {
            log::warn!("operator {name} registered twice");
        }
    }

    pub fn get_factory(&self, name: &str) -> Option<&dyn OperatorFactory> {
        self.factories.get(name).map(|f| f.as_ref())
    }

    /// Build operator `name` and wrap it in a sound.
    pub fn make(&self, name: &str, args: OperatorArgs) -> EngineResult<Sound> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| EngineError::UnknownOperator(name.to_string()))?;
        let op = factory.create(args, &self.pool)?;
        let (t0, sr) = (op.core().t0, op.core().sr);
        Ok(Sound::new(op, t0, sr, 1.0))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn pool(&self) -> &BlockPool {
        &self.pool
    }
}

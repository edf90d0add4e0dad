// src/test.rs
//
// End-to-end tests across cursors, operators and the registry.

use std::cell::Cell;
use std::rc::Rc;

use oorandom::Rand32;

use crate::block::BlockPool;
use crate::config::{EngineConfig, MAX_BLOCK_LEN, MAX_STOP_TIME};
use crate::diag::{BlockEvent, Diagnostics};
use crate::error::EngineError;
use crate::operator::{Fetch, HostId, Operator, OperatorCore};
use crate::ops::{AddOp, ConstOp, OscOp, ProdOp, register_standard_operators};
use crate::registry::{OperatorArgs, OperatorRegistry};
use crate::sound::Sound;

pub const SAMPLE_RATE: f64 = 100.0;

/// Emits `blocks` full blocks of its fetch count and counts fetches.
struct Counting {
    core: OperatorCore,
    blocks: usize,
    fetches: Rc<Cell<usize>>,
}

impl Operator for Counting {
    fn core(&self) -> &OperatorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut OperatorCore {
        &mut self.core
    }

    fn fetch(&mut self) -> Fetch {
        if self.blocks == 0 {
            return Fetch::Terminated;
        }
        self.blocks -= 1;
        self.fetches.set(self.fetches.get() + 1);
        let mut block = self.core.pool.alloc();
        block.fill(self.fetches.get() as f32);
        self.core.current += MAX_BLOCK_LEN as i64;
        Fetch::Block {
            block: block.freeze(),
            len: MAX_BLOCK_LEN,
            logically_stopped: false,
        }
    }
}

fn counting(blocks: usize, pool: &BlockPool) -> (Sound, Rc<Cell<usize>>) {
    let fetches = Rc::new(Cell::new(0));
    let op = Counting {
        core: OperatorCore::new("counting", 0.0, SAMPLE_RATE, pool.clone()),
        blocks,
        fetches: Rc::clone(&fetches),
    };
    (Sound::new(Box::new(op), 0.0, SAMPLE_RATE, 1.0), fetches)
}

fn drain(snd: &mut Sound) -> Vec<f32> {
    let mut out = Vec::new();
    loop {
        let chunk = snd.get_next();
        if chunk.is_terminal() {
            return out;
        }
        out.extend(chunk.samples().iter().map(|s| s * snd.scale()));
    }
}

#[test]
fn every_block_is_computed_once() {
    let pool = BlockPool::new();
    let (snd, fetches) = counting(5, &pool);
    let mut cursors: Vec<Sound> = (0..4).map(|_| snd.clone()).collect();
    let outputs: Vec<Vec<f32>> = cursors.iter_mut().map(drain).collect();
    assert_eq!(fetches.get(), 5);
    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(outputs[0].len(), 5 * MAX_BLOCK_LEN);
    assert_eq!(outputs[0][MAX_BLOCK_LEN * 4], 5.0);
}

#[test]
fn copies_read_the_same_blocks() {
    let pool = BlockPool::new();
    let (mut a, _) = counting(3, &pool);
    a.get_next();
    let mut b = a.clone();
    let x = a.get_next();
    let y = b.get_next();
    assert!(x.block.same_block(&y.block));
    assert_eq!(pool.stats().allocated, 2);
}

#[test]
fn termination_is_idempotent_for_every_operator() {
    let pool = BlockPool::new();
    let sounds = vec![
        counting(1, &pool).0,
        Sound::new(Box::new(ConstOp::new(1.0, 7, 0.0, 10.0, pool.clone())), 0.0, 10.0, 1.0),
        Sound::new(
            Box::new(OscOp::sine(1.0, 0.0, 0.0, 10.0, pool.clone()).with_duration(3)),
            0.0,
            10.0,
            1.0,
        ),
        Sound::zero(0.0, 10.0),
    ];
    for mut snd in sounds {
        drain(&mut snd);
        for _ in 0..3 {
            let chunk = snd.get_next();
            assert!(chunk.is_terminal());
            assert_eq!(chunk.len, 0);
        }
    }
}

#[test]
fn refcounts_balance_under_random_use() {
    let pool = BlockPool::new();
    let mut rng = Rand32::new(0x5eed);
    {
        let (snd, _) = counting(12, &pool);
        let mut live: Vec<Sound> = vec![snd];
        for _ in 0..400 {
            match rng.rand_range(0..4) {
                0 if live.len() < 16 => {
                    let i = rng.rand_range(0..live.len() as u32) as usize;
                    live.push(live[i].clone());
                }
                1 if live.len() > 1 => {
                    let i = rng.rand_range(0..live.len() as u32) as usize;
                    live.swap_remove(i);
                }
                _ => {
                    let i = rng.rand_range(0..live.len() as u32) as usize;
                    live[i].get_next();
                }
            }
        }
        assert!(pool.stats().allocated <= 12);
    }
    let stats = pool.stats();
    assert_eq!(stats.live(), 0, "{stats:?}");
}

#[test]
fn constant_materializes_to_its_length() {
    let mut registry = OperatorRegistry::new();
    register_standard_operators(&mut registry);
    let mut snd = registry
        .make("const", OperatorArgs::new(0.0, SAMPLE_RATE).with_param(0.75).with_param(100.0))
        .unwrap();
    let table = snd.to_table(&EngineConfig::default()).unwrap();
    assert_eq!(table.length(), 100.0);
    assert!(table.samples().iter().all(|s| *s == 0.75));
}

#[test]
fn endless_oscillator_is_unbounded() {
    let mut registry = OperatorRegistry::new();
    register_standard_operators(&mut registry);
    let mut snd = registry
        .make("osc", OperatorArgs::new(0.0, 44100.0).with_param(440.0))
        .unwrap();
    let cfg = EngineConfig::default().with_table_stop_bound(10_000);
    assert_eq!(
        snd.to_table(&cfg).err(),
        Some(EngineError::UnboundedStream { bound: 10_000 })
    );

    // clipping makes it finite
    let mut clipped = snd.xform(44100.0, 0.0, 0.0, 0.1, 1.0);
    assert_eq!(clipped.to_table(&cfg).map(|t| t.length()), Ok(4410.0));
}

#[test]
fn xform_and_sref_share_computation() {
    let pool = BlockPool::new();
    let (snd, fetches) = counting(3, &pool);
    let late = snd.xform(SAMPLE_RATE, 0.0, 15.0, MAX_STOP_TIME, 2.0);
    let mut early = snd.clone();

    // the second block is entirely 2.0, scaled by 2
    let mut late_reader = late.clone();
    assert_eq!(late_reader.sref(15.5).unwrap(), 4.0);
    assert_eq!(early.sref(0.5).unwrap(), 1.0);
    assert_eq!(fetches.get(), 2);
    assert_eq!(late.length(i64::MAX), 3 * MAX_BLOCK_LEN as i64 - 1500);
}

#[test]
fn mixing_a_sound_with_itself() {
    let pool = BlockPool::new();
    let (snd, fetches) = counting(2, &pool);
    let op = AddOp::new(vec![snd.clone(), snd.scaled(-1.0)], pool.clone()).unwrap();
    let mut mix = Sound::new(Box::new(op), 0.0, SAMPLE_RATE, 1.0);
    let out = drain(&mut mix);
    assert_eq!(out.len(), 2 * MAX_BLOCK_LEN);
    assert!(out.iter().all(|s| *s == 0.0));
    assert_eq!(fetches.get(), 2);
}

#[test]
fn operators_accept_partly_read_inputs() {
    let pool = BlockPool::new();
    let (mut snd, fetches) = counting(3, &pool);
    snd.get_next();

    let op = AddOp::new(vec![snd.clone()], pool.clone()).unwrap();
    assert_eq!(op.core().t0, 10.2);
    let t0 = op.core().t0;
    let mut mix = Sound::new(Box::new(op), t0, SAMPLE_RATE, 1.0);
    let out = drain(&mut mix);
    assert_eq!(out.len(), 2 * MAX_BLOCK_LEN);
    assert_eq!(out[0], 2.0);

    let op = ProdOp::new(snd.clone(), snd.clone(), pool.clone()).unwrap();
    let t0 = op.core().t0;
    let mut prod = Sound::new(Box::new(op), t0, SAMPLE_RATE, 1.0);
    let out = drain(&mut prod);
    assert_eq!(out.len(), 2 * MAX_BLOCK_LEN);
    assert_eq!(out[MAX_BLOCK_LEN], 9.0);
    assert_eq!(fetches.get(), 3);

    // the caller's cursor is untouched
    assert_eq!(snd.get_next().samples()[0], 2.0);
}

#[test]
fn marking_reaches_nested_operators() {
    let pool = BlockPool::new();
    let osc = OscOp::sine(1.0, 0.0, 0.0, 10.0, pool.clone()).with_host_ref(HostId(7));
    let osc = Sound::new(Box::new(osc), 0.0, 10.0, 1.0);
    let konst = Sound::new(Box::new(ConstOp::new(1.0, 5, 0.0, 10.0, pool.clone())), 0.0, 10.0, 1.0);
    let op = AddOp::new(vec![konst, osc], pool).unwrap();
    let mut mix = Sound::new(Box::new(op), 0.0, 10.0, 1.0);

    let mut marked: Vec<HostId> = Vec::new();
    mix.mark(&mut marked);
    assert_eq!(marked, vec![HostId(7)]);

    // still reachable after part of the sound has been computed
    mix.get_next();
    marked.clear();
    mix.mark(&mut marked);
    assert_eq!(marked, vec![HostId(7)]);
}

#[test]
fn diagnostics_follow_a_watched_block() {
    let diag = Diagnostics::from_config(&EngineConfig::default());
    let pool = BlockPool::with_diagnostics(diag.clone());
    let (mut snd, _) = counting(2, &pool);
    let serial = snd.nth_block(0).unwrap_or_default();
    diag.block_watch(serial);
    assert_eq!(diag.watched(), vec![serial]);

    snd.get_next();
    snd.get_next();
    drop(snd);
    assert!(diag.watched().is_empty());
    assert!(diag.recent().contains(&BlockEvent::Freed(serial)));
    assert!(diag.recently_freed(serial));
}

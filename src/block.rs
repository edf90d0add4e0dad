// src/block.rs
//
// Sample blocks: the unit of sharing and allocation.
//
// A block is written exactly once through a uniquely owned `BlockBuilder`
// and frozen into a shared `BlockRef`. From then on it is immutable, which
// is what lets any number of list nodes and cursors hold it without copying.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use once_cell::sync::Lazy;

use crate::config::{MAX_BLOCK_LEN, Sample};
use crate::diag::{BlockEvent, Diagnostics};

const ZERO_SERIAL: u64 = 0;
const SILENT_SERIAL: u64 = 1;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(SILENT_SERIAL + 1);

/// The termination sentinel. Identity with this block, never its contents,
/// means "this sound has ended".
static ZERO_BLOCK: Lazy<BlockRef> = Lazy::new(|| BlockRef::singleton(ZERO_SERIAL));

/// All-zero block used for silence that is not termination (prepended or
/// tossed zeros, padding behind a terminated input).
static SILENT_BLOCK: Lazy<BlockRef> = Lazy::new(|| BlockRef::singleton(SILENT_SERIAL));

/// Fixed-capacity buffer of samples.
pub struct SampleBlock {
    serial: u64,
    samples: Box<[Sample]>,
    owner: Option<Arc<PoolShared>>,
}

impl SampleBlock {
    fn zeroed(serial: u64, owner: Option<Arc<PoolShared>>) -> Self {
        Self {
            serial,
            samples: vec![0.0; MAX_BLOCK_LEN].into_boxed_slice(),
            owner,
        }
    }
}

impl Drop for SampleBlock {
    fn drop(&mut self) {
        if let Some(owner) = &self.owner {
            owner.freed.fetch_add(1, Ordering::Relaxed);
            if let Some(diag) = &owner.diag {
                diag.record(BlockEvent::Freed(self.serial));
            }
        }
    }
}

/// Shared handle to an immutable sample block.
#[derive(Clone)]
pub struct BlockRef(Arc<SampleBlock>);

impl BlockRef {
    fn singleton(serial: u64) -> Self {
        Self(Arc::new(SampleBlock::zeroed(serial, None)))
    }

    /// The termination sentinel.
    #[inline]
    pub fn zero() -> Self {
        ZERO_BLOCK.clone()
    }

    /// Shared non-terminal silence.
    #[inline]
    pub fn silent() -> Self {
        SILENT_BLOCK.clone()
    }

    /// True if this is the termination sentinel.
    #[inline]
    pub fn is_zero(&self) -> bool {
        Arc::ptr_eq(&self.0, &ZERO_BLOCK.0)
    }

    /// True for either of the process-wide zero blocks.
    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.is_zero() || Arc::ptr_eq(&self.0, &SILENT_BLOCK.0)
    }

    /// Take another reference to the same block.
    #[inline]
    pub fn acquire(&self) -> Self {
        self.clone()
    }

    /// Give up this reference. The block is freed with its last reference;
    /// the singletons are never freed.
    #[inline]
    pub fn release(self) {
        drop(self)
    }

    /// Number of live handles to this block.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Identity for diagnostics.
    pub fn serial(&self) -> u64 {
        self.0.serial
    }

    /// All `MAX_BLOCK_LEN` samples. How many are valid is decided by
    /// whoever handed out the block.
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.0.samples
    }

    #[inline]
    pub fn same_block(&self, other: &BlockRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            write!(f, "BlockRef(zero)")
        } else {
            write!(f, "BlockRef(#{})", self.0.serial)
        }
    }
}

/// Uniquely owned block under construction.
pub struct BlockBuilder {
    block: SampleBlock,
}

impl BlockBuilder {
    #[inline]
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.block.samples
    }

    pub fn fill(&mut self, value: Sample) {
        self.block.samples.fill(value);
    }

    pub fn serial(&self) -> u64 {
        self.block.serial
    }

    /// Publish the block. It can no longer be written.
    pub fn freeze(self) -> BlockRef {
        BlockRef(Arc::new(self.block))
    }
}

#[derive(Debug, Default)]
struct PoolShared {
    allocated: AtomicUsize,
    freed: AtomicUsize,
    diag: Option<Diagnostics>,
}

/// Allocation counters for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub allocated: usize,
    pub freed: usize,
}

impl PoolStats {
    pub fn live(&self) -> usize {
        self.allocated.saturating_sub(self.freed)
    }
}

/// Source of fresh blocks. Cloning yields another handle to the same pool.
#[derive(Debug, Clone, Default)]
pub struct BlockPool(Arc<PoolShared>);

impl BlockPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_diagnostics(diag: Diagnostics) -> Self {
        Self(Arc::new(PoolShared {
            diag: Some(diag),
            ..Default::default()
        }))
    }

    /// Allocate a zero-filled block for writing.
    pub fn alloc(&self) -> BlockBuilder {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        self.0.allocated.fetch_add(1, Ordering::Relaxed);
        if let Some(diag) = &self.0.diag {
            diag.record(BlockEvent::Allocated(serial));
        }
        BlockBuilder {
            block: SampleBlock::zeroed(serial, Some(Arc::clone(&self.0))),
        }
    }

    /// Allocate and fill a block from `values` (truncated to one block).
    pub fn from_samples(&self, values: &[Sample]) -> BlockRef {
        let mut builder = self.alloc();
        let n = values.len().min(MAX_BLOCK_LEN);
        builder.samples_mut()[..n].copy_from_slice(&values[..n]);
        builder.freeze()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.0.allocated.load(Ordering::Relaxed),
            freed: self.0.freed.load(Ordering::Relaxed),
        }
    }

    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        self.0.diag.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_block_identity() {
        let a = BlockRef::zero();
        let b = BlockRef::zero();
        assert!(a.is_zero());
        assert!(a.same_block(&b));
        assert!(!BlockRef::silent().is_zero());

        // all zero contents are not termination
        let pool = BlockPool::new();
        let fresh = pool.alloc().freeze();
        assert!(fresh.samples().iter().all(|s| *s == 0.0));
        assert!(!fresh.is_zero());
    }

    #[test]
    fn releasing_singletons_is_harmless() {
        for _ in 0..4 {
            BlockRef::zero().acquire().release();
        }
        assert!(BlockRef::zero().refcount() >= 1);
        assert_eq!(BlockRef::zero().samples().len(), MAX_BLOCK_LEN);
    }

    #[test]
    fn last_release_frees_once() {
        let pool = BlockPool::new();
        let block = pool.from_samples(&[1.0, 2.0, 3.0]);
        let other = block.acquire();
        assert_eq!(block.refcount(), 2);
        block.release();
        assert_eq!(pool.stats().freed, 0);
        assert_eq!(other.samples()[1], 2.0);
        other.release();
        assert_eq!(pool.stats(), PoolStats { allocated: 1, freed: 1 });
    }

    #[test]
    fn unfrozen_builder_is_counted_as_freed() {
        let pool = BlockPool::new();
        drop(pool.alloc());
        assert_eq!(pool.stats().live(), 0);
    }

    #[test]
    fn pool_reports_to_diagnostics() {
        let diag = Diagnostics::new(8);
        let pool = BlockPool::with_diagnostics(diag.clone());
        let block = pool.alloc().freeze();
        let serial = block.serial();
        diag.block_watch(serial);
        block.release();
        assert_eq!(
            diag.recent(),
            vec![BlockEvent::Allocated(serial), BlockEvent::Freed(serial)]
        );
        assert!(diag.watched().is_empty());
    }
}

// src/diag.rs
//
// Optional block diagnostics.
//
// A host that wants to chase invalid block reuse attaches a `Diagnostics`
// handle to a `BlockPool`. Nothing on the evaluation path depends on it.

use std::sync::{Arc, RwLock};

use bounded_vec_deque::BoundedVecDeque;

use crate::config::EngineConfig;

/// What happened to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEvent {
    Allocated(u64),
    Freed(u64),
}

impl BlockEvent {
    pub fn serial(&self) -> u64 {
        match self {
            BlockEvent::Allocated(s) | BlockEvent::Freed(s) => *s,
        }
    }
}

#[derive(Debug)]
struct DiagState {
    recent: BoundedVecDeque<BlockEvent>,
    watched: Vec<u64>,
}

/// Shared diagnostics context: a bounded history of block events plus a set
/// of explicitly watched block serials.
#[derive(Debug, Clone)]
pub struct Diagnostics(Arc<RwLock<DiagState>>);

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(RwLock::new(DiagState {
            recent: BoundedVecDeque::new(capacity.max(1)),
            watched: Vec::new(),
        })))
    }

    /// Diagnostics sized by `config.watch_capacity`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.watch_capacity)
    }

    /// Start watching a block; its release will be logged.
    pub fn block_watch(&self, serial: u64) {
        if let Ok(mut state) = self.0.write() {
            if state.watched.len() < state.recent.max_len() && !state.watched.contains(&serial) {
                state.watched.push(serial);
            }
        }
    }

    pub(crate) fn record(&self, event: BlockEvent) {
        let Ok(mut state) = self.0.write() else {
            return;
        };
        if let BlockEvent::Freed(serial) = event {
            if let Some(i) = state.watched.iter().position(|s| *s == serial) {
                log::warn!("watched block {} was freed", serial);
                state.watched.swap_remove(i);
            }
        }
        state.recent.push_back(event);
    }

    /// Recorded events, oldest first.
    pub fn recent(&self) -> Vec<BlockEvent> {
        self.0
            .read()
            .map(|state| state.recent.iter().copied().collect())
            .unwrap_or_default()
    }

    /// True if the block was freed within the recorded window.
    pub fn recently_freed(&self, serial: u64) -> bool {
        self.recent().contains(&BlockEvent::Freed(serial))
    }

    pub fn watched(&self) -> Vec<u64> {
        self.0
            .read()
            .map(|state| state.watched.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded() {
        let diag = Diagnostics::new(3);
        for serial in 0..5 {
            diag.record(BlockEvent::Allocated(serial));
        }
        let recent = diag.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0], BlockEvent::Allocated(2));
    }

    #[test]
    fn watched_block_is_forgotten_after_free() {
        let diag = Diagnostics::new(8);
        diag.block_watch(7);
        diag.block_watch(7);
        assert_eq!(diag.watched(), vec![7]);
        diag.record(BlockEvent::Freed(7));
        assert!(diag.watched().is_empty());
        assert!(diag.recently_freed(7));
    }
}

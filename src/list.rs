// src/list.rs
//
// The lazy block list behind every sound.
//
// A `SndList` cell is either pending (it owns the operator that will compute
// its block), resolved (it holds its block and links to the next cell), or
// terminal. Resolution happens in place, at most once, by whichever cursor
// reaches the cell first; every other cursor sharing the cell then reads the
// cached block.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use crate::block::BlockRef;
use crate::config::MAX_BLOCK_LEN;
use crate::operator::{Fetch, Operator};

enum Resolution {
    Pending(Box<dyn Operator>),
    /// The operator is running; only observable through a cycle.
    Fetching,
    Resolved(SndList),
    Terminal,
}

struct ListCell {
    block: BlockRef,
    block_len: usize,
    logically_stopped: bool,
    state: Resolution,
}

impl ListCell {
    fn terminal() -> Self {
        Self {
            block: BlockRef::zero(),
            block_len: 0,
            logically_stopped: true,
            state: Resolution::Terminal,
        }
    }

    fn view(&self) -> NodeView {
        let next = match &self.state {
            Resolution::Resolved(next) => Some(next.clone()),
            _ => None,
        };
        NodeView {
            block: if next.is_some() { self.block.clone() } else { BlockRef::zero() },
            len: if next.is_some() { self.block_len } else { 0 },
            logically_stopped: self.logically_stopped,
            next,
        }
    }
}

impl Drop for ListCell {
    // Unlink iteratively so releasing a long chain can't exhaust the stack.
    fn drop(&mut self) {
        let mut next = match mem::replace(&mut self.state, Resolution::Terminal) {
            Resolution::Resolved(next) => next,
            Resolution::Pending(mut op) => {
                op.free();
                return;
            }
            _ => return,
        };
        while let Ok(cell) = Rc::try_unwrap(next.0) {
            let mut cell = cell.into_inner();
            next = match mem::replace(&mut cell.state, Resolution::Terminal) {
                Resolution::Resolved(next) => next,
                Resolution::Pending(mut op) => {
                    op.free();
                    return;
                }
                _ => return,
            };
        }
    }
}

/// Contents of a forced cell.
#[derive(Clone)]
pub struct NodeView {
    pub block: BlockRef,
    pub len: usize,
    pub logically_stopped: bool,
    /// `None` for the terminal cell.
    pub next: Option<SndList>,
}

/// Shared handle to a list cell.
#[derive(Clone)]
pub struct SndList(Rc<RefCell<ListCell>>);

impl SndList {
    /// A cell whose block `op` will compute.
    pub fn pending(op: Box<dyn Operator>) -> Self {
        Self(Rc::new(RefCell::new(ListCell {
            block: BlockRef::zero(),
            block_len: 0,
            logically_stopped: false,
            state: Resolution::Pending(op),
        })))
    }

    /// The end of a sound: the zero block, zero samples, forever.
    pub fn terminal() -> Self {
        Self(Rc::new(RefCell::new(ListCell::terminal())))
    }

    /// An already computed cell.
    pub fn resolved(block: BlockRef, len: usize, logically_stopped: bool, next: SndList) -> Self {
        Self(Rc::new(RefCell::new(ListCell {
            block,
            block_len: len.min(MAX_BLOCK_LEN),
            logically_stopped,
            state: Resolution::Resolved(next),
        })))
    }

    #[inline]
    pub fn acquire(&self) -> Self {
        self.clone()
    }

    #[inline]
    pub fn release(self) {
        drop(self)
    }

    pub fn refcount(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn same_node(&self, other: &SndList) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.0.borrow().state, Resolution::Pending(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.0.borrow().state, Resolution::Terminal)
    }

    /// Resolve the cell if needed and return its contents.
    ///
    /// `keep` selects the operator's `keep_fetch`, for readers that look at
    /// the block without consuming it.
    pub fn force(&self, keep: bool) -> NodeView {
        let state = mem::replace(&mut self.0.borrow_mut().state, Resolution::Fetching);
        let mut op = match state {
            Resolution::Pending(op) => op,
            Resolution::Fetching => {
                log::error!("list cell re-entered while its operator is running");
                return ListCell::terminal().view();
            }
            other => {
                let mut cell = self.0.borrow_mut();
                cell.state = other;
                return cell.view();
            }
        };

        let result = drive(op.as_mut(), keep);

        match result {
            Fetch::Block {
                block,
                len,
                logically_stopped,
            } if len > 0 => {
                let mut cell = self.0.borrow_mut();
                cell.block = block;
                cell.block_len = len.min(MAX_BLOCK_LEN);
                cell.logically_stopped = logically_stopped;
                cell.state = Resolution::Resolved(SndList::pending(op));
                cell.view()
            }
            _ => {
                log::trace!("{} terminated at sample {}", op.core().name, op.core().current);
                let view = {
                    let mut cell = self.0.borrow_mut();
                    *cell = ListCell::terminal();
                    cell.view()
                };
                op.free();
                view
            }
        }
    }

    /// Walk resolved cells to the pending one and visit its operator.
    ///
    /// Borrows only; nothing is computed.
    pub fn visit_operator<R>(&self, f: impl FnOnce(&dyn Operator) -> R) -> Option<R> {
        let mut node = self.clone();
        loop {
            let next = {
                let cell = node.0.borrow();
                match &cell.state {
                    Resolution::Resolved(next) => next.clone(),
                    Resolution::Pending(op) => return Some(f(op.as_ref())),
                    _ => return None,
                }
            };
            node = next;
        }
    }
}

/// Emit tossed zeros, then hand over to the operator.
fn drive(op: &mut dyn Operator, keep: bool) -> Fetch {
    let core = op.core_mut();
    if core.toss_cnt > 0 {
        let n = core.toss_cnt.min(MAX_BLOCK_LEN as i64);
        core.toss_cnt -= n;
        core.current += n;
        return Fetch::Block {
            block: BlockRef::silent(),
            len: n as usize,
            logically_stopped: false,
        };
    }
    if keep { op.keep_fetch() } else { op.fetch() }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::block::BlockPool;
    use crate::operator::OperatorCore;

    struct Counter {
        core: OperatorCore,
        blocks: usize,
        fetches: Rc<Cell<usize>>,
        freed: Rc<Cell<bool>>,
    }

    impl Operator for Counter {
        fn core(&self) -> &OperatorCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut OperatorCore {
            &mut self.core
        }

        fn fetch(&mut self) -> Fetch {
            self.fetches.set(self.fetches.get() + 1);
            if self.blocks == 0 {
                return Fetch::Terminated;
            }
            self.blocks -= 1;
            let mut block = self.core.pool.alloc();
            block.fill(self.fetches.get() as f32);
            self.core.current += 10;
            Fetch::Block {
                block: block.freeze(),
                len: 10,
                logically_stopped: false,
            }
        }

        fn free(&mut self) {
            self.freed.set(true);
        }
    }

    fn counter(blocks: usize) -> (SndList, Rc<Cell<usize>>, Rc<Cell<bool>>) {
        let fetches = Rc::new(Cell::new(0));
        let freed = Rc::new(Cell::new(false));
        let op = Counter {
            core: OperatorCore::new("counter", 0.0, 100.0, BlockPool::new()),
            blocks,
            fetches: Rc::clone(&fetches),
            freed: Rc::clone(&freed),
        };
        (SndList::pending(Box::new(op)), fetches, freed)
    }

    #[test]
    fn forcing_twice_runs_the_operator_once() {
        let (list, fetches, _) = counter(3);
        let a = list.force(false);
        let b = list.force(true);
        assert_eq!(fetches.get(), 1);
        assert!(a.block.same_block(&b.block));
        assert!(a.next.as_ref().is_some_and(|n| n.is_pending()));
    }

    #[test]
    fn exhausted_operator_is_freed_and_cell_is_terminal() {
        let (list, _, freed) = counter(1);
        let first = list.force(false);
        let second = first.next.clone().map(|n| n.force(false));
        let second = second.map(|v| (v.block.is_zero(), v.len, v.next.is_none()));
        assert_eq!(second, Some((true, 0, true)));
        assert!(freed.get());
    }

    #[test]
    fn toss_count_emits_silence_first() {
        let fetches = Rc::new(Cell::new(0));
        let op = Counter {
            core: OperatorCore::new("counter", 0.0, 100.0, BlockPool::new()).with_toss(1500),
            blocks: 1,
            fetches: Rc::clone(&fetches),
            freed: Rc::new(Cell::new(false)),
        };
        let list = SndList::pending(Box::new(op));
        let first = list.force(false);
        assert_eq!(first.len, MAX_BLOCK_LEN);
        assert!(!first.block.is_zero());
        let second = first.next.map(|n| n.force(false));
        assert_eq!(second.map(|v| v.len), Some(1500 - MAX_BLOCK_LEN));
        assert_eq!(fetches.get(), 0);
    }

    #[test]
    fn dropping_a_long_chain_does_not_recurse() {
        let pool = BlockPool::new();
        let block = pool.alloc().freeze();
        let mut head = SndList::terminal();
        for _ in 0..200_000 {
            head = SndList::resolved(block.clone(), 1, false, head);
        }
        drop(head);
        assert_eq!(block.refcount(), 1);
    }

    #[test]
    fn unread_pending_cell_frees_its_operator() {
        let (list, fetches, freed) = counter(2);
        drop(list);
        assert_eq!(fetches.get(), 0);
        assert!(freed.get());
    }
}

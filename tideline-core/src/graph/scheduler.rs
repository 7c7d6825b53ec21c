//! Batch Scheduler
//!
//! The scheduler collects nodes whose value changed and triggers each of them
//! exactly once when the outermost batch ends.
//!
//! # Algorithm
//!
//! 1. `batch()` pushes a frame. Nested calls push further frames and run
//!    inline; only the root frame flushes.
//! 2. Every write marks its sinks dirty right away and enqueues itself.
//! 3. At flush, pending nodes trigger in insertion order. A source notifies
//!    its subscribers, then enqueues its sinks at the back of the queue, so a
//!    sink runs after every source enqueued before it has settled.
//! 4. Nodes enqueued during the flush (by callbacks that write, or by sink
//!    fan-out) are flushed in the same pass. A node already in the queue is
//!    not added again, which caps every node at one trigger per batch.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

use super::node::{AnyNode, NodeId};
use crate::error::GraphError;

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

#[derive(Default)]
struct BatchState {
    /// Number of open `batch()` frames.
    depth: usize,

    /// Counts root frames, so a flag raised in one batch is not mistaken
    /// for one raised in a later batch.
    epoch: u64,

    /// Nodes waiting to trigger, in the order they were first enqueued.
    pending: IndexMap<NodeId, Rc<dyn AnyNode>>,
}

/// Pops a batch frame on drop, including during unwinding. The root frame
/// also discards whatever is still pending.
struct FrameGuard;

impl FrameGuard {
    fn enter() -> (Self, bool) {
        let is_root = BATCH.with(|state| {
            let mut state = state.borrow_mut();
            state.depth += 1;
            if state.depth == 1 {
                state.epoch = state.epoch.wrapping_add(1);
            }
            state.depth == 1
        });
        (Self, is_root)
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        BATCH.with(|state| {
            let mut state = state.borrow_mut();
            state.depth = state.depth.saturating_sub(1);
            if state.depth == 0 {
                state.pending.clear();
            }
        });
    }
}

/// Run `f` with notifications deferred until the outermost batch returns.
///
/// All writes inside `f` take effect immediately; subscribers and derived
/// signals observe them once, after `f` completes.
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tideline_core::reactive::{batch, Signal};
///
/// let count = Signal::new(0);
/// let calls = Rc::new(Cell::new(0));
/// let calls_clone = calls.clone();
/// let _sub = count.subscribe(move || calls_clone.set(calls_clone.get() + 1));
///
/// batch(|| {
///     count.set(1);
///     count.set(2);
///     count.set(3);
/// });
/// assert_eq!(calls.get(), 1);
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let (_frame, is_root) = FrameGuard::enter();
    let result = f();
    if is_root {
        flush();
    }
    result
}

/// Check whether a batch is currently open on this thread.
pub fn is_batching() -> bool {
    BATCH.with(|state| state.borrow().depth > 0)
}

/// Identify the open batch, if any.
///
/// Every root `batch()` call gets a fresh value; nested frames share their
/// root's.
pub(crate) fn current_batch() -> Option<u64> {
    BATCH.with(|state| {
        let state = state.borrow();
        (state.depth > 0).then_some(state.epoch)
    })
}

/// Queue `node` for the current flush.
pub(crate) fn try_enqueue(node: Rc<dyn AnyNode>) -> Result<(), GraphError> {
    BATCH.with(|state| {
        let mut state = state.borrow_mut();
        if state.depth == 0 {
            return Err(GraphError::NoActiveBatch);
        }
        let id = node.core().id();
        state.pending.entry(id).or_insert(node);
        Ok(())
    })
}

/// Queue `node` for the current flush, panicking outside of a batch.
pub(crate) fn enqueue(node: Rc<dyn AnyNode>) {
    if let Err(err) = try_enqueue(node) {
        panic!("{err}");
    }
}

fn flush() {
    let mut index = 0;
    loop {
        // Never hold the borrow while a node runs user code.
        let next = BATCH.with(|state| state.borrow().pending.get_index(index).map(|(_, node)| node.clone()));
        let Some(node) = next else { break };
        node.trigger();
        index += 1;
    }
    trace!(triggered = index, "batch flushed");
}

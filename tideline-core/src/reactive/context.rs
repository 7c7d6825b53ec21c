//! Reactive Context
//!
//! The reactive context records which nodes a computation reads. Derived
//! signals use it to rebuild their dependency set on every evaluation.
//!
//! # Implementation
//!
//! We use a thread-local stack. Evaluating a derived signal pushes a frame;
//! every `get()` performed while the frame is on top is recorded into it;
//! finishing the frame hands back the recorded reads.
//!
//! This design supports nested contexts (a derived signal that reads another
//! derived signal evaluates the inner one in its own frame).

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::graph::{AnyNode, NodeId};

/// Nodes read during one evaluation, in first-read order.
pub(crate) type Reads = IndexMap<NodeId, Rc<dyn AnyNode>>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The node being evaluated, or `None` for an untracked scope.
    node_id: Option<NodeId>,
    /// Nodes read so far.
    reads: Reads,
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation panics.
pub(crate) struct ReactiveContext {
    node_id: Option<NodeId>,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new context on behalf of `node_id`.
    pub(crate) fn enter(node_id: Option<NodeId>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                node_id,
                reads: IndexMap::new(),
            });
        });

        Self {
            node_id,
            finished: false,
        }
    }

    /// Check if there is an active reactive context.
    pub(crate) fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// The node currently being evaluated, if any.
    pub(crate) fn current_node() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.node_id))
    }

    /// Record a read of `node` in the innermost context.
    pub(crate) fn track_read(node: Rc<dyn AnyNode>) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                let id = node.core().id();
                entry.reads.entry(id).or_insert(node);
            }
        });
    }

    /// Leave the context and return what was read.
    pub(crate) fn finish(mut self) -> Reads {
        self.finished = true;
        self.pop()
    }

    fn pop(&self) -> Reads {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            match popped {
                Some(entry) => {
                    debug_assert_eq!(
                        entry.node_id, self.node_id,
                        "ReactiveContext mismatch: expected {:?}, got {:?}",
                        self.node_id, entry.node_id
                    );
                    entry.reads
                }
                None => IndexMap::new(),
            }
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Run `f` without recording any reads into the enclosing computation.
///
/// A derived signal that peeks at a value through `untracked` will not be
/// re-evaluated when that value changes.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter(None);
    f()
}

/// Check whether reads are currently being recorded.
pub fn is_tracking() -> bool {
    ReactiveContext::current_node().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeCore, NodeKind};

    struct Leaf(NodeCore);

    impl AnyNode for Leaf {
        fn core(&self) -> &NodeCore {
            &self.0
        }
    }

    fn leaf() -> Rc<dyn AnyNode> {
        Rc::new(Leaf(NodeCore::new(NodeKind::Source)))
    }

    #[test]
    fn context_tracks_node() {
        let id = NodeId::new();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_node().is_none());

        {
            let _ctx = ReactiveContext::enter(Some(id));

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_node(), Some(id));
            assert!(is_tracking());
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
        assert!(!is_tracking());
    }

    #[test]
    fn context_collects_reads_once_each() {
        let a = leaf();
        let b = leaf();

        let ctx = ReactiveContext::enter(Some(NodeId::new()));
        ReactiveContext::track_read(a.clone());
        ReactiveContext::track_read(b.clone());
        ReactiveContext::track_read(a.clone());
        let reads = ctx.finish();

        let ids: Vec<NodeId> = reads.keys().copied().collect();
        assert_eq!(ids, vec![a.core().id(), b.core().id()]);
        assert!(!ReactiveContext::is_active());
    }

    #[test]
    fn nested_contexts_keep_reads_apart() {
        let outer_read = leaf();
        let inner_read = leaf();

        let outer = ReactiveContext::enter(Some(NodeId::new()));
        ReactiveContext::track_read(outer_read.clone());

        {
            let inner = ReactiveContext::enter(Some(NodeId::new()));
            ReactiveContext::track_read(inner_read.clone());
            let reads = inner.finish();
            assert_eq!(reads.len(), 1);
            assert!(reads.contains_key(&inner_read.core().id()));
        }

        let reads = outer.finish();
        assert_eq!(reads.len(), 1);
        assert!(reads.contains_key(&outer_read.core().id()));
    }

    #[test]
    fn untracked_scope_swallows_reads() {
        let hidden = leaf();

        let ctx = ReactiveContext::enter(Some(NodeId::new()));
        untracked(|| {
            assert!(!is_tracking());
            ReactiveContext::track_read(hidden.clone());
        });
        assert!(ctx.finish().is_empty());
    }
}

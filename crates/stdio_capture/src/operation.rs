use std::cell::RefCell;
use std::marker::PhantomData;

use serde::Serialize;

/// Opaque identifier of the logical operation running on a thread.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Looks up the operation active on the calling thread.
///
/// Queried once per emitted line; implementations must not cache across calls.
pub trait OperationIdRegistry: Send + Sync + 'static {
    fn current_operation_id(&self) -> Option<OperationId>;
}

thread_local! {
    static OPERATION_STACK: RefCell<Vec<OperationId>> = const { RefCell::new(Vec::new()) };
}

/// Registry backed by a per-thread stack of entered [`OperationScope`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadOperationRegistry;

impl ThreadOperationRegistry {
    pub fn enter(id: OperationId) -> OperationScope {
        OPERATION_STACK.with(|stack| stack.borrow_mut().push(id));
        OperationScope {
            id,
            _not_send: PhantomData,
        }
    }

    pub fn current() -> Option<OperationId> {
        OPERATION_STACK.with(|stack| stack.borrow().last().copied())
    }
}

impl OperationIdRegistry for ThreadOperationRegistry {
    fn current_operation_id(&self) -> Option<OperationId> {
        Self::current()
    }
}

/// Marks `id` as the current operation until dropped.
///
/// Scopes must be dropped on the thread that entered them, innermost first.
#[must_use = "the operation is only current while the scope is alive"]
#[derive(Debug)]
pub struct OperationScope {
    id: OperationId,
    _not_send: PhantomData<*const ()>,
}

impl OperationScope {
    pub fn id(&self) -> OperationId {
        self.id
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        OPERATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|entry| *entry == self.id) {
                stack.remove(pos);
            }
        });
    }
}

/// Registry for hosts without operation tracking.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOperations;

impl OperationIdRegistry for NoOperations {
    fn current_operation_id(&self) -> Option<OperationId> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scopes_unwind_to_outer_operation() {
        assert_eq!(ThreadOperationRegistry::current(), None);
        let outer = ThreadOperationRegistry::enter(OperationId::new(1));
        {
            let inner = ThreadOperationRegistry::enter(OperationId::new(2));
            assert_eq!(inner.id().get(), 2);
            assert_eq!(
                ThreadOperationRegistry.current_operation_id(),
                Some(OperationId::new(2))
            );
        }
        assert_eq!(ThreadOperationRegistry::current(), Some(outer.id()));
        drop(outer);
        assert_eq!(ThreadOperationRegistry::current(), None);
    }

    #[test]
    fn scopes_are_isolated_per_thread() {
        let _scope = ThreadOperationRegistry::enter(OperationId::new(9));
        let other = std::thread::spawn(ThreadOperationRegistry::current)
            .join()
            .unwrap();
        assert_eq!(other, None);
        assert_eq!(ThreadOperationRegistry::current(), Some(OperationId::new(9)));
    }
}

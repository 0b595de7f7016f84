// Per-category re-entrancy guard.
// --------------------------------
//   • One thread-local stack of the function categories currently being
//     served by the overlay on this thread.
//   • `enter` refuses a category that is already on the stack.
//   • The entry is popped automatically with RAII (`Drop`).
//
// A refused entry means the overlay itself caused the nested call (e.g. the
// live adapter opening a real key while serving an open), so the caller must
// go straight to the native function.

use std::cell::RefCell;
use std::marker::PhantomData;

/// Groups of intercepted registry functions that share one barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCategory {
    OpenCreate,
    Query,
    Set,
    Delete,
    Enumerate,
    Security,
    Flush,
    Close,
}

thread_local! {
    static ACTIVE: RefCell<Vec<FunctionCategory>> = const { RefCell::new(Vec::new()) };
}

/// RAII object returned by [`CallGuard::enter`]. Not `Send`: it must be
/// dropped on the thread that entered.
pub struct CallGuard {
    category: FunctionCategory,
    _not_send: PhantomData<*const ()>,
}

impl CallGuard {
    /// Try to enter the overlay for `category`.
    ///
    /// Returns `Some(CallGuard)` on first entry, or `None` if this thread is
    /// already inside an overlay call of the same category.
    #[inline]
    pub fn enter(category: FunctionCategory) -> Option<Self> {
        ACTIVE.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&category) {
                return None;
            }
            stack.push(category);
            Some(Self {
                category,
                _not_send: PhantomData,
            })
        })
    }

    /// True while an overlay call of `category` is active on this thread.
    pub fn is_active(category: FunctionCategory) -> bool {
        ACTIVE.with(|stack| stack.borrow().contains(&category))
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            let mut stack = stack.borrow_mut();
            // Guards drop in LIFO order, so this is normally the last entry.
            if let Some(pos) = stack.iter().rposition(|c| *c == self.category) {
                stack.remove(pos);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_category_is_refused_until_dropped() {
        let outer = CallGuard::enter(FunctionCategory::OpenCreate).expect("first entry");
        assert!(CallGuard::enter(FunctionCategory::OpenCreate).is_none());
        let other = CallGuard::enter(FunctionCategory::Query).expect("other category");
        assert!(CallGuard::is_active(FunctionCategory::Query));
        drop(other);
        drop(outer);
        assert!(!CallGuard::is_active(FunctionCategory::OpenCreate));
        assert!(CallGuard::enter(FunctionCategory::OpenCreate).is_some());
    }

    #[test]
    fn stacks_are_per_thread() {
        let _held = CallGuard::enter(FunctionCategory::Set).expect("entry");
        let entered_elsewhere = std::thread::spawn(|| CallGuard::enter(FunctionCategory::Set).is_some())
            .join()
            .expect("thread");
        assert!(entered_elsewhere);
    }
}

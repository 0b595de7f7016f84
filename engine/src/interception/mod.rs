//! Contract with the layer that intercepts registry calls.
//!
//! The interceptor routes each hooked function through [`dispatch`]: the
//! overlay serves the call unless the same category is already being served
//! further up this thread's stack, in which case the native function runs.

mod call_guard;

pub use call_guard::{CallGuard, FunctionCategory};

use log::trace;

/// Runs `overlay` under the barrier for `category`, or `native` when the
/// barrier is already held by this thread.
pub fn dispatch<R>(
    category: FunctionCategory,
    overlay: impl FnOnce() -> R,
    native: impl FnOnce() -> R,
) -> R {
    match CallGuard::enter(category) {
        Some(_guard) => overlay(),
        None => {
            trace!("nested {category:?} call goes to the native registry");
            native()
        }
    }
}

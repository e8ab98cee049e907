//! Shared thread pool for parallel permutation trials.
//!
//! Each trial shuffles, convolves, and refits on full-length recordings,
//! which can recurse deep into LAPACK wrappers; the pool uses a larger
//! stack than rayon's default to keep long recordings safe.

#[cfg(feature = "parallel")]
use rayon::ThreadPool;

#[cfg(feature = "parallel")]
use std::sync::OnceLock;

#[cfg(feature = "parallel")]
static THREAD_POOL: OnceLock<ThreadPool> = OnceLock::new();

/// Get or initialize the shared thread pool.
///
/// Configured with 8 MB stacks and one thread per logical CPU.
#[cfg(feature = "parallel")]
pub fn get_thread_pool() -> &'static ThreadPool {
    THREAD_POOL.get_or_init(|| {
        rayon::ThreadPoolBuilder::new()
            .stack_size(8 * 1024 * 1024)
            .build()
            .expect("Failed to build permutation thread pool")
    })
}

/// Execute an operation inside the shared thread pool.
#[cfg(feature = "parallel")]
pub fn install<OP, R>(op: OP) -> R
where
    OP: FnOnce() -> R + Send,
    R: Send,
{
    get_thread_pool().install(op)
}

/// Without the `parallel` feature the operation runs on the caller's thread.
#[cfg(not(feature = "parallel"))]
pub fn install<OP, R>(op: OP) -> R
where
    OP: FnOnce() -> R,
{
    op()
}

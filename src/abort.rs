//! Cooperative cancellation shared by the cache build, merge strategies and workers.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A cloneable flag that any thread can raise to stop a clustering run.
///
/// Long loops poll [`is_raised`](AbortSignal::is_raised) between pair
/// computations and between merge steps. Raising is irreversible.
///
/// ```rust
/// use trajclust::AbortSignal;
///
/// let signal = AbortSignal::new();
/// let handle = signal.clone();
/// handle.raise();
/// assert!(signal.is_raised());
/// ```
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

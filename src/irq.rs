//! # Pending Interrupt Flag
//!
//! The only channel from interrupt context to driver code. The Hal invokes a handler
//! produced by [`InterruptFlag::handler`], which sets the flag and nothing else; the
//! driver's polling code observes and clears it with [`InterruptFlag::take`].
//!
//! ```rust
//! use radiophy_rs::irq::InterruptFlag;
//!
//! let flag = InterruptFlag::new();
//! let mut handler = flag.handler();
//! handler(); // what the Hal does on the configured edge
//! assert!(flag.take());
//! assert!(!flag.is_set());
//! ```

use crate::hal::InterruptHandler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-bit event flag shared between an interrupt handler and its driver
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    inner: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the event as pending. Safe from interrupt context.
    pub fn set(&self) {
        self.inner.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was pending.
    pub fn take(&self) -> bool {
        self.inner.swap(false, Ordering::AcqRel)
    }

    pub fn clear(&self) {
        self.inner.store(false, Ordering::Release);
    }

    /// A handler bound to this flag's storage.
    pub fn handler(&self) -> InterruptHandler {
        let flag = self.clone();
        Box::new(move || flag.set())
    }

    /// A handler that sets this flag and then notifies `action`.
    ///
    /// `action` runs in interrupt context too and is held to the same constraints.
    pub fn handler_with<F>(&self, mut action: F) -> InterruptHandler
    where
        F: FnMut() + Send + 'static,
    {
        let flag = self.clone();
        Box::new(move || {
            flag.set();
            action();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_flag_set_from_another_thread() {
        let flag = InterruptFlag::new();
        let mut handler = flag.handler();
        std::thread::spawn(move || handler())
            .join()
            .expect("handler thread panicked");
        assert!(flag.take());
        assert!(!flag.take());
    }

    #[test]
    fn test_handler_with_action() {
        let flag = InterruptFlag::new();
        let count = Arc::new(AtomicU32::new(0));
        let seen = count.clone();
        let mut handler = flag.handler_with(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        handler();
        handler();
        assert!(flag.is_set());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        flag.clear();
        assert!(!flag.is_set());
    }
}

//! Gradient-tracking mode
//!
//! Validation and test passes run with tracking switched off so no backward
//! graph is recorded. The flag is thread-local: prefetch workers never build
//! graphs, and each data-parallel rank controls its own thread.

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether operations on this thread currently record backward ops
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(Cell::get)
}

/// Restores the previous tracking mode when dropped
#[must_use = "gradient tracking is re-enabled as soon as the guard is dropped"]
pub struct NoGradGuard {
    previous: bool,
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        GRAD_ENABLED.with(|flag| flag.set(self.previous));
    }
}

/// Disable gradient tracking until the returned guard goes out of scope
pub fn no_grad() -> NoGradGuard {
    let previous = GRAD_ENABLED.with(|flag| flag.replace(false));
    NoGradGuard { previous }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_grad_guard_restores_mode() {
        assert!(is_grad_enabled());
        {
            let _guard = no_grad();
            assert!(!is_grad_enabled());
            {
                let _inner = no_grad();
                assert!(!is_grad_enabled());
            }
            assert!(!is_grad_enabled());
        }
        assert!(is_grad_enabled());
    }
}

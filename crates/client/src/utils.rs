//! Utility macros and functions shared across the crate.

use std::time::{SystemTime, UNIX_EPOCH};

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// It's useful for validation checks where you want to return early with an error
/// if some condition is not satisfied.
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Returns the current wall-clock time in milliseconds since the unix epoch.
///
/// Used for the request timing counters; a clock before the epoch reports `0`.
pub(crate) fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_is_monotonic_enough() {
        let a = current_time_millis();
        let b = current_time_millis();
        assert!(a > 0);
        assert!(b >= a);
    }
}

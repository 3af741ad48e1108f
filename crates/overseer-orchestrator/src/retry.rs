use rand::Rng;

/// Backoff before retry `attempt`: `base_ms * 2^attempt` plus a uniform
/// jitter in `0..=jitter_ms`. Saturates instead of overflowing.
pub fn compute_backoff(base_ms: u64, jitter_ms: u64, attempt: u32) -> u64 {
    let delay = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_ms)
    };
    delay.saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_without_jitter() {
        assert_eq!(compute_backoff(1000, 0, 1), 2000);
        assert_eq!(compute_backoff(1000, 0, 2), 4000);
        assert_eq!(compute_backoff(1000, 0, 3), 8000);
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        for _ in 0..100 {
            let delay = compute_backoff(1000, 500, 1);
            assert!((2000..=2500).contains(&delay));
        }
    }

    #[test]
    fn test_backoff_strictly_increasing_across_attempts() {
        // base * 2 exceeds the jitter, so successive attempts never overlap.
        let mut last = 0;
        for attempt in 1..=3 {
            let delay = compute_backoff(1000, 500, attempt);
            assert!(delay > last);
            last = delay;
        }
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(compute_backoff(u64::MAX, 0, 10), u64::MAX);
        assert_eq!(compute_backoff(1000, 10, 80), u64::MAX);
    }
}

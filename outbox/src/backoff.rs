//! Retry delay schedule

use chrono::Duration;
use rand::Rng;

use stock_core::config::OutboxConfig;

/// Delay before the next claim after `attempts` claims have failed.
///
/// Doubles from the base, saturates at the cap, then spreads the result
/// by the jitter fraction so retries of one bad batch do not line up.
pub fn retry_delay(config: &OutboxConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(20);
    let raw = config.backoff_base_s.saturating_mul(1u64 << exponent);
    let capped = raw.min(config.backoff_cap_s) as f64;

    let factor = if config.jitter_fraction > 0.0 {
        let spread = config.jitter_fraction;
        1.0 + rand::thread_rng().gen_range(-spread..=spread)
    } else {
        1.0
    };

    Duration::milliseconds((capped * factor * 1000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_s: u64, cap_s: u64, jitter: f64) -> OutboxConfig {
        OutboxConfig {
            backoff_base_s: base_s,
            backoff_cap_s: cap_s,
            jitter_fraction: jitter,
            ..OutboxConfig::default()
        }
    }

    #[test]
    fn test_doubles_from_base_to_cap() {
        let config = config(5, 600, 0.0);
        let expected_s = [5, 10, 20, 40, 80, 160, 320, 600, 600, 600];

        for (attempts, expected) in (1u32..).zip(expected_s) {
            let delay = retry_delay(&config, attempts);
            assert_eq!(delay, Duration::seconds(expected), "attempt {}", attempts);
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = config(5, 600, 0.2);

        for _ in 0..50 {
            let ms = retry_delay(&config, 1).num_milliseconds();
            assert!((4000..=6000).contains(&ms), "delay out of bounds: {}ms", ms);
        }
    }

    #[test]
    fn test_zero_base_is_immediate() {
        let config = config(0, 600, 0.0);
        assert_eq!(retry_delay(&config, 3), Duration::zero());
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        let config = config(5, 600, 0.0);
        assert_eq!(retry_delay(&config, 0), Duration::seconds(5));
    }
}

//! Latency statistics used by round reports.

use std::time::Duration;

use crate::decimal::round_half_even;

/// The middle 90% of an ascending sample set: indices `[n*5/100, n*95/100)`.
pub fn trimmed_window(sorted: &[Duration]) -> &[Duration] {
    let n = sorted.len();
    let from = n * 5 / 100;
    let to = (n * 95 / 100).max(from);
    &sorted[from..to]
}

/// Mean and population standard deviation of the 90% trimmed window.
///
/// Small sets whose window is empty (a single sample) use every sample instead.
pub fn trimmed_mean_std(sorted: &[Duration]) -> (Duration, Duration) {
    let window = trimmed_window(sorted);
    let set = if window.is_empty() { sorted } else { window };
    let mean = mean(set);
    (mean, std_dev(set, mean))
}

pub fn mean(samples: &[Duration]) -> Duration {
    if samples.is_empty() {
        return Duration::ZERO;
    }
    let total: u128 = samples.iter().map(Duration::as_nanos).sum();
    nanos(total / samples.len() as u128)
}

fn std_dev(samples: &[Duration], mean: Duration) -> Duration {
    if samples.len() < 2 {
        return Duration::ZERO;
    }
    let mean = mean.as_nanos() as f64;
    let variance = samples
        .iter()
        .map(|s| {
            let d = s.as_nanos() as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / samples.len() as f64;
    Duration::from_nanos(variance.sqrt().round() as u64)
}

/// Transactions per second for one transaction taking `latency`; zero for zero latency.
pub fn tps(latency: Duration, digits: u32) -> f64 {
    if latency.is_zero() {
        return 0.0;
    }
    round_half_even(1.0 / latency.as_secs_f64(), digits)
}

/// Relative latency change `(new - old) / old`; zero when there is no baseline.
pub fn loss_rate(old: Duration, new: Duration, digits: u32) -> f64 {
    if old.is_zero() {
        return 0.0;
    }
    let old = old.as_nanos() as f64;
    let new = new.as_nanos() as f64;
    round_half_even((new - old) / old, digits)
}

fn nanos(n: u128) -> Duration {
    Duration::from_nanos(n.min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn window_drops_five_percent_each_side() {
        let samples: Vec<_> = (0..100).map(ms).collect();
        let window = trimmed_window(&samples);
        assert_eq!(window.len(), 90);
        assert_eq!(window.first(), Some(&ms(5)));
        assert_eq!(window.last(), Some(&ms(94)));
    }

    #[test]
    fn trimmed_mean_ignores_outliers() {
        let mut samples = vec![ms(100); 98];
        samples.push(ms(1));
        samples.push(ms(100_000));
        samples.sort();
        let (mean, std) = trimmed_mean_std(&samples);
        assert_eq!(mean, ms(100));
        assert_eq!(std, Duration::ZERO);
    }

    #[test]
    fn single_sample_falls_back_to_full_set() {
        let (mean, std) = trimmed_mean_std(&[ms(40)]);
        assert_eq!(mean, ms(40));
        assert_eq!(std, Duration::ZERO);
        assert_eq!(trimmed_mean_std(&[]), (Duration::ZERO, Duration::ZERO));
    }

    #[test]
    fn std_dev_of_window() {
        let (avg, std) = trimmed_mean_std(&[ms(10), ms(30)]);
        // window of two samples is [0, 1)
        assert_eq!(avg, ms(10));
        assert_eq!(std, Duration::ZERO);

        let samples: Vec<_> = [2, 4, 4, 4, 5, 5, 7, 9].into_iter().map(ms).collect();
        assert_eq!(std_dev(&samples, mean(&samples)), ms(2));
    }

    #[test]
    fn tps_is_reciprocal_latency() {
        assert_eq!(tps(ms(250), 4), 4.0);
        assert_eq!(tps(ms(300), 4), 3.3333);
        assert_eq!(tps(Duration::ZERO, 4), 0.0);
    }

    #[test]
    fn loss_rate_needs_a_baseline() {
        assert_eq!(loss_rate(ms(100), ms(160), 4), 0.6);
        assert_eq!(loss_rate(ms(100), ms(80), 4), -0.2);
        assert_eq!(loss_rate(Duration::ZERO, ms(80), 4), 0.0);
    }
}

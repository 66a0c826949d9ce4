//! Per-round helpers of the scene loop: pacing and the termination state machine.

use std::time::Duration;

use tokio::time::Instant;

use crate::{
    params::{Category, SceneParams},
    report::{RoundReport, SceneStatus},
};

/// Waits out the rest of the previous round's window.
///
/// `deadline` is when the previous round should have ended (`start + periodScene`). Ahead
/// of it the loop sleeps; behind it the overlap is logged and the next round starts at
/// once.
pub(crate) async fn pace(deadline: Option<Instant>, batch: usize) {
    let Some(deadline) = deadline else {
        return;
    };
    let now = Instant::now();
    if now < deadline {
        let wait = deadline - now;
        tracing::info!(batch = batch + 1, "[scene-run-sleep] waiting {wait:?} for the next round");
        tokio::time::sleep_until(deadline).await;
    } else if now > deadline {
        tracing::warn!(
            batch = batch + 1,
            "[scene-run-overlap] previous round ran {:?} past its window",
            now - deadline
        );
    }
}

/// Where the round should end given the target cadence; `None` when rounds are unpaced.
pub(crate) fn deadline(start: Instant, period: Duration) -> Option<Instant> {
    if period.is_zero() {
        None
    } else {
        Some(start + period)
    }
}

/// Decides whether the run stops after `report`.
///
/// Checked in order, the first hit wins: a failure while breaking on errors, latency
/// degraded past the fail-perf threshold, then the round budget. The two failure
/// checks only apply to capacity tests.
pub(crate) fn evaluate(params: &SceneParams, report: &RoundReport, failed: usize) -> SceneStatus {
    let capacity = params.category == Category::Capacity;

    if failed > 0 && capacity && params.fail_break {
        return SceneStatus::FailBreak;
    }

    let threshold = params.fail_perf_threshold();
    if capacity && threshold > 0.0 && report.perf_loss_rate >= threshold {
        return SceneStatus::FailPerf;
    }

    if report.batch >= params.batch_max {
        return SceneStatus::BatchMax;
    }

    SceneStatus::Normal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{CapacityParams, SurgeParams};

    fn capacity() -> SceneParams {
        CapacityParams {
            num_init: 2,
            batch_max: 5,
            fail_perf: 0.5,
            ..Default::default()
        }
        .into()
    }

    fn report(batch: usize, loss: f64) -> RoundReport {
        RoundReport {
            batch,
            perf_loss_rate: loss,
            ..Default::default()
        }
    }

    #[test]
    fn failure_breaks_capacity_first() {
        let params = capacity();
        // every condition holds, fail-break wins
        assert_eq!(evaluate(&params, &report(5, 0.9), 1), SceneStatus::FailBreak);
        assert_eq!(evaluate(&params, &report(5, 0.9), 0), SceneStatus::FailPerf);
        assert_eq!(evaluate(&params, &report(5, 0.1), 0), SceneStatus::BatchMax);
        assert_eq!(evaluate(&params, &report(4, 0.1), 0), SceneStatus::Normal);
    }

    #[test]
    fn threshold_is_inclusive_and_rounded() {
        let mut params = capacity();
        assert_eq!(evaluate(&params, &report(1, 0.5), 0), SceneStatus::FailPerf);
        params.fail_perf = 0.50004;
        assert_eq!(evaluate(&params, &report(1, 0.5), 0), SceneStatus::FailPerf);
        params.fail_perf = 0.0;
        assert_eq!(evaluate(&params, &report(1, 10.0), 0), SceneStatus::Normal);
    }

    #[test]
    fn failures_only_break_when_asked() {
        let mut params = capacity();
        params.fail_break = false;
        assert_eq!(evaluate(&params, &report(1, 0.0), 3), SceneStatus::Normal);
    }

    #[test]
    fn surge_ignores_failures_and_degradation() {
        let params: SceneParams = SurgeParams {
            batch_max: 3,
            ..Default::default()
        }
        .into();
        assert_eq!(evaluate(&params, &report(1, 5.0), 10), SceneStatus::Normal);
        assert_eq!(evaluate(&params, &report(3, 5.0), 10), SceneStatus::BatchMax);
    }

    #[tokio::test(start_paused = true)]
    async fn pace_sleeps_until_the_deadline() {
        let start = Instant::now();
        pace(deadline(start, Duration::from_millis(300)), 1).await;
        assert!(Instant::now() - start >= Duration::from_millis(300));

        // already late: returns without sleeping
        let late = Instant::now();
        pace(deadline(start, Duration::from_millis(100)), 2).await;
        assert_eq!(Instant::now(), late);

        assert!(deadline(start, Duration::ZERO).is_none());
    }
}

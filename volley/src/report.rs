use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{fmt, time::Duration};
use tokio::sync::mpsc;
use volley_macros::{record, status};

use crate::{
    aggregate::RoundAggregate,
    decimal::round_half_even,
    error::BoxError,
    params::SceneParams,
    stats::{loss_rate, trimmed_mean_std, tps},
};

/// Where a run stands after a round.
#[status]
#[derive(Default)]
#[serde(rename_all = "camelCase")]
pub enum SceneStatus {
    /// Keep going.
    #[default]
    Normal,
    /// An action failed and the capacity test breaks on errors.
    FailBreak,
    /// Latency degraded past the fail-perf threshold.
    FailPerf,
    /// The configured number of rounds ran.
    BatchMax,
}

impl SceneStatus {
    pub fn is_terminal(&self) -> bool {
        *self != SceneStatus::Normal
    }
}

/// Statistics of one finished round plus the parameters it ran with.
#[record]
#[derive(Default)]
#[serde(rename_all = "camelCase")]
pub struct RoundReport {
    #[serde(flatten)]
    pub params: SceneParams,

    // previous round
    pub last_fail_rate: f64,
    pub last_perf_avg: Duration,
    pub last_perf90_avg: Duration,

    // this round
    pub status: SceneStatus,
    /// 1-indexed round number.
    pub batch: usize,
    /// Population of the round.
    pub batch_robot: usize,
    pub batch_text: String,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    /// When the round should have ended given the target cadence.
    pub time_end_line: Option<DateTime<Utc>>,
    pub time_run: Duration,
    /// Highest number of simultaneously running actions.
    pub concurrency: i64,
    pub err_text: String,
    pub fail_rate: f64,
    pub tps_max: f64,
    pub tps_min: f64,
    pub tps_avg: f64,
    pub tps90_avg: f64,
    pub perf_time_avg: Duration,
    pub perf_time90_avg: Duration,
    pub perf_time90_std: Duration,
    pub perf_loss_rate: f64,
    pub resp_total: Duration,
    pub resp_fastest: Duration,
    pub resp_slowest: Duration,

    // whole run so far
    pub total_time_run: Duration,
    pub total_time_resp: Duration,
}

impl RoundReport {
    /// Opens the report of round `batch` (0-indexed).
    pub(crate) fn open(
        params: &SceneParams,
        batch: usize,
        population: usize,
        last: Option<&RoundReport>,
    ) -> Self {
        let mut report = Self {
            params: params.clone(),
            batch: batch + 1,
            batch_robot: population,
            ..Default::default()
        };
        if let Some(last) = last {
            report.last_fail_rate = last.fail_rate;
            report.last_perf_avg = last.perf_time_avg;
            report.last_perf90_avg = last.perf_time90_avg;
        }
        report
    }

    /// Stamps the start of the round.
    pub(crate) fn start(&mut self, now: DateTime<Utc>, period: Duration) {
        self.time_start = now;
        self.batch_text = format!("#{}. {}", self.batch, now.format("%H:%M:%S"));
        if !period.is_zero() {
            self.time_end_line = chrono::Duration::from_std(period).ok().map(|p| now + p);
        }
    }

    /// Derives the round statistics from its aggregate and the previous report.
    pub(crate) fn close(
        &mut self,
        now: DateTime<Utc>,
        agg: &RoundAggregate,
        last: Option<&RoundReport>,
        digits: u32,
    ) {
        self.time_end = now;
        self.time_run = (now - self.time_start).to_std().unwrap_or_default();

        if self.batch_robot > 0 {
            let (trimmed, std) = trimmed_mean_std(&agg.sorted_samples());
            self.perf_time90_avg = trimmed;
            self.perf_time90_std = std;
            self.resp_total = agg.total_spent;
            self.perf_time_avg = agg.total_spent / self.batch_robot as u32;
            self.fail_rate = round_half_even(agg.failed as f64 / self.batch_robot as f64, 4);
            if let Some(last) = last {
                self.perf_loss_rate = loss_rate(last.perf_time90_avg, self.perf_time90_avg, 4);
            }
        }

        self.resp_fastest = agg.fastest.unwrap_or_default();
        self.resp_slowest = agg.slowest.unwrap_or_default();
        self.tps_max = tps(self.resp_fastest, digits);
        self.tps_min = tps(self.resp_slowest, digits);
        self.tps_avg = tps(self.perf_time_avg, digits);
        self.tps90_avg = tps(self.perf_time90_avg, digits);

        if let Some(err) = &agg.last_error {
            self.err_text = err.text.clone();
        }

        self.total_time_run = self.time_run;
        self.total_time_resp = self.resp_total;
        if let Some(last) = last {
            self.total_time_run += last.total_time_run;
            self.total_time_resp += last.total_time_resp;
        }
    }

    /// How late the round ended relative to its expected end, in seconds (negative: early).
    pub fn overrun_secs(&self) -> f64 {
        match self.time_end_line {
            Some(line) => (self.time_end - line).num_milliseconds() as f64 / 1000.0,
            None => 0.0,
        }
    }
}

impl fmt::Display for RoundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{}/{}-{} {}u conc:{} loss:{} tps:{} over:{:.4}s err:{}",
            self.batch,
            self.params.batch_max,
            self.params.category,
            self.batch_robot,
            self.concurrency,
            self.perf_loss_rate,
            self.tps90_avg,
            self.overrun_secs(),
            self.err_text
        )
    }
}

/// Sink for round reports: stdout, files, dashboards.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, report: &RoundReport) -> Result<(), BoxError>;
}

/// Feeds every report streamed by a scene to `reporter` and returns them once the scene
/// drops its sender.
pub async fn report_task<R: Reporter + ?Sized>(
    mut rx: mpsc::Receiver<RoundReport>,
    reporter: &R,
) -> Result<Vec<RoundReport>, BoxError> {
    let mut reports = Vec::new();
    while let Some(report) = rx.recv().await {
        reporter.report(&report).await?;
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use super::*;

    /// Prints the one-line summary of each round.
    pub struct StdoutReporter;

    #[async_trait]
    impl Reporter for StdoutReporter {
        async fn report(&self, report: &RoundReport) -> Result<(), BoxError> {
            println!("{report}");
            Ok(())
        }
    }

    /// Prints each round as a JSON document on its own line.
    pub struct JsonReporter;

    #[async_trait]
    impl Reporter for JsonReporter {
        async fn report(&self, report: &RoundReport) -> Result<(), BoxError> {
            let value = serde_json::to_string(report)?;
            println!("{value}");
            Ok(())
        }
    }
}

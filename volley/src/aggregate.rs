use chrono::{DateTime, Utc};
use std::time::Duration;
use volley_macros::record;

use crate::robot::Robot;

/// Raw outcome of one round, collected robot by robot.
///
/// `RoundAggregate` keeps only mergeable data (counts, sums, the success samples, the
/// extremes and the latest error). Averages, percentiles and rates are derived from it
/// by [`RoundReport`](crate::report::RoundReport), so several partial aggregates of the
/// same round can be combined with [`merge`](RoundAggregate::merge) first.
#[record]
#[derive(Default)]
#[serde(rename_all = "camelCase")]
pub struct RoundAggregate {
    /// Robots consumed.
    pub population: usize,
    /// Robots with at least one missing or non-`Normal` slot.
    pub failed: usize,
    /// Sum of every robot's spent time, failed robots included.
    pub total_spent: Duration,
    /// Spent time of each fully successful robot, in consumption order.
    pub samples: Vec<Duration>,
    /// Fastest single action with a nonzero duration.
    pub fastest: Option<Duration>,
    /// Slowest single action.
    pub slowest: Option<Duration>,
    /// Error of the failed action that finished last.
    pub last_error: Option<LastError>,
}

#[record]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub at: Option<DateTime<Utc>>,
    pub text: String,
}

impl RoundAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregates a whole round.
    pub fn collect<'a>(robots: impl IntoIterator<Item = &'a Robot>) -> Self {
        let mut agg = Self::new();
        robots.into_iter().for_each(|r| agg.consume(r));
        agg
    }

    /// Incorporates one robot's finished round.
    pub fn consume(&mut self, robot: &Robot) {
        let state = robot.state();
        self.population += 1;
        self.total_spent += state.time_spent;

        let mut success = true;
        for slot in &state.results {
            let Some(result) = slot else {
                success = false;
                continue;
            };
            if !result.is_normal() {
                success = false;
                if let Some(text) = &result.error {
                    self.note_error(LastError {
                        at: result.time_finish,
                        text: text.clone(),
                    });
                }
            }
            if !result.time_spent.is_zero() {
                self.note_latency(result.time_spent);
            }
        }

        if success {
            if !state.time_spent.is_zero() {
                self.samples.push(state.time_spent);
            }
        } else {
            self.failed += 1;
        }
    }

    /// Combines two partial aggregates of the same round.
    pub fn merge(&mut self, other: Self) {
        self.population += other.population;
        self.failed += other.failed;
        self.total_spent += other.total_spent;
        self.samples.extend(other.samples);
        if let Some(d) = other.fastest {
            self.note_latency(d);
        }
        if let Some(d) = other.slowest {
            self.note_latency(d);
        }
        if let Some(e) = other.last_error {
            self.note_error(e);
        }
    }

    /// Success samples in ascending order.
    pub fn sorted_samples(&self) -> Vec<Duration> {
        let mut samples = self.samples.clone();
        samples.sort_unstable();
        samples
    }

    fn note_latency(&mut self, d: Duration) {
        self.fastest = Some(self.fastest.map_or(d, |f| f.min(d)));
        self.slowest = Some(self.slowest.map_or(d, |s| s.max(d)));
    }

    fn note_error(&mut self, err: LastError) {
        let newer = match &self.last_error {
            Some(current) => err.at >= current.at,
            None => true,
        };
        if newer {
            self.last_error = Some(err);
        }
    }
}

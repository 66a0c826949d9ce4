//! Test-shape parameters.
//!
//! The engine runs every test from one uniform [`SceneParams`]. Callers usually start from
//! one of the narrower request shapes, each of which maps onto `SceneParams` and pins the
//! fields that make no sense for its strategy:
//!
//! | shape              | break | fast  | perf  | step  | jitter | rounds                   |
//! |--------------------|-------|-------|-------|-------|--------|--------------------------|
//! | [`CapacityParams`] | given | given | given | given | given  | given                    |
//! | [`SurgeParams`]    | off   | on    | 0     | 0     | 0      | given                    |
//! | [`StableParams`]   | off   | on    | 0     | 0     | given  | `duration / periodScene` |
//!
//! (`break`, `fast`, `perf`: `failBreak`, `failFast`, `failPerf`.)
//!
//! All shapes deserialize with `#[serde(default)]`, so partial JSON documents pick up the
//! defaults below.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use volley_macros::record;

use crate::{decimal::round_half_even, error::SceneError};

/// Target duration of one round when none is given.
pub const DEFAULT_PERIOD_SCENE: Duration = Duration::from_secs(5);
/// Upper bound on capacity rounds.
pub const DEFAULT_CAPACITY_BATCH_MAX: usize = 1000;
/// Robots added per capacity round.
pub const DEFAULT_CAPACITY_NUM_STEP: usize = 5;
/// Latency degradation ratio that stops a capacity test.
pub const DEFAULT_CAPACITY_FAIL_PERF: f64 = 0.8;
/// Stability test length in seconds.
pub const DEFAULT_STABLE_DURATION_SECS: u64 = 60;

/// Initial population when none is given: one robot per logical CPU.
pub fn default_population() -> usize {
    num_cpus::get()
}

fn default_period_scene_ms() -> u64 {
    DEFAULT_PERIOD_SCENE.as_millis() as u64
}

/// Test strategy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Ramp the population round after round until failure or degradation.
    #[default]
    Capacity,
    /// One burst at fixed concurrency.
    Surge,
    /// Fixed population for a fixed wall-clock duration.
    Stable,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Capacity => "capacity",
            Category::Surge => "surge",
            Category::Stable => "stable",
        }
    }

    /// Whether robots spread their start over the action period.
    pub fn jitters(&self) -> bool {
        matches!(self, Category::Capacity | Category::Stable)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The uniform parameter set the round loop runs on.
#[record]
#[serde(rename_all = "camelCase")]
pub struct SceneParams {
    pub category: Category,
    /// Stop the run after any round with an error (capacity only).
    pub fail_break: bool,
    /// Skip a robot's remaining actions after its first failure.
    pub fail_fast: bool,
    /// Stop when the trimmed-mean latency degrades by at least this ratio (capacity only).
    /// Zero disables the check.
    pub fail_perf: f64,
    /// Maximum number of rounds.
    pub batch_max: usize,
    /// Population of the first round.
    pub num_init: usize,
    /// Robots added after each round.
    pub num_step: usize,
    /// Start jitter window in milliseconds.
    pub period_action: u64,
    /// Target round cadence in milliseconds; zero runs rounds back to back.
    pub period_scene: u64,
}

impl SceneParams {
    pub fn validate(&self) -> Result<(), SceneError> {
        if self.num_init == 0 {
            return Err(SceneError::InvalidParam("numInit"));
        }
        if !self.fail_perf.is_finite() || self.fail_perf < 0.0 {
            return Err(SceneError::InvalidParam("failPerf"));
        }
        Ok(())
    }

    pub fn period_action(&self) -> Duration {
        Duration::from_millis(self.period_action)
    }

    pub fn period_scene(&self) -> Duration {
        Duration::from_millis(self.period_scene)
    }

    /// Fail-perf threshold as used for comparisons.
    pub fn fail_perf_threshold(&self) -> f64 {
        round_half_even(self.fail_perf, 4)
    }

    /// Population of round `batch` (0-indexed).
    pub fn population(&self, batch: usize) -> usize {
        self.num_init + self.num_step * batch
    }
}

impl Default for SceneParams {
    fn default() -> Self {
        CapacityParams::default().into()
    }
}

/// Capacity (ramp) test request: every field is honored.
#[record]
#[serde(rename_all = "camelCase", default)]
pub struct CapacityParams {
    pub fail_break: bool,
    pub fail_fast: bool,
    pub fail_perf: f64,
    pub batch_max: usize,
    pub num_init: usize,
    pub num_step: usize,
    pub period_action: u64,
    pub period_scene: u64,
}

impl Default for CapacityParams {
    fn default() -> Self {
        Self {
            fail_break: true,
            fail_fast: true,
            fail_perf: DEFAULT_CAPACITY_FAIL_PERF,
            batch_max: DEFAULT_CAPACITY_BATCH_MAX,
            num_init: default_population(),
            num_step: DEFAULT_CAPACITY_NUM_STEP,
            period_action: 0,
            period_scene: default_period_scene_ms(),
        }
    }
}

impl From<CapacityParams> for SceneParams {
    fn from(p: CapacityParams) -> Self {
        Self {
            category: Category::Capacity,
            fail_break: p.fail_break,
            fail_fast: p.fail_fast,
            fail_perf: p.fail_perf,
            batch_max: p.batch_max,
            num_init: p.num_init,
            num_step: p.num_step,
            period_action: p.period_action,
            period_scene: p.period_scene,
        }
    }
}

/// Surge (burst) test request.
#[record]
#[serde(rename_all = "camelCase", default)]
pub struct SurgeParams {
    pub batch_max: usize,
    pub num_init: usize,
    pub period_scene: u64,
}

impl Default for SurgeParams {
    fn default() -> Self {
        Self {
            batch_max: 1,
            num_init: default_population(),
            period_scene: default_period_scene_ms(),
        }
    }
}

impl From<SurgeParams> for SceneParams {
    fn from(p: SurgeParams) -> Self {
        Self {
            category: Category::Surge,
            fail_break: false,
            fail_fast: true,
            fail_perf: 0.0,
            batch_max: p.batch_max,
            num_init: p.num_init,
            num_step: 0,
            period_action: 0,
            period_scene: p.period_scene,
        }
    }
}

/// Stability test request: a fixed population for `duration` seconds.
#[record]
#[serde(rename_all = "camelCase", default)]
pub struct StableParams {
    pub num_init: usize,
    pub period_action: u64,
    pub period_scene: u64,
    /// Test length in seconds.
    pub duration: u64,
}

impl Default for StableParams {
    fn default() -> Self {
        Self {
            num_init: default_population(),
            period_action: 0,
            period_scene: default_period_scene_ms(),
            duration: DEFAULT_STABLE_DURATION_SECS,
        }
    }
}

impl TryFrom<StableParams> for SceneParams {
    type Error = SceneError;

    fn try_from(p: StableParams) -> Result<Self, Self::Error> {
        if p.period_scene == 0 {
            return Err(SceneError::InvalidParam("periodScene"));
        }
        let batch_max = (p.duration.saturating_mul(1000) / p.period_scene) as usize;
        Ok(Self {
            category: Category::Stable,
            fail_break: false,
            fail_fast: true,
            fail_perf: 0.0,
            batch_max,
            num_init: p.num_init,
            num_step: 0,
            period_action: p.period_action,
            period_scene: p.period_scene,
        })
    }
}

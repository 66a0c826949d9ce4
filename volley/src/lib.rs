//! Volley: a round-based load generation engine.
//!
//! A test is a [`Scene`] driving a population of simulated actors ([`Robot`]s). Each
//! robot runs an ordered script of [`Action`]s. The scene runs in rounds: every round it
//! copies the robot template once per population slot, runs all copies concurrently,
//! waits for every one of them, and condenses the round into a [`RoundReport`]
//! (failure rate, TPS, trimmed-mean latency, degradation against the previous round,
//! peak concurrency).
//!
//! # Architecture
//!
//! - [`Action`]: one named unit of work with `prepare` / `execute` / `finalize`. Only the
//!   timed `execute` decides the outcome of the slot.
//! - [`Robot`]: an actor running its actions in order once per round, recording one
//!   [`ActionResult`](metric::ActionResult) per action.
//! - [`Scene`]: the orchestrator. Owns the round loop, pacing and the termination state
//!   machine, and either returns every report at the end or streams them over a channel.
//! - [`RoundAggregate`](aggregate::RoundAggregate): mergeable raw outcome of a round.
//! - [`RoundReport`]: statistics derived from an aggregate and the previous report.
//! - [`Reporter`]: consumes streamed reports and sends them somewhere.
//!
//! # Strategies
//!
//! - **capacity**: the population grows by `numStep` each round until an error
//!   (`failBreak`), a latency degradation of at least `failPerf`, or `batchMax` rounds.
//! - **surge**: `batchMax` bursts at a fixed population, no jitter.
//! - **stable**: a fixed population every `periodScene` for a wall-clock duration.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use async_trait::async_trait;
//! use serde_json::Value;
//! use volley::{Action, CapacityParams, Robot, Scene, error::BoxError};
//!
//! struct Checkout;
//!
//! #[async_trait]
//! impl Action for Checkout {
//!     fn name(&self) -> &str {
//!         "checkout"
//!     }
//!
//!     async fn execute(&self, _: &Arc<Robot>, _: usize, _: usize) -> Result<Value, BoxError> {
//!         tokio::time::sleep(Duration::from_millis(20)).await;
//!         Ok(Value::Null)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut robot = Robot::builder().name("buyer").build();
//!     robot.add_action(Checkout);
//!
//!     let scene = Scene::builder().name("shop").default_robot(robot).build();
//!     let params = CapacityParams {
//!         num_init: 50,
//!         num_step: 50,
//!         batch_max: 10,
//!         ..Default::default()
//!     };
//!     for report in scene.run_capacity(params, None).await.unwrap() {
//!         println!("{report}");
//!     }
//! }
//! ```
//!
//! # Feature flags
//!
//! - `macros`: re-exports the `#[record]` and `#[status]` attribute macros used to declare
//!   serializable engine records. (Enabled by default)
//! - `builtins`: provides `FnAction`, `StdoutReporter` and `JsonReporter` for quick
//!   experiments and demos. (Enabled by default)
//!
//! See `examples/checkout.rs` for a runnable, streaming scene.

/// Units of work performed by robots
pub mod action;
/// Raw per-round outcome
pub mod aggregate;
/// In-flight execution counter
pub mod counter;
/// Half-to-even decimal rounding
pub mod decimal;
pub mod error;
/// Per-action results
pub mod metric;
pub mod params;
/// Round reports and reporters
pub mod report;
/// Simulated actors
pub mod robot;
/// The round loop
pub mod scene;
pub mod stats;

pub use action::Action;
pub use counter::ConcurrencyCounter;
pub use error::SceneError;
pub use params::{CapacityParams, Category, SceneParams, StableParams, SurgeParams};
pub use report::{Reporter, RoundReport, SceneStatus, report_task};
pub use robot::Robot;
pub use scene::Scene;

#[cfg(feature = "macros")]
/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use volley_macros::*;
}

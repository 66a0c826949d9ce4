use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use chrono::Utc;
use futures::future::join_all;
use tokio::{sync::mpsc, time::Instant};
use typed_builder::TypedBuilder;

use crate::{
    aggregate::RoundAggregate,
    counter::ConcurrencyCounter,
    decimal::DEFAULT_DIGITS,
    error::{BoxError, SceneError},
    params::{CapacityParams, SceneParams, StableParams, SurgeParams},
    report::RoundReport,
    robot::{Robot, RoundContext, panic_message},
};
use round::{deadline, evaluate, pace};

mod round;

/// Callback run once before the first round or after the last one.
pub type SceneHook = Arc<dyn Fn(&Scene) -> Result<(), BoxError> + Send + Sync>;

/// A named load test: robot templates plus the round loop that drives them.
///
/// Every round the scene copies its template robot once per population slot, runs all
/// copies concurrently, waits for every one of them, and turns the finished robots into a
/// [`RoundReport`]. The loop stops on the first terminal
/// [`SceneStatus`](crate::report::SceneStatus).
///
/// Reports are either returned together once the run is over, or streamed round by round
/// through an [`mpsc::Sender`] (in which case `run` returns an empty vector).
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use volley::{Action, Robot, Scene, SurgeParams, error::BoxError};
///
/// struct Browse;
///
/// #[async_trait]
/// impl Action for Browse {
///     fn name(&self) -> &str {
///         "browse"
///     }
///
///     async fn execute(&self, _: &Arc<Robot>, _: usize, _: usize) -> Result<Value, BoxError> {
///         Ok(Value::Null)
///     }
/// }
///
/// # async fn demo() -> Result<(), volley::SceneError> {
/// let mut robot = Robot::builder().name("shopper").build();
/// robot.add_action(Browse);
///
/// let scene = Scene::builder().name("storefront").default_robot(robot).build();
/// let reports = scene
///     .run_surge(SurgeParams { num_init: 200, ..Default::default() }, None)
///     .await?;
/// println!("{}", reports[0]);
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder)]
pub struct Scene {
    #[builder(setter(into))]
    name: String,
    /// Template copied for every population slot.
    #[builder(default, setter(strip_option))]
    default_robot: Option<Robot>,
    /// Additional templates; the first one stands in when no default robot is set.
    #[builder(default)]
    robots: Vec<Robot>,
    #[builder(default, setter(strip_option))]
    before: Option<SceneHook>,
    #[builder(default, setter(strip_option))]
    after: Option<SceneHook>,
    /// Digits kept by the TPS figures of each report.
    #[builder(default = DEFAULT_DIGITS)]
    rounding_digits: u32,
    /// Upper bound on a single `execute` call; slower calls end `Frozen`.
    #[builder(default, setter(strip_option))]
    action_timeout: Option<std::time::Duration>,
}

impl Scene {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn robots(&self) -> &[Robot] {
        &self.robots
    }

    pub fn add_robot(&mut self, robot: Robot) -> &mut Self {
        self.robots.push(robot);
        self
    }

    /// The robot every round is copied from.
    pub fn template(&self) -> Option<&Robot> {
        self.default_robot.as_ref().or_else(|| self.robots.first())
    }

    /// Capacity test: grow the population by `numStep` each round until failure,
    /// degradation past `failPerf`, or `batchMax` rounds.
    pub async fn run_capacity(
        &self,
        params: CapacityParams,
        out: Option<mpsc::Sender<RoundReport>>,
    ) -> Result<Vec<RoundReport>, SceneError> {
        self.run(params.into(), out).await
    }

    /// Surge test: `batchMax` bursts of `numInit` simultaneous robots.
    pub async fn run_surge(
        &self,
        params: SurgeParams,
        out: Option<mpsc::Sender<RoundReport>>,
    ) -> Result<Vec<RoundReport>, SceneError> {
        self.run(params.into(), out).await
    }

    /// Stability test: a fixed population every `periodScene` for `duration` seconds.
    pub async fn run_stable(
        &self,
        params: StableParams,
        out: Option<mpsc::Sender<RoundReport>>,
    ) -> Result<Vec<RoundReport>, SceneError> {
        self.run(params.try_into()?, out).await
    }

    /// Runs rounds until a terminal status.
    ///
    /// With `out`, every report is sent as soon as its round finishes and the returned
    /// vector is empty. If the receiver goes away the run carries on and later reports are
    /// only logged.
    pub async fn run(
        &self,
        params: SceneParams,
        mut out: Option<mpsc::Sender<RoundReport>>,
    ) -> Result<Vec<RoundReport>, SceneError> {
        params.validate()?;
        let template = self.template().ok_or(SceneError::UndefinedRobot)?;

        if let Some(hook) = &self.before {
            hook(self).map_err(|e| SceneError::Hook(e.to_string()))?;
        }
        match serde_json::to_string(&params) {
            Ok(json) => tracing::info!(scene = %self.name, "[scene-run] params {json}"),
            Err(err) => {
                tracing::warn!(scene = %self.name, "[scene-run] params not printable: {err}")
            }
        }

        let streaming = out.is_some();
        let counter = Arc::new(ConcurrencyCounter::new());
        let mut history: Vec<RoundReport> = Vec::new();
        let mut last: Option<RoundReport> = None;
        let mut next_deadline: Option<Instant> = None;
        let mut batch = 0;

        loop {
            if batch > 0 {
                pace(next_deadline, batch).await;
            }
            let population = params.population(batch);
            next_deadline = deadline(Instant::now(), params.period_scene());

            let mut report = RoundReport::open(&params, batch, population, last.as_ref());
            report.start(Utc::now(), params.period_scene());
            tracing::info!(
                scene = %self.name,
                "[scene-run-{}] #{}/{} {}u start",
                params.category,
                report.batch,
                params.batch_max,
                population
            );

            counter.reset();
            let ctx = Arc::new(RoundContext {
                category: params.category,
                fail_fast: params.fail_fast,
                period_action: params.period_action(),
                batch,
                action_timeout: self.action_timeout,
                counter: Arc::clone(&counter),
            });
            let agg = self.run_round(template, population, ctx).await;

            report.close(Utc::now(), &agg, last.as_ref(), self.rounding_digits);
            report.concurrency = counter.max();

            if !report.err_text.is_empty() {
                tracing::error!(
                    scene = %self.name,
                    batch = report.batch,
                    failed = agg.failed,
                    "[scene-break] {}",
                    report.err_text
                );
            }
            report.status = evaluate(&params, &report, agg.failed);

            let status = report.status;
            self.emit(&mut out, streaming, &mut history, report.clone()).await;
            if status.is_terminal() {
                tracing::info!(
                    scene = %self.name,
                    batch = batch + 1,
                    "[scene-run] stopped: {status:?}"
                );
                break;
            }
            last = Some(report);
            batch += 1;
        }

        if let Some(hook) = &self.after {
            hook(self).map_err(|e| SceneError::Hook(e.to_string()))?;
        }
        Ok(history)
    }

    /// Copies, runs, closes and aggregates one round's robots. The copies are dropped
    /// before returning.
    async fn run_round(
        &self,
        template: &Robot,
        population: usize,
        ctx: Arc<RoundContext>,
    ) -> RoundAggregate {
        let robots: Vec<Arc<Robot>> = (0..population)
            .map(|serial| Arc::new(template.copy(ctx.batch, serial, &self.name)))
            .collect();

        let handles = robots
            .iter()
            .map(|robot| tokio::spawn(Arc::clone(robot).run_round(Arc::clone(&ctx))));
        for res in join_all(handles).await {
            if let Err(err) = res {
                tracing::error!(
                    scene = %self.name,
                    batch = ctx.batch + 1,
                    "[scene-run] robot task failed: {err}"
                );
            }
        }

        for robot in &robots {
            match panic::catch_unwind(AssertUnwindSafe(|| robot.close())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(robot = %robot.display_name(), "[robot-close] {err}")
                }
                Err(payload) => tracing::error!(
                    robot = %robot.display_name(),
                    "[panic-recover] close callback panicked: {}",
                    panic_message(payload.as_ref())
                ),
            }
        }

        RoundAggregate::collect(robots.iter().map(Arc::as_ref))
    }

    async fn emit(
        &self,
        out: &mut Option<mpsc::Sender<RoundReport>>,
        streaming: bool,
        history: &mut Vec<RoundReport>,
        report: RoundReport,
    ) {
        let report = match out.as_ref() {
            Some(tx) => match tx.send(report).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(report)) => {
                    tracing::warn!(
                        scene = %self.name,
                        "[scene-batch] report receiver dropped, falling back to logs"
                    );
                    *out = None;
                    report
                }
            },
            None => report,
        };
        tracing::info!(scene = %self.name, "[scene-batch] {report}");
        if !streaming {
            history.push(report);
        }
    }
}

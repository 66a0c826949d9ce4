use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{RwLock, RwLockReadGuard};
use rand::Rng;
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::{
    action::Action,
    counter::ConcurrencyCounter,
    error::BoxError,
    metric::{ActionResult, ActionStatus},
    params::Category,
};

/// Callback invoked once a robot's round is over, e.g. to log out a session.
pub type RobotClose = Arc<dyn Fn(&Robot) -> Result<(), BoxError> + Send + Sync>;

/// A simulated actor running an ordered script of actions once per round.
///
/// The robot handed to a [`Scene`](crate::Scene) is a template: every round the scene
/// copies it once per population slot, runs the copies and drops them after the round's
/// statistics are computed.
#[derive(TypedBuilder)]
pub struct Robot {
    #[builder(setter(into))]
    name: String,
    #[builder(default)]
    batch: usize,
    #[builder(default)]
    serial: usize,
    #[builder(default)]
    actions: Vec<Arc<dyn Action>>,
    #[builder(default, setter(strip_option))]
    on_close: Option<RobotClose>,
    #[builder(default, setter(skip))]
    scene: String,
    #[builder(default, setter(skip))]
    is_copy: bool,
    #[builder(default, setter(skip))]
    state: RwLock<RobotState>,
}

/// Mutable per-round state of a robot.
#[derive(Debug, Default)]
pub struct RobotState {
    /// One slot per action; `None` until the action finished or was skipped.
    pub results: Vec<Option<ActionResult>>,
    pub time_create: Option<DateTime<Utc>>,
    pub time_finish: Option<DateTime<Utc>>,
    /// Sum of the `execute` durations of this round.
    pub time_spent: Duration,
    pub fail_num: usize,
    /// Step currently running, used to locate panics.
    pub step: Option<usize>,
}

impl Robot {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `name-batch-serial`, unique within a run.
    pub fn display_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.batch, self.serial)
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn serial(&self) -> usize {
        self.serial
    }

    /// Name of the scene running this robot; empty for templates.
    pub fn scene(&self) -> &str {
        &self.scene
    }

    pub fn is_copy(&self) -> bool {
        self.is_copy
    }

    pub fn actions(&self) -> &[Arc<dyn Action>] {
        &self.actions
    }

    pub fn add_action(&mut self, action: impl Action + 'static) -> &mut Self {
        self.actions.push(Arc::new(action));
        self
    }

    pub fn results(&self) -> Vec<Option<ActionResult>> {
        self.state.read().results.clone()
    }

    pub fn time_spent(&self) -> Duration {
        self.state.read().time_spent
    }

    pub fn time_create(&self) -> Option<DateTime<Utc>> {
        self.state.read().time_create
    }

    pub fn time_finish(&self) -> Option<DateTime<Utc>> {
        self.state.read().time_finish
    }

    pub fn fail_num(&self) -> usize {
        self.state.read().fail_num
    }

    /// A robot failed its round when any slot is missing or not `Normal`.
    pub fn is_failed(&self) -> bool {
        self.state
            .read()
            .results
            .iter()
            .any(|r| !r.as_ref().is_some_and(ActionResult::is_normal))
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, RobotState> {
        self.state.read()
    }

    /// Fresh copy for one population slot: same script and close callback, empty results.
    pub fn copy(&self, batch: usize, serial: usize, scene: &str) -> Robot {
        Robot {
            name: self.name.clone(),
            batch,
            serial,
            actions: self.actions.clone(),
            on_close: self.on_close.clone(),
            scene: scene.to_string(),
            is_copy: true,
            state: RwLock::new(RobotState {
                results: vec![None; self.actions.len()],
                ..Default::default()
            }),
        }
    }

    pub fn close(&self) -> Result<(), BoxError> {
        match &self.on_close {
            Some(f) => f(self),
            None => Ok(()),
        }
    }

    /// Runs one round and never unwinds: a panic inside an action is logged and the robot
    /// is left with its unfinished slots empty, which counts as a failure.
    pub(crate) async fn run_round(self: Arc<Self>, ctx: Arc<RoundContext>) {
        let outcome = AssertUnwindSafe(Arc::clone(&self).execute_actions(ctx))
            .catch_unwind()
            .await;
        if let Err(payload) = outcome {
            let mut state = self.state.write();
            let action = state
                .step
                .and_then(|s| self.actions.get(s))
                .map(|a| a.name().to_string())
                .unwrap_or_default();
            tracing::error!(
                robot = %self.display_name(),
                step = ?state.step,
                action = %action,
                "[panic-recover] robot task panicked: {}",
                panic_message(payload.as_ref())
            );
            state.step = None;
            state.time_finish.get_or_insert_with(Utc::now);
        }
    }

    async fn execute_actions(self: Arc<Self>, ctx: Arc<RoundContext>) {
        if ctx.category.jitters() {
            let delay = jitter(ctx.period_action);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        {
            let mut state = self.state.write();
            state.results.resize(self.actions.len(), None);
            state.time_create = Some(Utc::now());
        }

        let mut fail_num = 0;
        for (step, action) in self.actions.iter().enumerate() {
            let record = if fail_num > 0 && ctx.fail_fast {
                ActionResult::closed()
            } else {
                self.state.write().step = Some(step);
                self.run_action(action.as_ref(), step, &ctx).await
            };
            if !record.is_normal() {
                fail_num += 1;
            }
            {
                let mut state = self.state.write();
                state.time_spent += record.time_spent;
                state.fail_num = fail_num;
                state.results[step] = Some(record);
            }
        }

        let mut state = self.state.write();
        state.step = None;
        state.time_finish = Some(Utc::now());
    }

    async fn run_action(
        self: &Arc<Self>,
        action: &dyn Action,
        step: usize,
        ctx: &RoundContext,
    ) -> ActionResult {
        let batch = ctx.batch;
        if let Err(err) = action.prepare(self, step, batch).await {
            tracing::warn!(
                robot = %self.display_name(),
                action = action.name(),
                step,
                batch,
                "[action-run-before] {err}"
            );
        }

        let time_create = Utc::now();
        let start = Instant::now();
        let outcome = {
            let _running = ctx.counter.enter();
            match ctx.action_timeout {
                Some(limit) => tokio::time::timeout(limit, action.execute(self, step, batch))
                    .await
                    .map_err(|_| limit),
                None => Ok(action.execute(self, step, batch).await),
            }
        };
        let time_spent = start.elapsed();

        let mut record = ActionResult {
            time_create: Some(time_create),
            time_finish: Some(Utc::now()),
            time_spent,
            ..Default::default()
        };
        match outcome {
            Ok(Ok(value)) => record.value = value,
            Ok(Err(err)) => {
                record.status = ActionStatus::Warn;
                record.error = Some(err.to_string());
            }
            Err(limit) => {
                record.status = ActionStatus::Frozen;
                record.error = Some(format!("action timed out after {limit:?}"));
            }
        }

        if let Err(err) = action.finalize(self, step, batch).await {
            tracing::warn!(
                robot = %self.display_name(),
                action = action.name(),
                step,
                batch,
                "[action-run-after] {err}"
            );
        }
        record
    }
}

/// Round-wide settings every robot of the round runs with.
#[derive(Debug, Clone)]
pub(crate) struct RoundContext {
    pub category: Category,
    pub fail_fast: bool,
    pub period_action: Duration,
    pub batch: usize,
    pub action_timeout: Option<Duration>,
    pub counter: Arc<ConcurrencyCounter>,
}

/// Uniform start delay in `[0, window)`.
fn jitter(window: Duration) -> Duration {
    let nanos = window.as_nanos().min(u64::MAX as u128) as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(all(test, feature = "builtins"))]
mod tests {
    use super::*;
    use crate::action::FnAction;
    use serde_json::Value;

    fn ctx(category: Category, fail_fast: bool) -> Arc<RoundContext> {
        Arc::new(RoundContext {
            category,
            fail_fast,
            period_action: Duration::ZERO,
            batch: 0,
            action_timeout: None,
            counter: Arc::new(ConcurrencyCounter::new()),
        })
    }

    fn sleeper(name: &str, ms: u64) -> FnAction {
        FnAction::new(name).on_execute(move |_, step, _| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(Value::from(step))
        })
    }

    fn failing(name: &str) -> FnAction {
        FnAction::new(name).on_execute(|_, _, _| async { Err("refused".into()) })
    }

    fn template(actions: Vec<FnAction>) -> Robot {
        let mut robot = Robot::builder().name("bot").build();
        for a in actions {
            robot.add_action(a);
        }
        robot
    }

    #[test]
    fn copy_resets_results_and_keeps_script() {
        let t = template(vec![sleeper("a", 1), sleeper("b", 1)]);
        let copy = t.copy(3, 7, "checkout");
        assert!(copy.is_copy());
        assert!(!t.is_copy());
        assert_eq!(copy.actions().len(), 2);
        assert_eq!(copy.results().len(), 2);
        assert!(copy.results().iter().all(Option::is_none));
        assert_eq!(copy.display_name(), "bot-3-7");
        assert_eq!(copy.scene(), "checkout");
    }

    #[tokio::test(start_paused = true)]
    async fn runs_actions_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut robot = Robot::builder().name("bot").build();
        for i in 0..3 {
            let order = Arc::clone(&order);
            robot.add_action(FnAction::new(format!("a{i}")).on_execute(move |_, step, _| {
                let order = Arc::clone(&order);
                async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    order.lock().push(step);
                    Ok(Value::Null)
                }
            }));
        }
        let robot = Arc::new(robot.copy(0, 0, "s"));
        Arc::clone(&robot).run_round(ctx(Category::Surge, true)).await;

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        let results = robot.results();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.as_ref().unwrap().is_normal()));
        assert!(robot.time_spent() >= Duration::from_millis(30));
        assert!(robot.time_spent() < Duration::from_millis(33));
        assert!(!robot.is_failed());
        assert!(robot.time_create().is_some());
        assert!(robot.time_finish().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_closes_remaining_actions() {
        let robot = template(vec![
            sleeper("a", 5),
            failing("b"),
            sleeper("c", 5),
            sleeper("d", 5),
        ]);
        let robot = Arc::new(robot.copy(0, 0, "s"));
        Arc::clone(&robot).run_round(ctx(Category::Surge, true)).await;

        let results: Vec<_> = robot.results().into_iter().map(Option::unwrap).collect();
        assert_eq!(results[0].status, ActionStatus::Normal);
        assert_eq!(results[1].status, ActionStatus::Warn);
        assert_eq!(results[1].error.as_deref(), Some("refused"));
        for skipped in &results[2..] {
            assert_eq!(skipped.status, ActionStatus::Closed);
            assert!(skipped.error.is_none());
        }
        assert_eq!(robot.fail_num(), 3);
        assert!(robot.is_failed());
        assert!(robot.time_spent() >= Duration::from_millis(5));
        assert!(robot.time_spent() < Duration::from_millis(7));
    }

    #[tokio::test(start_paused = true)]
    async fn without_fail_fast_later_actions_still_run() {
        let robot = template(vec![failing("a"), sleeper("b", 5)]);
        let robot = Arc::new(robot.copy(0, 0, "s"));
        Arc::clone(&robot).run_round(ctx(Category::Capacity, false)).await;

        let results: Vec<_> = robot.results().into_iter().map(Option::unwrap).collect();
        assert_eq!(results[0].status, ActionStatus::Warn);
        assert_eq!(results[1].status, ActionStatus::Normal);
        assert_eq!(robot.fail_num(), 1);
    }

    #[tokio::test]
    async fn hook_errors_do_not_fail_the_slot() {
        let action = FnAction::new("a")
            .on_prepare(|_, _, _| async { Err("prepare broke".into()) })
            .on_execute(|_, _, _| async { Ok(Value::Bool(true)) })
            .on_finalize(|_, _, _| async { Err("finalize broke".into()) });
        let robot = Arc::new(template(vec![action]).copy(0, 0, "s"));
        Arc::clone(&robot).run_round(ctx(Category::Surge, true)).await;

        let result = robot.results().remove(0).unwrap();
        assert!(result.is_normal());
        assert_eq!(result.value, Value::Bool(true));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn panicking_action_is_recovered() {
        let boom = FnAction::new("boom").on_execute(|_, _, _| async {
            if true {
                panic!("action exploded");
            }
            Ok(Value::Null)
        });
        let robot = template(vec![sleeper("a", 1), boom, sleeper("c", 1)]);
        let robot = Arc::new(robot.copy(0, 0, "s"));
        let context = ctx(Category::Surge, true);
        Arc::clone(&robot).run_round(Arc::clone(&context)).await;

        let results = robot.results();
        assert!(results[0].as_ref().unwrap().is_normal());
        assert!(results[1].is_none());
        assert!(results[2].is_none());
        assert!(robot.is_failed());
        assert!(robot.time_finish().is_some());
        assert_eq!(context.counter.current(), 0);
        assert_eq!(context.counter.max(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_action_is_frozen_by_timeout() {
        let script = template(vec![sleeper("slow", 500), sleeper("next", 1)]);
        let robot = Arc::new(script.copy(0, 0, "s"));
        let context = Arc::new(RoundContext {
            action_timeout: Some(Duration::from_millis(100)),
            ..Arc::unwrap_or_clone(ctx(Category::Surge, true))
        });
        Arc::clone(&robot).run_round(context).await;

        let results: Vec<_> = robot.results().into_iter().map(Option::unwrap).collect();
        assert_eq!(results[0].status, ActionStatus::Frozen);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
        assert!(results[0].time_spent >= Duration::from_millis(100));
        assert!(results[0].time_spent < Duration::from_millis(500));
        assert_eq!(results[1].status, ActionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_start_is_jittered_within_window() {
        let started = Arc::new(parking_lot::Mutex::new(None));
        let seen = Arc::clone(&started);
        let probe = FnAction::new("probe").on_execute(move |_, _, _| {
            let seen = Arc::clone(&seen);
            async move {
                *seen.lock() = Some(Instant::now());
                Ok(Value::Null)
            }
        });
        let robot = Arc::new(template(vec![probe]).copy(0, 0, "s"));
        let context = Arc::new(RoundContext {
            period_action: Duration::from_millis(1000),
            ..Arc::unwrap_or_clone(ctx(Category::Capacity, true))
        });
        let begin = Instant::now();
        Arc::clone(&robot).run_round(context).await;

        let started_at = (*started.lock()).expect("probe ran");
        assert!(started_at - begin <= Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_in_window() {
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(10)) < Duration::from_millis(10));
        }
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{error::BoxError, robot::Robot};

/// One named unit of work a [`Robot`] performs every round.
///
/// For each `(robot, round)` the engine calls `prepare`, then the timed `execute`, then
/// `finalize`. Only `execute` decides the outcome of the slot: its duration and error
/// become the [`ActionResult`](crate::metric::ActionResult). Errors from `prepare` and
/// `finalize` are logged and otherwise ignored.
///
/// `step` is the action's index in the robot's script (0-based) and `batch` is the round
/// index (0-based).
///
/// Actions are shared read-only by every robot copied from the same template, so any
/// per-robot state belongs in the robot or in the action's own synchronization.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
///
/// use async_trait::async_trait;
/// use serde_json::{Value, json};
/// use volley::{Action, Robot, error::BoxError};
///
/// struct Ping;
///
/// #[async_trait]
/// impl Action for Ping {
///     fn name(&self) -> &str {
///         "ping"
///     }
///
///     async fn execute(
///         &self,
///         robot: &Arc<Robot>,
///         step: usize,
///         _batch: usize,
///     ) -> Result<Value, BoxError> {
///         Ok(json!({ "robot": robot.display_name(), "step": step }))
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    async fn prepare(
        &self,
        _robot: &Arc<Robot>,
        _step: usize,
        _batch: usize,
    ) -> Result<(), BoxError> {
        Ok(())
    }

    async fn execute(
        &self,
        robot: &Arc<Robot>,
        step: usize,
        batch: usize,
    ) -> Result<Value, BoxError>;

    async fn finalize(
        &self,
        _robot: &Arc<Robot>,
        _step: usize,
        _batch: usize,
    ) -> Result<(), BoxError> {
        Ok(())
    }
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use super::*;

    use futures::future::BoxFuture;

    type Outcome<T> = BoxFuture<'static, Result<T, BoxError>>;
    type ExecuteFn = Arc<dyn Fn(Arc<Robot>, usize, usize) -> Outcome<Value> + Send + Sync>;
    type HookFn = Arc<dyn Fn(Arc<Robot>, usize, usize) -> Outcome<()> + Send + Sync>;

    /// An [`Action`] assembled from closures.
    ///
    /// Closures receive an owned handle to the robot so the returned futures can be
    /// `'static`. An action without an `execute` closure is a no-op that always succeeds.
    ///
    /// ```rust
    /// use volley::action::FnAction;
    ///
    /// let login = FnAction::new("login")
    ///     .on_execute(|robot, _step, _batch| async move {
    ///         // talk to the system under test here
    ///         Ok(serde_json::Value::from(robot.serial()))
    ///     })
    ///     .on_finalize(|_, _, _| async { Ok(()) });
    /// ```
    #[derive(Clone)]
    pub struct FnAction {
        name: String,
        execute: Option<ExecuteFn>,
        prepare: Option<HookFn>,
        finalize: Option<HookFn>,
    }

    impl FnAction {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                execute: None,
                prepare: None,
                finalize: None,
            }
        }

        pub fn on_execute<F, Fut>(mut self, f: F) -> Self
        where
            F: Fn(Arc<Robot>, usize, usize) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
        {
            self.execute = Some(Arc::new(move |r, s, b| Box::pin(f(r, s, b))));
            self
        }

        pub fn on_prepare<F, Fut>(mut self, f: F) -> Self
        where
            F: Fn(Arc<Robot>, usize, usize) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
        {
            self.prepare = Some(Arc::new(move |r, s, b| Box::pin(f(r, s, b))));
            self
        }

        pub fn on_finalize<F, Fut>(mut self, f: F) -> Self
        where
            F: Fn(Arc<Robot>, usize, usize) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
        {
            self.finalize = Some(Arc::new(move |r, s, b| Box::pin(f(r, s, b))));
            self
        }
    }

    #[async_trait]
    impl Action for FnAction {
        fn name(&self) -> &str {
            &self.name
        }

        async fn prepare(
            &self,
            robot: &Arc<Robot>,
            step: usize,
            batch: usize,
        ) -> Result<(), BoxError> {
            match &self.prepare {
                Some(f) => f(Arc::clone(robot), step, batch).await,
                None => Ok(()),
            }
        }

        async fn execute(
            &self,
            robot: &Arc<Robot>,
            step: usize,
            batch: usize,
        ) -> Result<Value, BoxError> {
            match &self.execute {
                Some(f) => f(Arc::clone(robot), step, batch).await,
                None => {
                    tracing::warn!(
                        action = %self.name,
                        robot = %robot.display_name(),
                        step,
                        batch,
                        "action has no execute function, treating it as a no-op"
                    );
                    Ok(Value::Null)
                }
            }
        }

        async fn finalize(
            &self,
            robot: &Arc<Robot>,
            step: usize,
            batch: usize,
        ) -> Result<(), BoxError> {
            match &self.finalize {
                Some(f) => f(Arc::clone(robot), step, batch).await,
                None => Ok(()),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn missing_execute_is_a_successful_no_op() {
            let robot = Arc::new(Robot::builder().name("r").build());
            let action = FnAction::new("noop");
            assert_eq!(action.name(), "noop");
            let value = action.execute(&robot, 0, 0).await.unwrap();
            assert_eq!(value, Value::Null);
            assert!(action.prepare(&robot, 0, 0).await.is_ok());
            assert!(action.finalize(&robot, 0, 0).await.is_ok());
        }

        #[tokio::test]
        async fn closures_see_robot_and_position() {
            let robot = Arc::new(Robot::builder().name("r").build());
            let action = FnAction::new("echo")
                .on_execute(|robot, step, batch| async move {
                    Ok(serde_json::json!([robot.name(), step, batch]))
                })
                .on_prepare(|_, step, _| async move {
                    if step == 1 {
                        Err("not ready".into())
                    } else {
                        Ok(())
                    }
                });
            let value = action.execute(&robot, 2, 5).await.unwrap();
            assert_eq!(value, serde_json::json!(["r", 2, 5]));
            assert!(action.prepare(&robot, 0, 0).await.is_ok());
            assert!(action.prepare(&robot, 1, 0).await.is_err());
        }
    }
}

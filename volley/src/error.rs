use thiserror::Error;

/// Errors raised by user code at the engine's trait seams (actions, hooks, close callbacks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that prevent a scene from running.
///
/// Everything that goes wrong *inside* a round (failing actions, panicking robots) is
/// reported through the round reports instead.
#[derive(Debug, Error)]
pub enum SceneError {
    /// A scene parameter is missing or out of range.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// Neither a default robot nor any robot template was given.
    #[error("no default robot defined for the scene")]
    UndefinedRobot,

    /// The scene's before/after hook failed.
    #[error("scene hook failed: {0}")]
    Hook(String),
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Session lifecycle. `Terminated` is absorbing: no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Starting,
    Paused,
    Running,
    Terminated,
}

impl SessionState {
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Paused | SessionState::Running)
    }
}

/// One stack level of a paused target, normalized for users: the file is an
/// absolute path (source-mapped where possible) and the line is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrame {
    pub function_name: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Protocol frame handle. Only valid while the session stays paused.
    pub call_frame_id: String,
}

/// An expression re-evaluated on every pause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedVariable {
    pub name: String,
    pub expression: String,
    #[serde(default)]
    pub last_value: Option<Value>,
}

impl WatchedVariable {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            last_value: None,
        }
    }
}

/// Recorded difference for one watched variable across a pause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchChange {
    pub previous: Option<Value>,
    pub current: Value,
}

/// Why and how the target died, as reported to crash handlers.
#[derive(Debug, Clone)]
pub struct CrashInfo {
    pub message: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

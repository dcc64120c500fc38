pub mod breakpoints;
pub mod cdp_ops;
pub mod manager;
pub mod session;
pub mod state;
pub mod variables;

pub use breakpoints::{
    Breakpoint, BreakpointKind, BreakpointManager, ExceptionBreakpoint, ExceptionPauseState,
    HitCountCondition, HitCountOp,
};
pub use manager::SessionManager;
pub use session::{DebugSession, SessionTarget};
pub use state::{CrashInfo, SessionState, StackFrame, WatchChange, WatchedVariable};
pub use variables::{EvaluatedValue, GetPropertiesOptions, PropertyInfo, VariableInspector};

//! In-process breakpoint catalogue. Pure data: the CDP half lives in
//! [`crate::debug::cdp_ops`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Comparison applied to a breakpoint's accumulated hit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitCountOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "%")]
    Mod,
}

impl HitCountOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "==" => Some(Self::Eq),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            "%" => Some(Self::Mod),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitCountCondition {
    pub op: HitCountOp,
    pub value: u64,
}

impl HitCountCondition {
    /// Whether a breakpoint with hit count `hit_count` should actually pause.
    pub fn should_pause(&self, hit_count: u64) -> bool {
        match self.op {
            HitCountOp::Eq => hit_count == self.value,
            HitCountOp::Gt => hit_count > self.value,
            HitCountOp::Ge => hit_count >= self.value,
            HitCountOp::Lt => hit_count < self.value,
            HitCountOp::Le => hit_count <= self.value,
            HitCountOp::Mod => self.value != 0 && hit_count % self.value == 0,
        }
    }
}

/// What the breakpoint is attached to. Each variant carries only the fields
/// it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BreakpointKind {
    Standard {
        file: String,
        line: u32,
        #[serde(default)]
        condition: Option<String>,
    },
    Logpoint {
        file: String,
        line: u32,
        log_message: String,
    },
    Function {
        function_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: String,
    pub kind: BreakpointKind,
    pub enabled: bool,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub hit_count_condition: Option<HitCountCondition>,
    /// Protocol handle, present only while the breakpoint is registered with
    /// a live inspector.
    #[serde(default)]
    pub cdp_breakpoint_id: Option<String>,
}

impl Breakpoint {
    /// User-visible file, when the kind has one.
    pub fn file(&self) -> Option<&str> {
        match &self.kind {
            BreakpointKind::Standard { file, .. } | BreakpointKind::Logpoint { file, .. } => {
                Some(file)
            }
            BreakpointKind::Function { .. } => None,
        }
    }

    /// User-visible 1-based line, when the kind has one.
    pub fn line(&self) -> Option<u32> {
        match &self.kind {
            BreakpointKind::Standard { line, .. } | BreakpointKind::Logpoint { line, .. } => {
                Some(*line)
            }
            BreakpointKind::Function { .. } => None,
        }
    }

    pub fn condition(&self) -> Option<&str> {
        match &self.kind {
            BreakpointKind::Standard { condition, .. } => condition.as_deref(),
            _ => None,
        }
    }
}

/// Break-on-throw configuration entry. These live in a session-local table
/// separate from the catalogue; the session composes them into one pause
/// state for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionBreakpoint {
    pub id: String,
    pub break_on_caught: bool,
    pub break_on_uncaught: bool,
    pub enabled: bool,
    #[serde(default)]
    pub filter: Option<String>,
}

/// Composed `Debugger.setPauseOnExceptions` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionPauseState {
    None,
    Caught,
    Uncaught,
    All,
}

impl ExceptionPauseState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Caught => "caught",
            Self::Uncaught => "uncaught",
            Self::All => "all",
        }
    }

    /// Collapse a table of exception breakpoints into the single mode the
    /// wire accepts. Disabled entries do not contribute.
    pub fn compose<'a>(entries: impl Iterator<Item = &'a ExceptionBreakpoint>) -> Self {
        let mut caught = false;
        let mut uncaught = false;
        for entry in entries.filter(|e| e.enabled) {
            caught |= entry.break_on_caught;
            uncaught |= entry.break_on_uncaught;
        }
        match (caught, uncaught) {
            (true, true) => Self::All,
            (true, false) => Self::Caught,
            (false, true) => Self::Uncaught,
            (false, false) => Self::None,
        }
    }
}

/// Catalogue of breakpoints for one session. Identifiers are stable for the
/// session's lifetime.
#[derive(Debug, Default)]
pub struct BreakpointManager {
    breakpoints: HashMap<String, Breakpoint>,
    next_id: u64,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("bp-{}", self.next_id)
    }

    pub fn create_breakpoint(
        &mut self,
        file: impl Into<String>,
        line: u32,
        condition: Option<String>,
    ) -> String {
        let id = self.allocate_id();
        self.breakpoints.insert(
            id.clone(),
            Breakpoint {
                id: id.clone(),
                kind: BreakpointKind::Standard {
                    file: file.into(),
                    line,
                    condition,
                },
                enabled: true,
                hit_count: 0,
                hit_count_condition: None,
                cdp_breakpoint_id: None,
            },
        );
        id
    }

    pub fn create_logpoint(
        &mut self,
        file: impl Into<String>,
        line: u32,
        log_message: impl Into<String>,
    ) -> String {
        let id = self.allocate_id();
        self.breakpoints.insert(
            id.clone(),
            Breakpoint {
                id: id.clone(),
                kind: BreakpointKind::Logpoint {
                    file: file.into(),
                    line,
                    log_message: log_message.into(),
                },
                enabled: true,
                hit_count: 0,
                hit_count_condition: None,
                cdp_breakpoint_id: None,
            },
        );
        id
    }

    pub fn create_function_breakpoint(&mut self, function_name: impl Into<String>) -> String {
        let id = self.allocate_id();
        self.breakpoints.insert(
            id.clone(),
            Breakpoint {
                id: id.clone(),
                kind: BreakpointKind::Function {
                    function_name: function_name.into(),
                },
                enabled: true,
                hit_count: 0,
                hit_count_condition: None,
                cdp_breakpoint_id: None,
            },
        );
        id
    }

    /// Adopt an externally constructed record (imports, migrations). The
    /// record's own id is kept.
    pub fn add_breakpoint(&mut self, breakpoint: Breakpoint) {
        self.breakpoints.insert(breakpoint.id.clone(), breakpoint);
    }

    pub fn get_breakpoint(&self, id: &str) -> Option<&Breakpoint> {
        self.breakpoints.get(id)
    }

    pub fn has_breakpoint(&self, id: &str) -> bool {
        self.breakpoints.contains_key(id)
    }

    pub fn get_all_breakpoints(&self) -> Vec<&Breakpoint> {
        self.breakpoints.values().collect()
    }

    pub fn get_breakpoints_by_file(&self, file: &str) -> Vec<&Breakpoint> {
        self.breakpoints
            .values()
            .filter(|bp| bp.file() == Some(file))
            .collect()
    }

    pub fn get_breakpoint_count(&self) -> usize {
        self.breakpoints.len()
    }

    /// Remove on a missing id is a non-error: returns false.
    pub fn remove_breakpoint(&mut self, id: &str) -> bool {
        self.breakpoints.remove(id).is_some()
    }

    /// Flip `enabled`, returning the new value.
    pub fn toggle_breakpoint(&mut self, id: &str) -> Option<bool> {
        let bp = self.breakpoints.get_mut(id)?;
        bp.enabled = !bp.enabled;
        Some(bp.enabled)
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.breakpoints.get_mut(id) {
            Some(bp) => {
                bp.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn update_cdp_breakpoint_id(&mut self, id: &str, cdp_id: Option<String>) -> bool {
        match self.breakpoints.get_mut(id) {
            Some(bp) => {
                bp.cdp_breakpoint_id = cdp_id;
                true
            }
            None => false,
        }
    }

    /// Bump the hit counter, returning the new count.
    pub fn increment_hit_count(&mut self, id: &str) -> Option<u64> {
        let bp = self.breakpoints.get_mut(id)?;
        bp.hit_count += 1;
        Some(bp.hit_count)
    }

    pub fn reset_hit_count(&mut self, id: &str) -> bool {
        match self.breakpoints.get_mut(id) {
            Some(bp) => {
                bp.hit_count = 0;
                true
            }
            None => false,
        }
    }

    pub fn reset_all_hit_counts(&mut self) {
        for bp in self.breakpoints.values_mut() {
            bp.hit_count = 0;
        }
    }

    pub fn set_hit_count_condition(
        &mut self,
        id: &str,
        condition: Option<HitCountCondition>,
    ) -> bool {
        match self.breakpoints.get_mut(id) {
            Some(bp) => {
                bp.hit_count_condition = condition;
                true
            }
            None => false,
        }
    }

    /// Hit-count gate. Fails open: a missing breakpoint or absent condition
    /// means "pause normally".
    pub fn should_pause_on_hit_count(&self, id: &str) -> bool {
        match self.breakpoints.get(id) {
            Some(bp) => match &bp.hit_count_condition {
                Some(cond) => cond.should_pause(bp.hit_count),
                None => true,
            },
            None => true,
        }
    }

    pub fn clear_all(&mut self) {
        self.breakpoints.clear();
    }
}

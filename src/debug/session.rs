//! Debug session lifecycle and coordination.
//!
//! A session owns exactly one target (spawned child or attached endpoint),
//! one inspector connection, and the per-target catalogues: breakpoints,
//! exception breakpoints, watched variables, call frames. State transitions
//! between `Paused` and `Running` are driven by inspector events, never by
//! the user-facing methods themselves; a step or resume merely sends the
//! command and lets `Debugger.paused`/`Debugger.resumed` move the machine.

use super::breakpoints::{
    Breakpoint, BreakpointManager, ExceptionBreakpoint, ExceptionPauseState, HitCountCondition,
};
use super::cdp_ops::CdpBreakpointOperations;
use super::state::{CrashInfo, SessionState, StackFrame, WatchChange, WatchedVariable};
use super::variables::{EvaluatedValue, VariableInspector};
use crate::inspector::types::{CallFrame, PausedParams};
use crate::inspector::InspectorClient;
use crate::process::{ProcessSpawner, SpawnConfig, SpawnMode};
use crate::profiling::{CpuProfiler, HeapProfiler, PerformanceTimeline};
use crate::source_map::{CompiledLocation, SourceLocation, SourceMapManager};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bounded wait for a `Debugger.paused` after `pause()` or launch.
const PAUSE_EVENT_TIMEOUT: Duration = Duration::from_secs(1);

/// What the session debugs: a child it spawns, or an inspector endpoint that
/// is already listening.
#[derive(Debug, Clone)]
pub enum SessionTarget {
    Launch(SpawnConfig),
    Attach { ws_url: String },
}

type CrashHandler = Box<dyn Fn(&CrashInfo) + Send + Sync>;

/// Collaborators built by `start()`. Absent until then; every operation that
/// needs the wire goes through them.
#[derive(Clone)]
struct Collaborators {
    client: Arc<InspectorClient>,
    cdp_ops: Arc<CdpBreakpointOperations>,
    variables: Arc<VariableInspector>,
    cpu_profiler: Arc<CpuProfiler>,
    heap_profiler: Arc<HeapProfiler>,
    performance: Arc<PerformanceTimeline>,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession").field("id", &self.id).finish()
    }
}

pub struct DebugSession {
    pub id: String,
    target: SessionTarget,
    state: StdRwLock<SessionState>,
    collab: StdRwLock<Option<Collaborators>>,
    breakpoints: StdRwLock<BreakpointManager>,
    exception_breakpoints: StdRwLock<HashMap<String, ExceptionBreakpoint>>,
    watches: StdRwLock<HashMap<String, WatchedVariable>>,
    watch_changes: StdRwLock<HashMap<String, WatchChange>>,
    call_frames: StdRwLock<Vec<CallFrame>>,
    current_frame: AtomicUsize,
    source_maps: SourceMapManager,
    crash_handlers: StdRwLock<Vec<CrashHandler>>,
    crash_error: StdRwLock<Option<CrashInfo>>,
    paused_notify: Notify,
    kill_tx: StdMutex<Option<oneshot::Sender<()>>>,
}

impl DebugSession {
    pub fn new(target: SessionTarget) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target,
            state: StdRwLock::new(SessionState::Starting),
            collab: StdRwLock::new(None),
            breakpoints: StdRwLock::new(BreakpointManager::new()),
            exception_breakpoints: StdRwLock::new(HashMap::new()),
            watches: StdRwLock::new(HashMap::new()),
            watch_changes: StdRwLock::new(HashMap::new()),
            call_frames: StdRwLock::new(Vec::new()),
            current_frame: AtomicUsize::new(0),
            source_maps: SourceMapManager::new(),
            crash_handlers: StdRwLock::new(Vec::new()),
            crash_error: StdRwLock::new(None),
            paused_notify: Notify::new(),
            kill_tx: StdMutex::new(None),
        }
    }

    /// Convenience constructor for the common launch case.
    pub fn launch(command: impl Into<String>, args: Vec<String>, mode: SpawnMode) -> Self {
        Self::new(SessionTarget::Launch(SpawnConfig::new(command, args, mode)))
    }

    // === Lifecycle ===

    /// Spawn (or attach to) the target, negotiate the protocol session, and
    /// wait for the initial pause. On any failure the session ends up
    /// `Terminated` and the error propagates.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        {
            let state = self.state.read().unwrap();
            if *state != SessionState::Starting {
                return Err(Error::BadState(format!(
                    "start requires a fresh session, state is {:?}",
                    *state
                )));
            }
        }

        let result = self.clone().start_inner().await;
        if let Err(e) = &result {
            error!("Session {} failed to start: {}", self.id, e);
            let _ = self.cleanup().await;
        }
        result
    }

    async fn start_inner(self: Arc<Self>) -> Result<()> {
        let (child, ws_url, break_mode) = match &self.target {
            SessionTarget::Launch(config) => {
                let spawned = ProcessSpawner::spawn(config).await?;
                (
                    Some(spawned.child),
                    spawned.ws_url,
                    config.mode == SpawnMode::Break,
                )
            }
            SessionTarget::Attach { ws_url } => (None, ws_url.clone(), false),
        };

        let client = Arc::new(InspectorClient::connect(&ws_url).await?);

        let cdp_ops = Arc::new(CdpBreakpointOperations::new(client.clone()));
        cdp_ops.install().await;

        let collaborators = Collaborators {
            client: client.clone(),
            cdp_ops: cdp_ops.clone(),
            variables: Arc::new(VariableInspector::new(client.clone())),
            cpu_profiler: Arc::new(CpuProfiler::new(client.clone())),
            heap_profiler: Arc::new(HeapProfiler::new(client.clone())),
            performance: Arc::new(PerformanceTimeline::new(client.clone())),
        };
        *self.collab.write().unwrap() = Some(collaborators);

        Self::install_event_handlers(&self, &client).await;
        if let Some(child) = child {
            Self::spawn_child_monitor(&self, child);
        }

        client.send("Debugger.enable", None).await?;
        client.send("Runtime.enable", None).await?;

        let exception_state = self.exception_pause_state();
        if exception_state != ExceptionPauseState::None {
            cdp_ops.set_pause_on_exceptions(exception_state).await?;
        }

        self.apply_catalogue_breakpoints().await;

        let notified = self.paused_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        client.send("Runtime.runIfWaitingForDebugger", None).await?;

        match tokio::time::timeout(PAUSE_EVENT_TIMEOUT, notified).await {
            Ok(()) => {
                debug!("Session {} received its initial pause", self.id);
            }
            Err(_) => {
                // A break-mode target is stopped at its first statement even
                // when the event was not observed in time; a running-mode or
                // attached target was never going to pause.
                let mut state = self.state.write().unwrap();
                if *state == SessionState::Starting {
                    *state = if break_mode {
                        SessionState::Paused
                    } else {
                        SessionState::Running
                    };
                }
            }
        }

        info!(
            "Session {} started ({:?})",
            self.id,
            *self.state.read().unwrap()
        );
        Ok(())
    }

    async fn install_event_handlers(session: &Arc<Self>, client: &InspectorClient) {
        let weak = Arc::downgrade(session);
        client
            .on("Debugger.paused", move |event| {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                let params = match serde_json::from_value::<PausedParams>(event.params) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!("Unparseable Debugger.paused payload: {}", e);
                        return;
                    }
                };
                tokio::spawn(async move {
                    session.handle_paused(params).await;
                });
            })
            .await;

        let weak = Arc::downgrade(session);
        client
            .on("Debugger.resumed", move |_event| {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                session.handle_resumed();
            })
            .await;
    }

    /// Paused episode entry: capture frames, gate on hit counts, evaluate
    /// watches, then wake anyone waiting for the pause. Watch evaluation
    /// completes before the notify so a caller observing `Paused` also sees
    /// the fresh change map.
    async fn handle_paused(&self, params: PausedParams) {
        if *self.state.read().unwrap() == SessionState::Terminated {
            return;
        }

        *self.call_frames.write().unwrap() = params.call_frames;
        self.current_frame.store(0, Ordering::SeqCst);

        if !params.hit_breakpoints.is_empty() && !self.should_stay_paused(&params.hit_breakpoints) {
            // The target never becomes user-visibly paused; the resume flows
            // back as `Debugger.resumed`.
            debug!("Hit-count condition not met, resuming target");
            if let Ok(collab) = self.live_collab() {
                if let Err(e) = collab.client.send("Debugger.resume", None).await {
                    warn!("Auto-resume after hit-count gate failed: {}", e);
                }
            }
            return;
        }

        self.run_watch_round().await;

        // State flips only after frames and watches are in place, so an
        // operation that observes Paused also sees the finished pause work.
        {
            let mut state = self.state.write().unwrap();
            if *state == SessionState::Terminated {
                return;
            }
            *state = SessionState::Paused;
        }
        self.paused_notify.notify_waiters();
    }

    /// Bump hit counters for every catalogue entry behind the hit CDP ids
    /// and report whether at least one of them wants the pause.
    fn should_stay_paused(&self, hit_cdp_ids: &[String]) -> bool {
        let mut catalogue = self.breakpoints.write().unwrap();
        let ids: Vec<String> = catalogue
            .get_all_breakpoints()
            .iter()
            .filter(|bp| {
                bp.cdp_breakpoint_id
                    .as_deref()
                    .is_some_and(|cdp| hit_cdp_ids.iter().any(|hit| hit == cdp))
            })
            .map(|bp| bp.id.clone())
            .collect();

        if ids.is_empty() {
            // Pause not caused by a catalogued breakpoint; keep it.
            return true;
        }

        let mut keep = false;
        for id in ids {
            catalogue.increment_hit_count(&id);
            keep |= catalogue.should_pause_on_hit_count(&id);
        }
        keep
    }

    fn handle_resumed(&self) {
        {
            let mut state = self.state.write().unwrap();
            if *state == SessionState::Terminated {
                return;
            }
            *state = SessionState::Running;
        }
        self.call_frames.write().unwrap().clear();
        self.current_frame.store(0, Ordering::SeqCst);
    }

    fn spawn_child_monitor(session: &Arc<Self>, mut child: tokio::process::Child) {
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        *session.kill_tx.lock().unwrap() = Some(kill_tx);

        let weak = Arc::downgrade(session);
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let Some(session) = weak.upgrade() else { return; };
                    session.handle_child_exit(status).await;
                }
                _ = kill_rx => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        });
    }

    async fn handle_child_exit(&self, status: std::io::Result<std::process::ExitStatus>) {
        {
            let mut state = self.state.write().unwrap();
            if *state == SessionState::Terminated {
                return;
            }
            *state = SessionState::Terminated;
        }

        let crash = match status {
            Ok(status) => {
                let code = status.code();
                #[cfg(unix)]
                let signal = std::os::unix::process::ExitStatusExt::signal(&status);
                #[cfg(not(unix))]
                let signal: Option<i32> = None;

                if code == Some(0) && signal.is_none() {
                    None
                } else {
                    let message = match signal {
                        Some(sig) => format!("Process crashed with signal {}", sig),
                        None => format!("Process crashed with exit code {}", code.unwrap_or(-1)),
                    };
                    Some(CrashInfo {
                        message,
                        exit_code: code,
                        signal,
                    })
                }
            }
            Err(e) => Some(CrashInfo {
                message: format!("Process error: {}", e),
                exit_code: None,
                signal: None,
            }),
        };

        if let Some(crash) = crash {
            warn!("Session {}: {}", self.id, crash.message);
            *self.crash_error.write().unwrap() = Some(crash.clone());
            self.fire_crash_handlers(&crash);
        } else {
            info!("Session {}: target exited cleanly", self.id);
        }

        if let Err(e) = self.cleanup().await {
            debug!("Cleanup after child exit failed: {}", e);
        }
    }

    /// Crash fan-out: insertion order, one invocation per handler, a panic in
    /// one subscriber never reaches the next.
    fn fire_crash_handlers(&self, crash: &CrashInfo) {
        let handlers = self.crash_handlers.read().unwrap();
        for handler in handlers.iter() {
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(crash))).is_err() {
                warn!("Crash handler panicked; continuing with remaining handlers");
            }
        }
    }

    pub fn on_crash<F>(&self, handler: F)
    where
        F: Fn(&CrashInfo) + Send + Sync + 'static,
    {
        self.crash_handlers.write().unwrap().push(Box::new(handler));
    }

    pub fn has_crashed(&self) -> bool {
        self.crash_error.read().unwrap().is_some()
    }

    pub fn crash_error(&self) -> Option<CrashInfo> {
        self.crash_error.read().unwrap().clone()
    }

    /// Tear everything down: CDP breakpoints (best effort), inspector
    /// connection, child process, catalogues, caches. Idempotent.
    pub async fn cleanup(&self) -> Result<()> {
        if let Ok(collab) = self.live_collab() {
            let cdp_ids: Vec<String> = {
                let catalogue = self.breakpoints.read().unwrap();
                catalogue
                    .get_all_breakpoints()
                    .iter()
                    .filter_map(|bp| bp.cdp_breakpoint_id.clone())
                    .collect()
            };
            for cdp_id in cdp_ids {
                if let Err(e) = collab.cdp_ops.remove_breakpoint(&cdp_id).await {
                    debug!("Removing breakpoint {} during cleanup failed: {}", cdp_id, e);
                }
            }
            collab.client.disconnect().await;
        }

        if let Some(kill) = self.kill_tx.lock().unwrap().take() {
            let _ = kill.send(());
        }

        self.breakpoints.write().unwrap().clear_all();
        self.watches.write().unwrap().clear();
        self.watch_changes.write().unwrap().clear();
        self.exception_breakpoints.write().unwrap().clear();
        self.call_frames.write().unwrap().clear();
        self.current_frame.store(0, Ordering::SeqCst);
        self.source_maps.clear_cache().await;

        *self.state.write().unwrap() = SessionState::Terminated;
        Ok(())
    }

    // === Execution control ===

    /// Ask the target to pause and wait (bounded) for the event so call
    /// frames are populated when this returns. If the event does not arrive
    /// the state is forced to `Paused`.
    pub async fn pause(&self) -> Result<()> {
        self.require_state(SessionState::Running, "pause")?;
        let collab = self.live_collab()?;

        let notified = self.paused_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        collab.client.send("Debugger.pause", None).await?;

        if tokio::time::timeout(PAUSE_EVENT_TIMEOUT, notified)
            .await
            .is_err()
        {
            warn!("No paused event within {:?}, forcing Paused", PAUSE_EVENT_TIMEOUT);
            let mut state = self.state.write().unwrap();
            if *state != SessionState::Terminated {
                *state = SessionState::Paused;
            }
        }
        Ok(())
    }

    /// Let the target run. The state flips to `Running` when
    /// `Debugger.resumed` arrives, not here.
    pub async fn resume(&self) -> Result<()> {
        self.require_state(SessionState::Paused, "resume")?;
        let collab = self.live_collab()?;
        collab.client.send("Debugger.resume", None).await?;
        Ok(())
    }

    pub async fn step_over(&self) -> Result<()> {
        self.step("stepOver").await
    }

    pub async fn step_into(&self) -> Result<()> {
        self.step("stepInto").await
    }

    pub async fn step_out(&self) -> Result<()> {
        self.step("stepOut").await
    }

    async fn step(&self, method: &str) -> Result<()> {
        self.require_state(SessionState::Paused, method)?;
        let collab = self.live_collab()?;
        collab
            .client
            .send(&format!("Debugger.{}", method), None)
            .await?;
        Ok(())
    }

    // === Breakpoints ===

    /// Create a breakpoint at a user-visible location. A `.ts`/`.tsx` file is
    /// translated through the source map for the wire call, but the catalogue
    /// entry stays keyed to the path the user gave.
    pub async fn set_breakpoint(
        &self,
        file: &str,
        line: u32,
        condition: Option<String>,
    ) -> Result<String> {
        let id = self
            .breakpoints
            .write()
            .unwrap()
            .create_breakpoint(file, line, condition);
        self.register_with_inspector(&id).await?;
        Ok(id)
    }

    /// A breakpoint that logs instead of pausing.
    pub async fn set_logpoint(&self, file: &str, line: u32, log_message: &str) -> Result<String> {
        let id = self
            .breakpoints
            .write()
            .unwrap()
            .create_logpoint(file, line, log_message);
        self.register_with_inspector(&id).await?;
        Ok(id)
    }

    pub async fn set_function_breakpoint(&self, function_name: &str) -> Result<String> {
        let id = self
            .breakpoints
            .write()
            .unwrap()
            .create_function_breakpoint(function_name);
        self.register_with_inspector(&id).await?;
        Ok(id)
    }

    pub fn set_breakpoint_hit_count_condition(
        &self,
        id: &str,
        condition: Option<HitCountCondition>,
    ) -> bool {
        self.breakpoints
            .write()
            .unwrap()
            .set_hit_count_condition(id, condition)
    }

    /// Remove from the inspector (when registered) and the catalogue.
    /// Unknown ids report `false` rather than erroring.
    pub async fn remove_breakpoint(&self, id: &str) -> Result<bool> {
        let cdp_id = self
            .breakpoints
            .read()
            .unwrap()
            .get_breakpoint(id)
            .and_then(|bp| bp.cdp_breakpoint_id.clone());

        if let Some(cdp_id) = cdp_id {
            if let Ok(collab) = self.live_collab() {
                collab.cdp_ops.remove_breakpoint(&cdp_id).await?;
            }
        }

        Ok(self.breakpoints.write().unwrap().remove_breakpoint(id))
    }

    /// Flip enablement, registering or unregistering with the inspector as
    /// needed. `None` means the id is unknown.
    pub async fn toggle_breakpoint(&self, id: &str) -> Result<Option<bool>> {
        let Some(enabled) = self.breakpoints.write().unwrap().toggle_breakpoint(id) else {
            return Ok(None);
        };

        if enabled {
            let has_cdp = self
                .breakpoints
                .read()
                .unwrap()
                .get_breakpoint(id)
                .is_some_and(|bp| bp.cdp_breakpoint_id.is_some());
            if !has_cdp {
                self.register_with_inspector(id).await?;
            }
        } else {
            let cdp_id = self
                .breakpoints
                .read()
                .unwrap()
                .get_breakpoint(id)
                .and_then(|bp| bp.cdp_breakpoint_id.clone());
            if let Some(cdp_id) = cdp_id {
                if let Ok(collab) = self.live_collab() {
                    collab.cdp_ops.remove_breakpoint(&cdp_id).await?;
                }
                self.breakpoints
                    .write()
                    .unwrap()
                    .update_cdp_breakpoint_id(id, None);
            }
        }

        Ok(Some(enabled))
    }

    /// Register one catalogue entry with the inspector, if the session is
    /// live and the entry is enabled. Before `start()` this is a no-op: the
    /// entry waits in the catalogue.
    async fn register_with_inspector(&self, id: &str) -> Result<()> {
        let Ok(collab) = self.live_collab() else {
            return Ok(());
        };

        let bp = self.breakpoints.read().unwrap().get_breakpoint(id).cloned();
        let Some(bp) = bp else { return Ok(()) };
        if !bp.enabled {
            return Ok(());
        }

        let compiled = match (bp.file(), bp.line()) {
            (Some(file), Some(line)) => self.compiled_location_for(file, line).await,
            _ => None,
        };

        let cdp_id = collab.cdp_ops.set_breakpoint(&bp, compiled.as_ref()).await?;
        self.breakpoints
            .write()
            .unwrap()
            .update_cdp_breakpoint_id(id, cdp_id);
        Ok(())
    }

    /// Push every enabled catalogue entry to a freshly started inspector.
    /// Per-entry failures are logged and skipped so one bad location does not
    /// sink the launch.
    async fn apply_catalogue_breakpoints(&self) {
        let ids: Vec<String> = {
            let catalogue = self.breakpoints.read().unwrap();
            catalogue
                .get_all_breakpoints()
                .iter()
                .filter(|bp| bp.enabled && bp.cdp_breakpoint_id.is_none())
                .map(|bp| bp.id.clone())
                .collect()
        };
        for id in ids {
            if let Err(e) = self.register_with_inspector(&id).await {
                warn!("Applying breakpoint {} failed: {}", id, e);
            }
        }
    }

    async fn compiled_location_for(&self, file: &str, line: u32) -> Option<CompiledLocation> {
        if !(file.ends_with(".ts") || file.ends_with(".tsx")) {
            return None;
        }
        self.source_maps
            .map_source_to_compiled(&SourceLocation {
                file: file.to_string(),
                line,
                column: 0,
            })
            .await
    }

    pub fn get_breakpoint(&self, id: &str) -> Option<Breakpoint> {
        self.breakpoints.read().unwrap().get_breakpoint(id).cloned()
    }

    pub fn has_breakpoint(&self, id: &str) -> bool {
        self.breakpoints.read().unwrap().has_breakpoint(id)
    }

    pub fn get_all_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints
            .read()
            .unwrap()
            .get_all_breakpoints()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn get_breakpoints_by_file(&self, file: &str) -> Vec<Breakpoint> {
        self.breakpoints
            .read()
            .unwrap()
            .get_breakpoints_by_file(file)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn get_breakpoint_count(&self) -> usize {
        self.breakpoints.read().unwrap().get_breakpoint_count()
    }

    pub fn should_pause_on_hit_count(&self, id: &str) -> bool {
        self.breakpoints.read().unwrap().should_pause_on_hit_count(id)
    }

    pub fn reset_hit_count(&self, id: &str) -> bool {
        self.breakpoints.write().unwrap().reset_hit_count(id)
    }

    pub fn reset_all_hit_counts(&self) {
        self.breakpoints.write().unwrap().reset_all_hit_counts()
    }

    // === Exception breakpoints ===

    /// Store the entry and push the recomposed pause-on-exceptions mode.
    pub async fn add_exception_breakpoint(&self, entry: ExceptionBreakpoint) -> Result<()> {
        self.exception_breakpoints
            .write()
            .unwrap()
            .insert(entry.id.clone(), entry);
        self.sync_exception_state().await
    }

    pub async fn remove_exception_breakpoint(&self, id: &str) -> Result<bool> {
        let removed = self
            .exception_breakpoints
            .write()
            .unwrap()
            .remove(id)
            .is_some();
        self.sync_exception_state().await?;
        Ok(removed)
    }

    pub fn exception_pause_state(&self) -> ExceptionPauseState {
        let table = self.exception_breakpoints.read().unwrap();
        ExceptionPauseState::compose(table.values())
    }

    async fn sync_exception_state(&self) -> Result<()> {
        let state = self.exception_pause_state();
        if let Ok(collab) = self.live_collab() {
            collab.cdp_ops.set_pause_on_exceptions(state).await?;
        }
        Ok(())
    }

    // === Call stack ===

    /// Normalized stack of the current pause: `file://` stripped, paths
    /// absolutized against the target's cwd, locations mapped back to
    /// authored sources where a map exists.
    pub async fn get_call_stack(&self) -> Result<Vec<StackFrame>> {
        self.require_state(SessionState::Paused, "getCallStack")?;
        let raw = self.call_frames.read().unwrap().clone();

        let mut frames = Vec::with_capacity(raw.len());
        for frame in &raw {
            let mut normalized = self.normalize_frame(frame);
            if normalized.file.starts_with('/') {
                if let Some(source) = self
                    .source_maps
                    .map_compiled_to_source(&CompiledLocation {
                        file: normalized.file.clone(),
                        line: normalized.line,
                        column: normalized.column,
                    })
                    .await
                {
                    normalized.file = source.file;
                    normalized.line = source.line;
                    normalized.column = source.column;
                }
            }
            frames.push(normalized);
        }
        Ok(frames)
    }

    /// Like `get_call_stack` but without source-map translation.
    pub fn get_call_stack_sync(&self) -> Result<Vec<StackFrame>> {
        self.require_state(SessionState::Paused, "getCallStackSync")?;
        let raw = self.call_frames.read().unwrap();
        Ok(raw.iter().map(|f| self.normalize_frame(f)).collect())
    }

    fn normalize_frame(&self, frame: &CallFrame) -> StackFrame {
        let mut file = frame
            .url
            .strip_prefix("file://")
            .unwrap_or(&frame.url)
            .to_string();

        if !file.is_empty() && !file.starts_with('/') && !file.contains(':') {
            let base = self.target_cwd();
            file = base.join(&file).to_string_lossy().into_owned();
        }

        StackFrame {
            function_name: if frame.function_name.is_empty() {
                "<anonymous>".to_string()
            } else {
                frame.function_name.clone()
            },
            file,
            line: frame.location.line_number + 1,
            column: frame.location.column_number.unwrap_or(0),
            call_frame_id: frame.call_frame_id.clone(),
        }
    }

    fn target_cwd(&self) -> PathBuf {
        if let SessionTarget::Launch(config) = &self.target {
            if let Some(cwd) = &config.cwd {
                return PathBuf::from(shellexpand::tilde(cwd).as_ref());
            }
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
    }

    /// Select the frame used by subsequent evaluations.
    pub fn switch_to_frame(&self, index: usize) -> Result<()> {
        self.require_state(SessionState::Paused, "switchToFrame")?;
        let frames = self.call_frames.read().unwrap();
        if index >= frames.len() {
            return Err(Error::BadState(format!(
                "frame index {} out of range (stack depth {})",
                index,
                frames.len()
            )));
        }
        self.current_frame.store(index, Ordering::SeqCst);
        Ok(())
    }

    pub fn current_frame_index(&self) -> usize {
        self.current_frame.load(Ordering::SeqCst)
    }

    // === Evaluation & watches ===

    /// Evaluate an expression in the currently selected frame.
    pub async fn evaluate(&self, expression: &str) -> Result<EvaluatedValue> {
        self.require_state(SessionState::Paused, "evaluate")?;
        let collab = self.live_collab()?;

        let frame_id = {
            let frames = self.call_frames.read().unwrap();
            let index = self.current_frame.load(Ordering::SeqCst);
            frames
                .get(index)
                .map(|f| f.call_frame_id.clone())
                .ok_or_else(|| Error::BadState("no call frames captured".to_string()))?
        };

        collab.variables.evaluate_expression(expression, &frame_id).await
    }

    /// Idempotent on the name: a watch that already exists is left as is.
    pub fn add_watched_variable(&self, name: &str, expression: &str) {
        self.watches
            .write()
            .unwrap()
            .entry(name.to_string())
            .or_insert_with(|| WatchedVariable::new(name, expression));
    }

    pub fn remove_watched_variable(&self, name: &str) -> bool {
        self.watches.write().unwrap().remove(name).is_some()
    }

    pub fn watched_variables(&self) -> Vec<WatchedVariable> {
        self.watches.read().unwrap().values().cloned().collect()
    }

    /// Re-evaluate every watch against the top frame, update `last_value`,
    /// and return this round's differences.
    pub async fn evaluate_watched_variables(&self) -> Result<HashMap<String, WatchChange>> {
        self.require_state(SessionState::Paused, "evaluateWatchedVariables")?;
        Ok(self.run_watch_round().await)
    }

    /// Accumulated changes since the last explicit clear.
    pub fn watched_variable_changes(&self) -> HashMap<String, WatchChange> {
        self.watch_changes.read().unwrap().clone()
    }

    pub fn clear_watched_variable_changes(&self) {
        self.watch_changes.write().unwrap().clear();
    }

    /// One evaluation round. Per-variable failures are swallowed so the
    /// pause handler stays alive; a first evaluation records the value but
    /// reports no change.
    async fn run_watch_round(&self) -> HashMap<String, WatchChange> {
        let Ok(collab) = self.live_collab() else {
            return HashMap::new();
        };
        let frame_id = self
            .call_frames
            .read()
            .unwrap()
            .first()
            .map(|f| f.call_frame_id.clone());
        let Some(frame_id) = frame_id else {
            return HashMap::new();
        };

        let snapshot: Vec<WatchedVariable> =
            self.watches.read().unwrap().values().cloned().collect();

        let mut round: HashMap<String, WatchChange> = HashMap::new();
        for watch in snapshot {
            let observed = match collab
                .variables
                .evaluate_expression(&watch.expression, &frame_id)
                .await
            {
                Ok(value) => comparable_value(&value),
                Err(e) => {
                    debug!("Watched variable '{}' failed to evaluate: {}", watch.name, e);
                    continue;
                }
            };

            let mut watches = self.watches.write().unwrap();
            let Some(entry) = watches.get_mut(&watch.name) else {
                continue;
            };
            if let Some(previous) = &entry.last_value {
                if *previous != observed {
                    round.insert(
                        watch.name.clone(),
                        WatchChange {
                            previous: Some(previous.clone()),
                            current: observed.clone(),
                        },
                    );
                }
            }
            entry.last_value = Some(observed);
        }

        if !round.is_empty() {
            self.watch_changes
                .write()
                .unwrap()
                .extend(round.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        round
    }

    // === Introspection ===

    pub fn get_state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    pub fn source_maps(&self) -> &SourceMapManager {
        &self.source_maps
    }

    pub fn cpu_profiler(&self) -> Result<Arc<CpuProfiler>> {
        Ok(self.live_collab()?.cpu_profiler)
    }

    pub fn heap_profiler(&self) -> Result<Arc<HeapProfiler>> {
        Ok(self.live_collab()?.heap_profiler)
    }

    pub fn performance_timeline(&self) -> Result<Arc<PerformanceTimeline>> {
        Ok(self.live_collab()?.performance)
    }

    fn require_state(&self, expected: SessionState, operation: &str) -> Result<()> {
        let state = *self.state.read().unwrap();
        if state != expected {
            return Err(Error::BadState(format!(
                "{} requires {:?}, session is {:?}",
                operation, expected, state
            )));
        }
        Ok(())
    }

    fn live_collab(&self) -> Result<Collaborators> {
        self.collab
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::NotStarted(self.id.clone()))
    }

    #[cfg(test)]
    pub(crate) fn force_state_for_test(&self, state: SessionState) {
        *self.state.write().unwrap() = state;
    }

    #[cfg(test)]
    pub(crate) fn force_frames_for_test(&self, frames: Vec<CallFrame>) {
        *self.call_frames.write().unwrap() = frames;
    }
}

/// Value used for watch diffing: inline value when the target returned one,
/// otherwise the remote description.
fn comparable_value(value: &EvaluatedValue) -> Value {
    if let Some(inline) = &value.value {
        return inline.clone();
    }
    if let Some(description) = &value.description {
        return Value::String(description.clone());
    }
    Value::Null
}

//! Standalone hang / infinite-loop detector.
//!
//! Spawns the target in running mode, watches it through the inspector, and
//! resolves exactly once: clean exit, idle completion, stall detected by
//! repeated identical stack samples, or overall timeout. All paths converge
//! on a single sink that releases the child and the WebSocket.

use crate::inspector::types::PausedParams;
use crate::inspector::{InspectorClient, WILDCARD_EVENT};
use crate::process::{kill_child, ProcessSpawner, SpawnConfig, SpawnMode};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

/// How long a pause capture waits on the timeout path.
const TIMEOUT_CAPTURE_WAIT: Duration = Duration::from_millis(500);
/// How long each periodic sample waits for its pause.
const SAMPLE_CAPTURE_WAIT: Duration = Duration::from_millis(100);
/// Inspector silence taken to mean the target finished its work.
const IDLE_THRESHOLD: Duration = Duration::from_millis(300);
/// Minimum runtime before the idle monitor may declare completion.
const IDLE_MIN_ELAPSED: Duration = Duration::from_millis(150);

#[derive(Debug, Clone)]
pub struct HangCheckConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub timeout: Duration,
    /// When set, a periodic stack sampler looks for the target spinning at
    /// one location; otherwise only the overall timeout and the idle monitor
    /// apply.
    pub sample_interval: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HangResult {
    pub hung: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Single-resolution sink. The first caller wins; later outcomes are
/// dropped.
struct Resolver {
    tx: StdMutex<Option<oneshot::Sender<HangResult>>>,
    started: Instant,
}

impl Resolver {
    fn new(tx: oneshot::Sender<HangResult>, started: Instant) -> Self {
        Self {
            tx: StdMutex::new(Some(tx)),
            started,
        }
    }

    fn resolve(&self, mut result: HangResult) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            result.duration_ms = self.started.elapsed().as_millis() as u64;
            let _ = tx.send(result);
        }
    }
}

/// Snapshot of the most recent pause, fed by the `Debugger.paused` handler.
#[derive(Default)]
struct PauseCapture {
    params: StdMutex<Option<PausedParams>>,
    notify: Notify,
}

pub struct HangDetector;

impl HangDetector {
    /// Run the target to completion or verdict.
    pub async fn run(config: HangCheckConfig) -> Result<HangResult> {
        let started = Instant::now();

        let spawn_config = SpawnConfig::new(
            config.command.clone(),
            config.args.clone(),
            SpawnMode::Running,
        )
        .with_cwd(config.cwd.clone());
        let spawned = ProcessSpawner::spawn(&spawn_config).await?;

        let client = Arc::new(InspectorClient::connect(&spawned.ws_url).await?);
        let child = Arc::new(tokio::sync::Mutex::new(Some(spawned.child)));

        let (result_tx, result_rx) = oneshot::channel();
        let resolver = Arc::new(Resolver::new(result_tx, started));

        // scriptId -> url, for frames whose url field is empty.
        let scripts: Arc<StdRwLock<HashMap<String, String>>> =
            Arc::new(StdRwLock::new(HashMap::new()));
        {
            let scripts = scripts.clone();
            client
                .on("Debugger.scriptParsed", move |event| {
                    let (Some(id), Some(url)) = (
                        event.params["scriptId"].as_str(),
                        event.params["url"].as_str(),
                    ) else {
                        return;
                    };
                    scripts
                        .write()
                        .unwrap()
                        .insert(id.to_string(), url.to_string());
                })
                .await;
        }

        let capture = Arc::new(PauseCapture::default());
        {
            let capture = capture.clone();
            client
                .on("Debugger.paused", move |event| {
                    if let Ok(params) = serde_json::from_value::<PausedParams>(event.params) {
                        *capture.params.lock().unwrap() = Some(params);
                        capture.notify.notify_waiters();
                    }
                })
                .await;
        }

        // Any inspector traffic counts as activity for the idle monitor.
        let last_activity = Arc::new(StdMutex::new(Instant::now()));
        {
            let last_activity = last_activity.clone();
            client
                .on(WILDCARD_EVENT, move |_| {
                    *last_activity.lock().unwrap() = Instant::now();
                })
                .await;
        }

        client.send("Debugger.enable", None).await?;
        client.send("Runtime.enable", None).await?;

        let mut tasks = Vec::new();

        // Exit watcher: clean completion wins over every detector.
        {
            let child = child.clone();
            let resolver = resolver.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    {
                        let mut slot = child.lock().await;
                        let Some(target) = slot.as_mut() else { break };
                        match target.try_wait() {
                            Ok(Some(status)) => {
                                resolver.resolve(HangResult {
                                    hung: false,
                                    completed: Some(true),
                                    exit_code: status.code(),
                                    location: None,
                                    stack: None,
                                    message: None,
                                    duration_ms: 0,
                                });
                                break;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                debug!("try_wait failed: {}", e);
                                break;
                            }
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }));
        }

        // Overall timeout: pause, grab the top frame, report the hang.
        {
            let client = client.clone();
            let resolver = resolver.clone();
            let capture = capture.clone();
            let scripts = scripts.clone();
            let timeout = config.timeout;
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let params =
                    Self::pause_and_capture(&client, &capture, TIMEOUT_CAPTURE_WAIT).await;
                let (location, stack) = describe_pause(params.as_ref(), &scripts);
                resolver.resolve(HangResult {
                    hung: true,
                    completed: None,
                    exit_code: None,
                    location,
                    stack,
                    message: Some(format!(
                        "Execution did not complete within {}ms",
                        timeout.as_millis()
                    )),
                    duration_ms: 0,
                });
            }));
        }

        match config.sample_interval {
            None => {
                // Idle monitor: covers targets that finish their work before
                // the runtime reports a clean exit over the inspector.
                let resolver = resolver.clone();
                let last_activity = last_activity.clone();
                let window = idle_window(config.timeout);
                tasks.push(tokio::spawn(async move {
                    let begun = Instant::now();
                    loop {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        if begun.elapsed() > window {
                            break;
                        }
                        let idle = last_activity.lock().unwrap().elapsed();
                        if idle >= IDLE_THRESHOLD && begun.elapsed() >= IDLE_MIN_ELAPSED {
                            resolver.resolve(HangResult {
                                hung: false,
                                completed: Some(true),
                                exit_code: Some(0),
                                location: None,
                                stack: None,
                                message: None,
                                duration_ms: 0,
                            });
                            break;
                        }
                    }
                }));
            }
            Some(interval) => {
                let client = client.clone();
                let resolver = resolver.clone();
                let capture = capture.clone();
                let scripts = scripts.clone();
                let timeout = config.timeout;
                let required = required_consecutive_samples(timeout, interval);
                tasks.push(tokio::spawn(async move {
                    let begun = Instant::now();
                    let mut previous: Option<String> = None;
                    let mut consecutive = 0usize;

                    while begun.elapsed() < timeout.mul_f64(0.9) {
                        tokio::time::sleep(interval).await;

                        let params =
                            Self::pause_and_capture(&client, &capture, SAMPLE_CAPTURE_WAIT).await;
                        let (location, stack) = describe_pause(params.as_ref(), &scripts);
                        if let Err(e) = client.send("Debugger.resume", None).await {
                            debug!("Sampler resume failed: {}", e);
                            break;
                        }

                        let Some(location) = location else { continue };
                        if previous.as_deref() == Some(location.as_str()) {
                            consecutive += 1;
                        } else {
                            consecutive = 1;
                            previous = Some(location.clone());
                        }

                        if consecutive >= required {
                            resolver.resolve(HangResult {
                                hung: true,
                                completed: None,
                                exit_code: None,
                                message: Some(format!(
                                    "Infinite loop detected at {}",
                                    location
                                )),
                                location: Some(location),
                                stack,
                                duration_ms: 0,
                            });
                            break;
                        }
                    }
                }));
            }
        }

        let result = result_rx.await.map_err(|_| {
            Error::Transport("hang detection ended without a verdict".to_string())
        })?;

        // Single exit path: timers die, the socket closes, the child goes.
        for task in &tasks {
            task.abort();
        }
        client.disconnect().await;
        if let Some(mut target) = child.lock().await.take() {
            if target.try_wait().ok().flatten().is_none() {
                info!("Releasing target process");
                kill_child(&mut target).await;
            }
        }

        Ok(result)
    }

    /// Issue `Debugger.pause` and wait (bounded) for the event, returning the
    /// captured frames. The pause command failing (already paused, racing
    /// exit) is not fatal.
    async fn pause_and_capture(
        client: &InspectorClient,
        capture: &PauseCapture,
        wait: Duration,
    ) -> Option<PausedParams> {
        capture.params.lock().unwrap().take();

        let notified = capture.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Err(e) = client
            .send_with_timeout("Debugger.pause", None, TIMEOUT_CAPTURE_WAIT)
            .await
        {
            warn!("Debugger.pause failed: {}", e);
        }

        let _ = tokio::time::timeout(wait, notified).await;
        capture.params.lock().unwrap().clone()
    }
}

fn idle_window(timeout: Duration) -> Duration {
    timeout.mul_f64(0.2).min(Duration::from_secs(1))
}

fn required_consecutive_samples(timeout: Duration, interval: Duration) -> usize {
    let by_ratio = (timeout.as_millis() / 2) / interval.as_millis().max(1);
    (by_ratio as usize).max(50)
}

/// Top-of-stack `"file:line"` plus a rendered stack, from captured pause
/// frames.
fn describe_pause(
    params: Option<&PausedParams>,
    scripts: &StdRwLock<HashMap<String, String>>,
) -> (Option<String>, Option<Vec<String>>) {
    let Some(params) = params else {
        return (None, None);
    };
    let Some(top) = params.call_frames.first() else {
        return (None, None);
    };

    let scripts = scripts.read().unwrap();
    let frame_file = |frame: &crate::inspector::types::CallFrame| -> String {
        let url = if frame.url.is_empty() {
            scripts
                .get(&frame.location.script_id)
                .cloned()
                .unwrap_or_else(|| format!("script:{}", frame.location.script_id))
        } else {
            frame.url.clone()
        };
        url.strip_prefix("file://").unwrap_or(&url).to_string()
    };

    let location = format!("{}:{}", frame_file(top), top.location.line_number + 1);
    let stack = params
        .call_frames
        .iter()
        .map(|frame| {
            let name = if frame.function_name.is_empty() {
                "<anonymous>"
            } else {
                &frame.function_name
            };
            format!(
                "{} ({}:{})",
                name,
                frame_file(frame),
                frame.location.line_number + 1
            )
        })
        .collect();

    (Some(location), Some(stack))
}

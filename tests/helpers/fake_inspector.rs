//! In-process WebSocket server speaking the subset of CDP the orchestrator
//! uses, standing in for a live runtime in integration tests.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

#[derive(Default)]
pub struct FakeState {
    /// expression -> full `evaluateOnCallFrame` reply body.
    pub eval_replies: Mutex<HashMap<String, Value>>,
    /// objectId -> full `getProperties` reply body.
    pub property_replies: Mutex<HashMap<String, Value>>,
    /// Every `setPauseOnExceptions` state received, in order.
    pub exception_states: Mutex<Vec<String>>,
    /// Every request method received, in order.
    pub methods: Mutex<Vec<String>>,
    /// Full request objects, for parameter assertions.
    pub requests: Mutex<Vec<Value>>,
    /// Frames reported by every `Debugger.paused` event.
    pub frames: Mutex<Value>,
    /// Scripts announced after `Debugger.enable` as (scriptId, url).
    pub scripts: Mutex<Vec<(String, String)>>,
    breakpoint_counter: AtomicU64,
}

impl FakeState {
    pub fn set_eval_reply(&self, expression: &str, body: Value) {
        self.eval_replies
            .lock()
            .unwrap()
            .insert(expression.to_string(), body);
    }

    /// Shortcut: expression evaluates to a primitive number.
    pub fn set_eval_number(&self, expression: &str, value: i64) {
        self.set_eval_reply(
            expression,
            json!({"result": {"type": "number", "value": value, "description": value.to_string()}}),
        );
    }

    pub fn set_property_reply(&self, object_id: &str, body: Value) {
        self.property_replies
            .lock()
            .unwrap()
            .insert(object_id.to_string(), body);
    }

    pub fn methods_seen(&self) -> Vec<String> {
        self.methods.lock().unwrap().clone()
    }

    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req["method"] == method)
            .cloned()
            .collect()
    }

    pub fn last_exception_state(&self) -> Option<String> {
        self.exception_states.lock().unwrap().last().cloned()
    }
}

pub struct FakeInspector {
    pub ws_url: String,
    pub state: Arc<FakeState>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for FakeInspector {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakeInspector {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState {
            frames: Mutex::new(default_frames()),
            ..FakeState::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ws_url = format!("ws://127.0.0.1:{}/0f0f0f0f-aaaa-bbbb-cccc-123456789abc", port);

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        serve_connection(ws, state).await;
                    }
                });
            }
        });

        Self {
            ws_url,
            state,
            task,
        }
    }
}

pub fn default_frames() -> Value {
    json!([{
        "callFrameId": "frame-0",
        "functionName": "main",
        "location": {"scriptId": "1", "lineNumber": 4, "columnNumber": 2},
        "url": "file:///srv/app.js",
        "scopeChain": [],
    }])
}

async fn serve_connection(mut ws: WebSocketStream<TcpStream>, state: Arc<FakeState>) {
    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let Some(id) = request["id"].as_u64() else {
            continue;
        };
        let method = request["method"].as_str().unwrap_or("").to_string();

        state.methods.lock().unwrap().push(method.clone());
        state.requests.lock().unwrap().push(request.clone());

        match method.as_str() {
            "Debugger.enable" => {
                reply(&mut ws, id, json!({"debuggerId": "fake-debugger"})).await;
                let scripts = state.scripts.lock().unwrap().clone();
                for (script_id, url) in scripts {
                    emit(
                        &mut ws,
                        "Debugger.scriptParsed",
                        json!({"scriptId": script_id, "url": url}),
                    )
                    .await;
                }
            }
            "Runtime.runIfWaitingForDebugger" => {
                reply(&mut ws, id, json!({})).await;
                let frames = state.frames.lock().unwrap().clone();
                emit(
                    &mut ws,
                    "Debugger.paused",
                    json!({"callFrames": frames, "reason": "Break on start", "hitBreakpoints": []}),
                )
                .await;
            }
            "Debugger.pause" => {
                reply(&mut ws, id, json!({})).await;
                let frames = state.frames.lock().unwrap().clone();
                emit(
                    &mut ws,
                    "Debugger.paused",
                    json!({"callFrames": frames, "reason": "other", "hitBreakpoints": []}),
                )
                .await;
            }
            "Debugger.resume" => {
                reply(&mut ws, id, json!({})).await;
                emit(&mut ws, "Debugger.resumed", json!({})).await;
            }
            "Debugger.stepOver" | "Debugger.stepInto" | "Debugger.stepOut" => {
                reply(&mut ws, id, json!({})).await;
                emit(&mut ws, "Debugger.resumed", json!({})).await;
                let frames = state.frames.lock().unwrap().clone();
                emit(
                    &mut ws,
                    "Debugger.paused",
                    json!({"callFrames": frames, "reason": "step", "hitBreakpoints": []}),
                )
                .await;
            }
            "Debugger.setBreakpointByUrl" => {
                let n = state.breakpoint_counter.fetch_add(1, Ordering::SeqCst) + 1;
                reply(
                    &mut ws,
                    id,
                    json!({"breakpointId": format!("cdp-bp-{}", n), "locations": []}),
                )
                .await;
            }
            "Debugger.setPauseOnExceptions" => {
                if let Some(mode) = request["params"]["state"].as_str() {
                    state
                        .exception_states
                        .lock()
                        .unwrap()
                        .push(mode.to_string());
                }
                reply(&mut ws, id, json!({})).await;
            }
            "Debugger.evaluateOnCallFrame" => {
                let expression = request["params"]["expression"].as_str().unwrap_or("");
                let body = state
                    .eval_replies
                    .lock()
                    .unwrap()
                    .get(expression)
                    .cloned()
                    .unwrap_or_else(|| json!({"result": {"type": "undefined"}}));
                reply(&mut ws, id, body).await;
            }
            "Runtime.getProperties" => {
                let object_id = request["params"]["objectId"].as_str().unwrap_or("");
                let body = state
                    .property_replies
                    .lock()
                    .unwrap()
                    .get(object_id)
                    .cloned()
                    .unwrap_or_else(|| json!({"result": []}));
                reply(&mut ws, id, body).await;
            }
            // removeBreakpoint, Runtime.enable, profiler domains, …
            _ => reply(&mut ws, id, json!({})).await,
        }
    }
}

async fn reply(ws: &mut WebSocketStream<TcpStream>, id: u64, result: Value) {
    let frame = json!({"id": id, "result": result}).to_string();
    let _ = ws.send(Message::Text(frame.into())).await;
}

async fn emit(ws: &mut WebSocketStream<TcpStream>, method: &str, params: Value) {
    let frame = json!({"method": method, "params": params}).to_string();
    let _ = ws.send(Message::Text(frame.into())).await;
}

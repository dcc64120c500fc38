use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing CDP command frame.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Any frame arriving from the inspector.
///
/// CDP frames are not tagged: a frame with an `id` answers a prior request,
/// a frame with a `method` and no `id` is a server-initiated event.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerMessage {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<RemoteError>,
    pub method: Option<String>,
    pub params: Option<Value>,
}

/// Error object carried in a failed CDP reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// A server-initiated notification, as handed to event callbacks.
#[derive(Debug, Clone)]
pub struct InspectorEvent {
    pub method: String,
    pub params: Value,
}

/// Script location on the wire (0-indexed line).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub script_id: String,
    pub line_number: u32,
    #[serde(default)]
    pub column_number: Option<u32>,
}

/// One stack level of a paused target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub call_frame_id: String,
    pub function_name: String,
    pub location: Location,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub scope_chain: Vec<Scope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(rename = "type")]
    pub scope_type: String,
    pub object: RemoteObject,
    #[serde(default)]
    pub name: Option<String>,
}

/// Mirror object for a value living in the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub object_id: Option<String>,
}

impl RemoteObject {
    /// True when the mirror carries its value inline (number, string, bool,
    /// null, undefined) rather than an object handle.
    pub fn is_primitive(&self) -> bool {
        self.object_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    pub text: String,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub column_number: Option<u32>,
}

/// `Debugger.paused` event payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedParams {
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub hit_breakpoints: Vec<String>,
}

/// `Debugger.scriptParsed` event payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsedParams {
    pub script_id: String,
    #[serde(default)]
    pub url: String,
}

/// Reply body of `Debugger.evaluateOnCallFrame`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateOnCallFrameResult {
    pub result: RemoteObject,
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

/// One entry of a `Runtime.getProperties` reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub value: Option<RemoteObject>,
    #[serde(default)]
    pub writable: Option<bool>,
    #[serde(default)]
    pub enumerable: Option<bool>,
    #[serde(default)]
    pub configurable: Option<bool>,
}

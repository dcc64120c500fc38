//! Expression evaluation and object graph inspection against a paused
//! target.

use crate::inspector::types::{EvaluateOnCallFrameResult, PropertyDescriptor, RemoteObject};
use crate::inspector::InspectorClient;
use crate::{Error, Result};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Evaluation outcome: primitives are unwrapped, objects come back as a
/// handle plus metadata.
#[derive(Debug, Clone)]
pub struct EvaluatedValue {
    pub value_type: String,
    pub value: Option<Value>,
    pub object_id: Option<String>,
    pub description: Option<String>,
}

impl From<RemoteObject> for EvaluatedValue {
    fn from(obj: RemoteObject) -> Self {
        Self {
            value_type: obj.object_type,
            value: obj.value,
            object_id: obj.object_id,
            description: obj.description,
        }
    }
}

/// One fetched property of a remote object.
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    pub name: String,
    pub value: Option<Value>,
    pub object_id: Option<String>,
    pub value_type: Option<String>,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct GetPropertiesOptions {
    pub own_properties: bool,
    pub accessor_properties_only: bool,
}

impl Default for GetPropertiesOptions {
    fn default() -> Self {
        Self {
            own_properties: true,
            accessor_properties_only: false,
        }
    }
}

const TRUNCATED_KEY: &str = "_truncated";
const TRUNCATED_MARKER: &str = "Max depth reached";

pub struct VariableInspector {
    client: Arc<InspectorClient>,
}

impl VariableInspector {
    pub fn new(client: Arc<InspectorClient>) -> Self {
        Self { client }
    }

    /// Evaluate an expression in a specific call frame of the paused target.
    pub async fn evaluate_expression(
        &self,
        expression: &str,
        call_frame_id: &str,
    ) -> Result<EvaluatedValue> {
        let reply = self
            .client
            .send(
                "Debugger.evaluateOnCallFrame",
                Some(json!({
                    "callFrameId": call_frame_id,
                    "expression": expression,
                    "returnByValue": false,
                    "generatePreview": true,
                })),
            )
            .await?;

        let parsed: EvaluateOnCallFrameResult = serde_json::from_value(reply)?;

        if let Some(details) = parsed.exception_details {
            let description = details
                .exception
                .and_then(|e| e.description)
                .unwrap_or_else(|| {
                    if details.text.is_empty() {
                        "Unknown error".to_string()
                    } else {
                        details.text
                    }
                });
            return Err(Error::Evaluation(description));
        }

        Ok(parsed.result.into())
    }

    /// Fetch the properties of a remote object. A reply with no `result`
    /// yields an empty list.
    pub async fn get_object_properties(
        &self,
        object_id: &str,
        options: GetPropertiesOptions,
    ) -> Result<Vec<PropertyInfo>> {
        let reply = self
            .client
            .send(
                "Runtime.getProperties",
                Some(json!({
                    "objectId": object_id,
                    "ownProperties": options.own_properties,
                    "accessorPropertiesOnly": options.accessor_properties_only,
                })),
            )
            .await?;

        let Some(raw) = reply.get("result") else {
            return Ok(Vec::new());
        };
        let descriptors: Vec<PropertyDescriptor> = serde_json::from_value(raw.clone())?;

        Ok(descriptors
            .into_iter()
            .map(|desc| {
                let (value, object_id, value_type) = match desc.value {
                    Some(obj) => (obj.value, obj.object_id, Some(obj.object_type)),
                    None => (None, None, None),
                };
                PropertyInfo {
                    name: desc.name,
                    value,
                    object_id,
                    value_type,
                    writable: desc.writable.unwrap_or(false),
                    enumerable: desc.enumerable.unwrap_or(false),
                    configurable: desc.configurable.unwrap_or(false),
                }
            })
            .collect())
    }

    /// Expand a remote object into a nested JSON map, recursing into
    /// object-typed properties until `max_depth` is exhausted.
    pub fn inspect_object<'a>(
        &'a self,
        object_id: &'a str,
        max_depth: u32,
    ) -> BoxFuture<'a, Result<Value>> {
        async move {
            if max_depth == 0 {
                return Ok(truncated_marker());
            }

            let properties = self
                .get_object_properties(object_id, GetPropertiesOptions::default())
                .await?;

            let mut map = Map::new();
            for prop in properties {
                let entry = match (&prop.object_id, &prop.value) {
                    (Some(child_id), _) => {
                        if max_depth == 1 {
                            truncated_marker()
                        } else {
                            self.inspect_object(child_id, max_depth - 1).await?
                        }
                    }
                    (None, Some(value)) => value.clone(),
                    (None, None) => Value::Null,
                };
                map.insert(prop.name, entry);
            }

            Ok(Value::Object(map))
        }
        .boxed()
    }
}

fn truncated_marker() -> Value {
    json!({ TRUNCATED_KEY: TRUNCATED_MARKER })
}

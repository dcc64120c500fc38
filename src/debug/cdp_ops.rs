//! Wire half of the breakpoint lifecycle: translates catalogue entries into
//! `Debugger.*` calls and tracks the script registry announced by
//! `Debugger.scriptParsed`.

use super::breakpoints::{Breakpoint, BreakpointKind, ExceptionPauseState};
use crate::inspector::types::ScriptParsedParams;
use crate::inspector::InspectorClient;
use crate::source_map::CompiledLocation;
use crate::{Error, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct CdpBreakpointOperations {
    client: Arc<InspectorClient>,
    /// url → scriptId, fed by `Debugger.scriptParsed`.
    scripts: Arc<RwLock<HashMap<String, String>>>,
}

impl CdpBreakpointOperations {
    pub fn new(client: Arc<InspectorClient>) -> Self {
        Self {
            client,
            scripts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to `scriptParsed` so breakpoint fallbacks can locate
    /// scripts by id. Call once, after `Debugger.enable`.
    pub async fn install(&self) {
        let scripts = self.scripts.clone();
        self.client
            .on("Debugger.scriptParsed", move |event| {
                let Ok(params) =
                    serde_json::from_value::<ScriptParsedParams>(event.params.clone())
                else {
                    return;
                };
                if params.url.is_empty() {
                    return;
                }
                let scripts = scripts.clone();
                tokio::spawn(async move {
                    scripts.write().await.insert(params.url, params.script_id);
                });
            })
            .await;
    }

    pub async fn register_script(&self, url: impl Into<String>, script_id: impl Into<String>) {
        self.scripts
            .write()
            .await
            .insert(url.into(), script_id.into());
    }

    /// Register a catalogue entry with the inspector. `compiled` overrides
    /// the entry's own file/line when the session translated a source-mapped
    /// location. Returns the CDP handle, or `None` for kinds the wire does
    /// not register.
    pub async fn set_breakpoint(
        &self,
        bp: &Breakpoint,
        compiled: Option<&CompiledLocation>,
    ) -> Result<Option<String>> {
        match &bp.kind {
            BreakpointKind::Standard {
                file,
                line,
                condition,
            } => {
                let (file, line) = match compiled {
                    Some(loc) => (loc.file.as_str(), loc.line),
                    None => (file.as_str(), *line),
                };
                let id = self
                    .set_by_location(file, line, condition.as_deref())
                    .await?;
                Ok(Some(id))
            }
            BreakpointKind::Logpoint {
                file,
                line,
                log_message,
            } => {
                let (file, line) = match compiled {
                    Some(loc) => (loc.file.as_str(), loc.line),
                    None => (file.as_str(), *line),
                };
                let condition = compile_log_message(log_message);
                let id = self.set_by_location(file, line, Some(&condition)).await?;
                Ok(Some(id))
            }
            BreakpointKind::Function { function_name } => {
                // TODO(function-breakpoints): needs per-script instrumentation
                // via Debugger.setBreakpointOnFunctionCall once the object
                // handles for every matching function are tracked.
                warn!(
                    "Function breakpoint '{}' recorded but not registered with the inspector",
                    function_name
                );
                Ok(None)
            }
        }
    }

    /// `setBreakpointByUrl` first; if the inspector rejects it, fall back to
    /// `setBreakpoint` against a known scriptId.
    async fn set_by_location(
        &self,
        file: &str,
        line: u32,
        condition: Option<&str>,
    ) -> Result<String> {
        let url = file_url(file);
        let mut params = json!({
            "lineNumber": line - 1,
            "url": url,
            "columnNumber": 0,
        });
        if let Some(cond) = condition {
            params["condition"] = json!(cond);
        }

        match self.client.send("Debugger.setBreakpointByUrl", Some(params)).await {
            Ok(reply) => reply["breakpointId"]
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| Error::Protocol {
                    code: 0,
                    message: "setBreakpointByUrl reply carried no breakpointId".to_string(),
                }),
            Err(by_url_err) => {
                debug!(
                    "setBreakpointByUrl failed for {}:{} ({}), trying by scriptId",
                    file, line, by_url_err
                );
                let script_id = self.script_id_for(file).await.ok_or(by_url_err)?;

                let mut params = json!({
                    "location": {
                        "scriptId": script_id,
                        "lineNumber": line - 1,
                        "columnNumber": 0,
                    },
                });
                if let Some(cond) = condition {
                    params["condition"] = json!(cond);
                }

                let reply = self.client.send("Debugger.setBreakpoint", Some(params)).await?;
                reply["breakpointId"]
                    .as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| Error::Protocol {
                        code: 0,
                        message: "setBreakpoint reply carried no breakpointId".to_string(),
                    })
            }
        }
    }

    /// Locate a parsed script: exact URL, then filename suffix, then
    /// substring.
    pub async fn script_id_for(&self, file: &str) -> Option<String> {
        let scripts = self.scripts.read().await;
        let url = file_url(file);

        if let Some(id) = scripts.get(&url).or_else(|| scripts.get(file)) {
            return Some(id.clone());
        }

        let file_name = std::path::Path::new(file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file);
        if let Some((_, id)) = scripts
            .iter()
            .find(|(known, _)| known.ends_with(file_name))
        {
            return Some(id.clone());
        }

        scripts
            .iter()
            .find(|(known, _)| known.contains(file))
            .map(|(_, id)| id.clone())
    }

    /// Unregister a breakpoint. Safe to call after the transport is gone:
    /// the failure is reported in the log and swallowed.
    pub async fn remove_breakpoint(&self, cdp_id: &str) -> Result<()> {
        if !self.client.is_connected() {
            warn!(
                "Cannot remove breakpoint {}: inspector disconnected",
                cdp_id
            );
            return Ok(());
        }

        match self
            .client
            .send(
                "Debugger.removeBreakpoint",
                Some(json!({ "breakpointId": cdp_id })),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_disconnect() => {
                warn!("Removing breakpoint {} raced a disconnect: {}", cdp_id, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn set_pause_on_exceptions(&self, state: ExceptionPauseState) -> Result<()> {
        info!("setPauseOnExceptions -> {}", state.as_str());
        self.client
            .send(
                "Debugger.setPauseOnExceptions",
                Some(json!({ "state": state.as_str() })),
            )
            .await?;
        Ok(())
    }
}

fn file_url(path: &str) -> String {
    if path.contains("://") || path.starts_with("node:") {
        path.to_string()
    } else {
        format!("file://{}", path)
    }
}

/// Compile a logpoint template into a breakpoint condition. `{expr}`
/// placeholders become `%s` in a format string passed to the target's
/// `console.log`; the comma operator makes the whole condition evaluate to
/// `false` so the target never pauses.
pub fn compile_log_message(template: &str) -> String {
    let mut format = String::new();
    let mut expressions: Vec<String> = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let (before, after_open) = rest.split_at(open);
        format.push_str(before);
        match after_open[1..].find('}') {
            Some(close) => {
                let expr = &after_open[1..1 + close];
                format.push_str("%s");
                expressions.push(expr.to_string());
                rest = &after_open[close + 2..];
            }
            None => {
                // Unterminated placeholder: treat the rest as literal text.
                format.push_str(after_open);
                rest = "";
            }
        }
    }
    format.push_str(rest);

    let format_literal = serde_json::to_string(&format).expect("string serializes");
    if expressions.is_empty() {
        format!("(console.log({}), false)", format_literal)
    } else {
        format!(
            "(console.log({}, {}), false)",
            format_literal,
            expressions.join(", ")
        )
    }
}

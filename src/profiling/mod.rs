//! Profiler collaborators. Thin wrappers over the `Profiler`,
//! `HeapProfiler` and `Performance` CDP domains; the orchestration core only
//! guarantees their lifecycle, not their analysis surfaces.

use crate::inspector::InspectorClient;
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct CpuProfiler {
    client: Arc<InspectorClient>,
}

impl CpuProfiler {
    pub fn new(client: Arc<InspectorClient>) -> Self {
        Self { client }
    }

    pub async fn start(&self) -> Result<()> {
        self.client.send("Profiler.enable", None).await?;
        self.client.send("Profiler.start", None).await?;
        Ok(())
    }

    /// Stop profiling and return the raw CPU profile.
    pub async fn stop(&self) -> Result<Value> {
        let reply = self.client.send("Profiler.stop", None).await?;
        Ok(reply.get("profile").cloned().unwrap_or(Value::Null))
    }
}

pub struct HeapProfiler {
    client: Arc<InspectorClient>,
}

impl HeapProfiler {
    pub fn new(client: Arc<InspectorClient>) -> Self {
        Self { client }
    }

    pub async fn start_sampling(&self) -> Result<()> {
        self.client.send("HeapProfiler.enable", None).await?;
        self.client
            .send("HeapProfiler.startSampling", Some(json!({})))
            .await?;
        Ok(())
    }

    /// Stop sampling and return the raw allocation profile.
    pub async fn stop_sampling(&self) -> Result<Value> {
        let reply = self.client.send("HeapProfiler.stopSampling", None).await?;
        Ok(reply.get("profile").cloned().unwrap_or(Value::Null))
    }
}

pub struct PerformanceTimeline {
    client: Arc<InspectorClient>,
}

impl PerformanceTimeline {
    pub fn new(client: Arc<InspectorClient>) -> Self {
        Self { client }
    }

    pub async fn enable(&self) -> Result<()> {
        self.client.send("Performance.enable", None).await?;
        Ok(())
    }

    /// Current runtime metrics as `(name, value)` pairs.
    pub async fn metrics(&self) -> Result<Vec<(String, f64)>> {
        let reply = self.client.send("Performance.getMetrics", None).await?;
        let metrics = reply
            .get("metrics")
            .and_then(|m| m.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let name = entry.get("name")?.as_str()?.to_string();
                        let value = entry.get("value")?.as_f64()?;
                        Some((name, value))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(metrics)
    }
}

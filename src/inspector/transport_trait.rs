use super::types::{Request, ServerMessage};
use crate::Result;
use async_trait::async_trait;

/// Framed CDP transport. The production implementation is a WebSocket; tests
/// substitute a mock.
#[async_trait]
pub trait InspectorTransport: Send {
    async fn read_message(&mut self) -> Result<ServerMessage>;
    async fn write_message(&mut self, msg: &Request) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

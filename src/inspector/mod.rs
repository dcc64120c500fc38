pub mod client;
pub mod transport;
pub mod transport_trait;
pub mod types;

pub use client::{HandlerId, InspectorClient, DEFAULT_REQUEST_TIMEOUT, WILDCARD_EVENT};
pub use transport_trait::InspectorTransport;
pub use types::InspectorEvent;

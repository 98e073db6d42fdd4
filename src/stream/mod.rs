// =============================================================================
// Streaming layer — EODHD WebSocket endpoints
// =============================================================================

pub mod eodhd_ws;

pub use eodhd_ws::{EndpointStatus, StreamManager, StreamState, WsEndpoint};

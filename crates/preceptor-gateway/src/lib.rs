//! HTTP gateway exposing the voice session orchestrator.

pub mod routes;
pub mod server;
pub mod state;

pub use server::{router, start_gateway};
pub use state::GatewayState;

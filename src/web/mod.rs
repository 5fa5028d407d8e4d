//! HTTP gateway: bearer-token auth, lead routes, health.

pub mod auth;
pub mod server;
pub mod types;

pub use server::{GatewayState, start_server};

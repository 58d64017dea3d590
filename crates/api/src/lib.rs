//! HTTP surface of the notification gateway.

pub mod middleware;
pub mod routes;
pub mod state;

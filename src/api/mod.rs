//! HTTP layer: routes, JWT auth, WebSocket subscriptions.

pub mod auth;
pub mod routes;
pub mod ws;

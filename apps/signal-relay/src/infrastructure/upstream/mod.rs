//! Upstream Adapters
//!
//! The WebSocket client for the upstream source and the timer that paces
//! its reconnects.

mod client;
mod timer;

pub use client::WsUpstream;
pub use timer::TokioReconnectTimer;

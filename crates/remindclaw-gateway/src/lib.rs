//! # RemindClaw Gateway
//!
//! Thin HTTP control surface over [`BotControl`](remindclaw_scheduler::BotControl):
//! operator login, start/stop, status, stats, invalid-contact reports,
//! roster search and the observer WebSocket.

pub mod auth;
pub mod routes;
pub mod server;
pub mod ws;

pub use server::{AppState, build_router, start};

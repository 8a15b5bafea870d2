//! jsonwire - command routing and session dispatch for JSON Wire Protocol drivers.
//!
//! A browser backend plugs its command handlers into a [`dispatch::ServerContext`];
//! this crate turns HTTP requests into resolved sessions and commands, runs
//! them one at a time per session, and answers with the
//! `{sessionId, status, value}` envelope.

pub mod api;
pub mod client;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod element;
pub mod protocol;
pub mod resource;
pub mod routes;
pub mod session;

//! cadlink library
//!
//! Core components of the CAD command bridge: the host-side bridge (listener,
//! queue, dispatcher, session synchronizer), the chat session store, the code
//! generation client and the HTTP API that ties them together.

pub mod api;
pub mod bridge;
pub mod config;
pub mod db;
pub mod generate;
pub mod session;

//! roost: the turn-processing core of a long-running conversational agent.
//!
//! Chat messages, scheduled jobs, loopback API calls and console lines all
//! become [`event::Event`]s on one queue. A single worker runs them one at a
//! time through an external reasoning engine, with outbound messages chunked
//! and gated by a send-loop circuit breaker.

pub mod agent;
pub mod app;
pub mod channels;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod logging;
pub mod memory;
pub mod scheduler;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};

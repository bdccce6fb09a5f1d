// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point.  Re-export everything for both `main.rs` and
// integration tests.

#[macro_use]
pub mod macros;

pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod flow;
pub mod parse;
pub mod scheduler;
pub mod source;

pub use error::{ErrorKind, FlowError};

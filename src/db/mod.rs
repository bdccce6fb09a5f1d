// src/db/mod.rs
//! Public façade for DB helpers.

pub mod connection;
pub mod store;

pub use connection::open_db_connection;
pub use store::{FlowTable, PassTx, Store};

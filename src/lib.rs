//! # medlink
//!
//! Application crate for the medlink instrument link. It wires the workspace
//! crates together:
//!
//! - **`medlink-core`**: codec primitives, value vectors, transport and
//!   driver contracts
//! - **`medlink-drivers`**: one protocol driver per supported instrument
//! - **`medlink-hardware`**: registry, device configuration, orchestrator and
//!   serial transport
//! - **`medlink-mock`**: scripted transports for tests and dry runs
//!
//! This crate adds the application configuration ([`config`]), tracing setup
//! ([`tracing_init`]) and the dry-run helpers behind `medlink simulate`
//! ([`simulate`]).

pub mod config;
pub mod simulate;
pub mod tracing_init;

pub use medlink_core as core;
pub use medlink_hardware as hardware;

//! SIS: a small image server over the content-addressed store.
//!
//! The library half exists so integration tests can mount the router on an
//! ephemeral port; `main.rs` only wires CLI, logging and the listener.

pub mod cli;
pub mod web;

pub use web::{router, AppState};

//! ldk-daemon library target.
//!
//! Exposes the supervisor, wiring, router and state for integration tests.
//! The binary `main.rs` depends on this library target.

pub mod routes;
pub mod state;
pub mod supervisor;
pub mod wiring;

pub use supervisor::{MasterDaemon, SupervisorOptions, WorkerSpec};
pub use wiring::{store_options, wire, Wired};

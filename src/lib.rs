//! In-process aggregation-and-flush engine for an API Service Control
//! sidecar.
//!
//! A host process (an API gateway, an ESP-style proxy, a service mesh
//! sidecar) hands this crate a per-request [`model::Info`] and gets back
//! admission decisions, quota allocations, and usage accounting, batched
//! and de-duplicated in-process ahead of a remote Service Control backend
//! reached through an injected [`transport::Transport`]. See
//! [`scheduler::Facade`] for the entry point most hosts want.
//!
//! Grounded throughout on `cloudendpoints/endpoints-management-python`
//! (`google/scc`, `endpoints_management/control`), reworked in the idiom
//! of this crate's Rust teacher -- see `DESIGN.md` for the file-by-file
//! grounding ledger.

pub mod aggregator;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod http_status;
pub mod model;
pub mod scheduler;
pub mod transport;

pub use clock::Clock;
pub use config::AggregatorConfig;
pub use error::{Error, Result};
pub use model::Info;
pub use scheduler::Facade;
pub use transport::Transport;

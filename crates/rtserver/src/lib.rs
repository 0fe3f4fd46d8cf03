//! # RTSERVER
//!
//! A raytrace compute server: clients build jobs (bundles of rays addressed
//! to a session), drop them into one of N priority queues, and a pool of
//! worker threads shoots them against the loaded geometry.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────┐  submit    ┌─────────────────────┐  claim   ┌──────────┐
//!  │ callers  │──────────> │ QueueSet (0 = high) │────────> │ workers  │
//!  │          │            │  input │ output     │          │  (M)     │
//!  │          │ <─poll──── │        │ <──────────│<─publish─│          │
//!  │          │ <─────── WaiterTable (sync callers) ──────── │          │
//!  └──────────┘            └─────────────────────┘          └──────────┘
//!                                  │ snapshot
//!                          ┌───────────────────┐
//!                          │ SessionRegistry   │  slot 0 = loaded geometry
//!                          └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: queue/thread counts and deadlines, loadable from TOML
//! - [`registry`]: sessions, instances and per-session transforms
//! - [`queue`]: the priority queue set and its wakeup signals
//! - [`dispatch`]: hand-off of results to synchronous callers
//! - [`worker`]: the worker pool and per-ray shooting
//! - [`weave`]: merging overlapping hits from several instances
//! - [`server`]: [`RtServer`], the public entry point

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod queue;
pub mod registry;
pub mod server;
pub mod weave;
pub mod worker;

pub use config::ServerConfig;
pub use error::{RtResult, RtServerError};
pub use registry::{RtInstance, Session, SessionRegistry, Transform};
pub use server::{ArrayShot, RtServer, ServerStats, ARRAY_QUEUE, SINGLE_RAY_QUEUE, VERSION};
pub use worker::WorkerStats;

//! Procsim Core -- a discrete-event kernel for queueing and process models.
//!
//! A model is a network of stations that clients (tokens) flow through.
//! Stations delay clients, make them wait for resources or conditions, route
//! them, batch them and dispose of them, while the kernel advances simulated
//! time from event to event and records statistics.
//!
//! # Pipeline
//!
//! 1. **Describe** -- build a [`model::ModelDescription`] in code or load one
//!    with [`loader`] (feature `model-loader`).
//! 2. **Compile** -- [`compile::compile`] validates the description,
//!    compiles every formula through an [`expr::Evaluator`], removes edge
//!    junctions and produces an immutable [`network::Network`].
//! 3. **Replicate** -- each [`replication::Replication`] owns its clock,
//!    event queue, RNG, clients, pools and station state, and borrows the
//!    network. [`runner::run_replications`] runs many of them, in parallel
//!    with the `parallel` feature.
//! 4. **Report** -- a finished replication yields a serializable
//!    [`stats::ReplicationStatistics`].
//!
//! # Event handling
//!
//! Each event is handled by exactly one station. Effects on other stations
//! are deferred: the handler raises flags (state changed, resources freed,
//! signal fired, continuous values touched) and the replication settles them
//! before the next event, at the same simulated instant:
//!
//! ```rust,ignore
//! let net = compile(&model, &evaluator)?;
//! let mut rep = Replication::new(&net, RunConfig::default(), 0);
//! while rep.step() {}
//! let stats = rep.statistics();
//! ```
//!
//! # Key Types
//!
//! - [`station::StationKind`] -- Every station variant and its compiled
//!   parameters.
//! - [`event::EventQueue`] -- Time-ordered events with FIFO tie-breaking.
//! - [`resource::ResourcePools`] -- Unit pools with all-or-nothing locking.
//! - [`continuous::ContinuousSystem`] -- Tanks, flows, analog values and
//!   threshold watches.
//! - [`journal::Journal`] -- Optional ring buffer of kernel happenings.

mod cascade;
pub mod client;
pub mod compile;
pub mod config;
pub mod continuous;
pub mod distribution;
pub mod error;
pub mod event;
pub mod expr;
pub mod id;
pub mod journal;
mod kernel;
#[cfg(feature = "model-loader")]
pub mod loader;
pub mod model;
pub mod network;
pub mod param;
pub mod queue;
pub mod replication;
pub mod resource;
pub mod rng;
pub mod runner;
pub mod sim;
pub mod station;
pub mod stats;
pub mod transporter;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use compile::{BuildError, BuildStatus, Compiler, compile, test_node};
pub use config::{ConfigError, RunConfig};
pub use expr::{CalcError, Evaluator, ParseError};
pub use model::ModelDescription;
pub use network::Network;
pub use replication::Replication;
pub use runner::run_replications;
pub use stats::ReplicationStatistics;

//! # vopr-hub
//!
//! The hub daemon of the randomized simulation fleet.
//!
//! Two long-lived tasks share a bounded FIFO queue:
//!
//! ```text
//! workers ──TCP──> ingress server ──queue──> processing pipeline
//!                  (one task per             (exactly one task:
//!                   connection:               dedup, checkout,
//!                   validate, ack)            replay, persist, file)
//! ```
//!
//! The ingress side does nothing but validate and enqueue, so accepting a
//! report costs one bounded read plus a checksum. Everything expensive
//! (git, the simulator, the tracker API) happens on the single pipeline
//! task, which owns the working copy and the artifact directory.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod pipeline;
pub mod server;

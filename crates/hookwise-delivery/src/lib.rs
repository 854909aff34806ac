//! Reliable delivery engine for HookWise.
//!
//! Implements the four-layer mitigation pipeline that protects, recovers,
//! and reorders events around an unreliable destination:
//!
//! ```text
//!  webhook/received ──▶ ┌────────────────┐     CLOSED/HALF_OPEN ┌───────────┐
//!                       │ DeliveryWorker │ ───────────────────▶ │ POST dest │
//!                       │  (gate on the  │                      └───────────┘
//!                       │    breaker)    │  OPEN
//!                       └────────────────┘ ───▶ replay queue (position order)
//!                                ▲                        │
//!                  3 OK probes   │                        ▼
//!  ┌──────────────┐   half-open  │               ┌──────────────┐
//!  │ HealthProber │ ─────────────┘──────────────▶│ ReplayEngine │
//!  └──────────────┘   endpoint/replay-started    └──────────────┘
//! ```
//!
//! The circuit breaker derives its state from persisted delivery history
//! under a per-endpoint row lock; the orphan sweeper redrives events whose
//! task hand-off was lost. Failure classification drives per-error-type
//! retry scheduling with a one-retry budget per bucket.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit;
pub mod classify;
pub mod client;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod prober;
pub mod replay;
pub mod sweeper;
pub mod worker;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitTransition};
pub use classify::{classify_failure, Classification};
pub use client::{ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse};
pub use correlation::correlation_key;
pub use dispatcher::{DispatcherConfig, TaskDispatcher};
pub use error::{DeliveryError, Result};
pub use prober::{HealthProber, ProberConfig};
pub use replay::{ReplayConfig, ReplayEngine, ReplaySummary};
pub use sweeper::{OrphanSweeper, SweeperConfig};
pub use worker::{DeliveryOutcome, DeliveryWorker, WorkerConfig};

//! linkdeck-core: adaptive motion governance for the linkdeck dashboard
//!
//! Measures device capability and live frame performance, classifies the
//! host into a capability tier, and uses that tier to admit or suppress
//! animation work through a concurrency-limited gate.
//!
//! # Architecture
//!
//! ```text
//! CapabilityProfiler ──► tier ──► DegradationController ──► policy ──► RenderHints
//!                         ▲                                   │
//! FrameRateSampler ──► fps history                            ▼
//!                                                   AdmissionController ◄── UI code
//! ```
//!
//! # Modules
//!
//! - `capability`: benchmark and hint-based tier classification
//! - `sampler`: frame-rate windows, long-task log, resource snapshots
//! - `history`: bounded FIFO history
//! - `degradation`: tier transitions, policy table, render hints
//! - `admission`: ticket admission and progress animations
//! - `governor`: the owned governor tying the above together
//! - `report`: serializable performance report
//! - `runtime`: tokio tasks that drive a governor
//! - `config`: TOML configuration
//! - `logging`: tracing subscriber setup
//! - `error`: error types with remediation hints
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod admission;
pub mod capability;
pub mod config;
pub mod degradation;
pub mod error;
pub mod governor;
pub mod history;
pub mod logging;
pub mod report;
pub mod runtime;
pub mod sampler;

pub use error::{Error, Result};

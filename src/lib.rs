//! # Inspection Engine
//!
//! The collection & inspection core of an automotive edge agent: bounded
//! per-signal history, a fixed-window aggregator, a polymorphic boolean
//! expression evaluator, and the publish-policy state machine that turns a
//! triggered condition into an outbound snapshot.
//!
//! ## Architecture
//!
//! - [`signal`] — the typed sample value model.
//! - [`history`] — per-(signal, interval) ring buffers and raw CAN frame
//!   buffers.
//! - [`window`] — streaming min/max/avg over fixed time windows.
//! - [`eval`] — the expression tree evaluator.
//! - [`engine`] — ingestion, dirty tracking, publish policy and the worker
//!   loop.
//! - [`matrix`] — the immutable "program" (conditions + expression arena)
//!   the engine runs.
//! - [`geohash`] / [`dtc`] — ancillary derived signals.
//!
//! Only the single worker thread that owns [`engine::InspectionEngine`]'s
//! internals touches history, window or evaluator state; producers and the
//! matrix-swap caller interact with the engine exclusively through bounded
//! channels and atomics (see [`engine`] module docs).

pub mod clock;
pub mod config;
pub mod dtc;
pub mod engine;
pub mod error;
pub mod eval;
pub mod geohash;
pub mod history;
pub mod matrix;
pub mod metrics;
pub mod signal;
pub mod window;

pub use clock::{Clock, SystemClock, TimePoint};
pub use config::EngineConfig;
pub use engine::{InspectionEngine, Snapshot};
pub use error::{EngineError, Result};
pub use matrix::{Condition, ExpressionNode, InspectionMatrix};
pub use signal::{RawFrame, Sample, SignalId, SignalType, SignalValue};

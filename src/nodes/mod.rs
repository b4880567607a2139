//! Built-in unit generators and the ring-buffer sink.
//!
//! ## Sources ([`source`])
//!
//! Produce a signal without reading any:
//! - [`Sine`] - sine oscillator, at a fixed frequency or following another signal
//! - [`Constant`] - the same value in every sample, or once per block
//!
//! ## Effects ([`effect`])
//!
//! Combine two signals of the same instrument sample by sample, or once per
//! block when both are block rate:
//! - [`Mul`] - product
//! - [`Add`] - sum
//!
//! ## Sinks ([`sink`])
//!
//! - [`RtrbSink`] - interleave rendered blocks into an rtrb ring buffer

pub mod source;
pub mod effect;
pub mod sink;

pub use source::{Constant, Sine};
pub use effect::{Add, Mul};
pub use sink::RtrbSink;

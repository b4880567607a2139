//! Patchbay - real-time unit generator engine with message-driven patching
//!
//! Design principles:
//! - Control arrives as encoded messages on a lock-free queue; the audio
//!   thread executes them between blocks and hands them back for reuse
//! - Messages live in a pool allocator, so sending and receiving them never
//!   touches the system allocator once the pool is warm
//! - Instruments are graphs of unit generators; templates record the
//!   messages that build an instrument and replay them on demand
//! - Output is pulled: asking for an instrument's output evaluates exactly
//!   what it depends on, once per block
//! - Patching between blocks is allocation-free: connection lists, template
//!   message lists and instruments all live in storage reserved up front
//!
//! ```
//! use patchbay::{Arg, Engine, EngineConfig, PackedId, SignalRef};
//!
//! let (mut engine, mut client) = Engine::new(EngineConfig::default());
//! let id = i64::from(PackedId::new(1, 0, 0));
//!
//! client.send(0.0, "/syn/ins/def", &[Arg::Int64(id), Arg::Bool(true)]).unwrap();
//! client.send(0.0, "/syn/const/new", &[Arg::Float(0.5)]).unwrap();
//! client.send(0.0, "/syn/const/new", &[Arg::Float(0.5)]).unwrap();
//! let (a, b) = (i32::from(SignalRef::new(0, 0)), i32::from(SignalRef::new(1, 0)));
//! client.send(0.0, "/syn/mul/new", &[Arg::Int32(a), Arg::Int32(b)]).unwrap();
//! let product = i32::from(SignalRef::new(2, 0));
//! client.send(0.0, "/syn/ins/out", &[Arg::Int32(0), Arg::Int32(product)]).unwrap();
//! client.send(0.0, "/syn/ins/end", &[]).unwrap();
//!
//! engine.poll_all(0.0);
//! engine.begin_block();
//! let block = engine.request_output(1, 0).unwrap();
//! assert!(block.iter().all(|&s| s == 0.25));
//! ```

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod id;
pub mod message;
pub mod nodes;
pub mod patch;
pub mod pool;
pub mod queue;
pub mod ugen;

mod client;
mod config;
mod driver;
mod engine;

pub use client::Client;
pub use codec::{Arg, Decoded};
pub use config::EngineConfig;
pub use dispatch::{DispatchTable, Op};
pub use driver::Driver;
pub use engine::{ControlState, Engine};
pub use error::{DecodeError, Error, PatchError, Rejection, Result};
pub use id::{PackedId, PortAddr, SignalAddr, SignalRef, UgenAddr};
pub use message::{Message, MessageList};
pub use patch::{Instrument, Rack, Template, Topology};
pub use pool::{Pool, PoolConfig, PoolStats};
pub use ugen::{Ramp, Rate, Signal, Signals, Ugen, UnitGenerator};

pub use dasp_graph::Buffer;

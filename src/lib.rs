#![doc(html_root_url = "https://docs.rs/relayts/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # relayts — a cooperative, single-threaded MPEG-2 TS streaming engine
//!
//! `relayts` ingests, demuxes, remuxes, and rate-shapes MPEG-2 Transport
//! Streams. It runs a single-threaded, cooperative main loop — no worker
//! pool, no shared-mutable-state threading model — composing a graph of
//! streaming modules (sources, demuxes, PES engines, T2-MI decapsulators,
//! sync buffers, sinks) that hand TS packets to each other synchronously.
//!
//! ## Module Overview
//!
//! - [`core`]: the cooperative runtime — a monotonic clock, a poll/epoll
//!   style event loop, timers, deferred jobs, child-process I/O, and the
//!   main loop that drives all of it.
//! - [`graph`]: the streaming module graph — an arena of nodes linked into
//!   parent/child trees, with PID-demux reference counting and re-entrant-
//!   safe packet fan-out.
//! - [`ts`]: MPEG-2 TS/PSI parsing and serialization, PES reassembly and
//!   re-packetization, T2-MI de-encapsulation, and the bitrate-paced sync
//!   buffer.
//! - [`config`]: option-string parsing and process-wide tunable defaults,
//!   loaded from the environment and an optional config file.
//! - [`utils`]: CRC32 for PSI sections, a cursor-safe ordered list, and a
//!   bounded byte ring.
//! - [`error`]: the engine's error type and `Result` alias.
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! relayts = "0.1.0"
//! ```
//!
//! ### Wiring a small graph
//!
//! ```rust
//! use relayts::graph::{Graph, NodeKind};
//!
//! let mut graph = Graph::new();
//! let source = graph.alloc(NodeKind::Source);
//! let sink = graph.alloc(NodeKind::Sink);
//! graph.attach(sink, source);
//!
//! graph.set_on_ts(sink, |_g, _id, ts| {
//!     println!("received {} bytes", ts.len());
//! });
//!
//! graph.send(source, &[0x47u8; 188]);
//! ```

/// Cooperative single-threaded runtime primitives
pub mod core;

/// Streaming module graph
pub mod graph;

/// MPEG-2 Transport Stream handling
pub mod ts;

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// Common utilities and helper functions
pub mod utils;

pub use error::{EngineError, Result};

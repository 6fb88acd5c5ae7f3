#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Tidepool Server
//!
//! A distributed, stateful room server for real-time multiplayer sessions.
//!
//! Rooms are authoritative session instances pinned to one process; a fleet
//! of processes shares a coordination store (the presence) through which
//! matchmaking routes joins, creates and room method calls to the owning
//! process.

/// Monotonic room clock: tick-driven delta time and timers
pub mod clock;

/// Server configuration and defaults
pub mod config;

/// Room-cache store queried by matchmaking across the fleet
pub mod driver;

/// Error taxonomy
pub mod errors;

/// HTTP matchmaking endpoints
pub mod http;

/// Request/reply RPC over presence pub/sub
pub mod ipc;

/// Structured logging configuration
pub mod logging;

/// Per-process matchmaking coordinator
pub mod matchmaker;

/// Distributed coordination primitive (pub/sub, KV, hashes, lists)
pub mod presence;

/// Client↔room wire protocol
pub mod protocol;

/// Per-room authoritative runtime
pub mod room;

/// Stock room handlers
pub mod rooms;

/// State serializer boundary
pub mod serializer;

/// Per-process counters and the fleet process registry
pub mod stats;

/// Transport seam and adapters
pub mod transport;

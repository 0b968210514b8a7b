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

//! # Parlor Server
//!
//! Authoritative real-time engine for a multi-room party-game server.
//!
//! Clients connect over WebSocket and interact with short-lived rooms.
//! Each room is a single-writer actor that drives a validated game
//! lifecycle, turns client intents into versioned events, and keeps
//! every connection synchronized through delta broadcasts, snapshots,
//! replay, and ACK-driven resync.

/// Per-version acknowledgement tracking and resync triggering
pub mod ack;

/// Broadcast fan-out and outbound message sharing
pub mod broadcast;

/// Server configuration and environment variables
pub mod config;

/// Processed-intent deduplication
pub mod dedup;

/// Deep-diff producer and applier for state broadcasts
pub mod delta;

/// Room registry, routing, and garbage collection
pub mod dispatcher;

/// Game lifecycle state machine
pub mod fsm;

/// The plugin contract and the built-in games
pub mod game;

/// Structured logging configuration
pub mod logging;

/// Metrics collection and reporting
pub mod metrics;

/// Wire protocol definitions
pub mod protocol;

/// Sliding-window rate limiting
pub mod rate_limit;

/// Reconnect tokens and session resumption
pub mod reconnect;

/// Bounded per-room event log for catch-up
pub mod replay;

/// Room state and the single-writer runtime
pub mod room;

/// Critical-action audit trail
pub mod security_log;

/// Compressed, versioned state captures
pub mod snapshot;

/// Persisted-state contract (in-memory and no-op implementations)
pub mod storage;

/// Versioned state broadcasting
pub mod sync;

/// WebSocket connection handling
pub mod websocket;

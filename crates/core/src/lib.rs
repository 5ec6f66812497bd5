//! # rtpproxy — RTP/RTCP media relay core
//!
//! A NAT-traversal media proxy: a signalling peer allocates a session and
//! learns a pair of proxy-side ports, and this crate forwards RTP/RTCP
//! datagrams between two endpoints thereafter, latching onto whichever
//! source address each side turns out to send from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  command channel (out of scope) -> CommandSink│
//! ├──────────────────────────────────────────────┤
//! │  reactor        — poll loop, TTL ticker       │
//! │  shared         — the two-lock envelope       │
//! ├──────────────────────────────────────────────┤
//! │  registry       — session slab, port pool     │
//! │  address        — latching state machine      │
//! │  session        — Session/Leg data model      │
//! ├──────────────────────────────────────────────┤
//! │  shims          — Recorder/Resizer/RtpServer  │
//! │  clock, config, packet, error — ambient stack │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rtpproxy::clock::MonotonicClock;
//! use rtpproxy::config::ServerConfig;
//! use rtpproxy::shared::SharedState;
//! use rtpproxy::shims::ChannelNotifier;
//! use rtpproxy::reactor::Reactor;
//!
//! let (notifier, _rx) = ChannelNotifier::new();
//! let state = Arc::new(SharedState::new(
//!     ServerConfig::default(),
//!     Arc::new(MonotonicClock::new()),
//!     Arc::new(notifier),
//! ));
//! let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
//! let mut reactor = Reactor::new(state, stop);
//! reactor.tick();
//! ```
//!
//! ## Crate layout
//!
//! - [`clock`] — [`clock::Clock`] trait, [`clock::MonotonicClock`], [`clock::FakeClock`].
//! - [`config`] — [`config::ServerConfig`] and the tuning constants.
//! - [`packet`] — [`packet::Packet`], the received-datagram buffer.
//! - [`ports`] — [`ports::PortAllocator`], the even-aligned port-pair pool.
//! - [`session`] — [`session::Session`], [`session::Leg`], [`session::SessionHandle`].
//! - [`address`] — the per-leg address-learning/latching state machine.
//! - [`registry`] — [`registry::SessionSlab`], the generational session arena.
//! - [`shared`] — [`shared::SharedState`], the two-lock concurrency envelope and [`shared::CommandSink`].
//! - [`reactor`] — [`reactor::Reactor`], the forwarding/ticker/RTP-server poll loop.
//! - [`shims`] — `Recorder`/`Resizer`/`RtpServer`/`Notifier` traits and default implementations.
//! - [`error`] — [`error::RtpProxyError`] and [`error::Result`].

pub mod address;
pub mod clock;
pub mod config;
pub mod error;
pub mod packet;
pub mod ports;
pub mod reactor;
pub mod registry;
pub mod session;
pub mod shared;
pub mod shims;

pub use error::{Result, RtpProxyError};
pub use reactor::Reactor;
pub use registry::SessionSlab;
pub use session::{Session, SessionHandle, SessionKind};
pub use shared::{CommandSink, SharedState};

//! Concurrency envelope and the `CommandSink` boundary that an (out-of-scope)
//! wire parser would drive.
//!
//! Two locks, `global` and `session_list`, mirror the reference
//! implementation's pair. `session_list` alone guards the compact registry
//! and port pool for the reactor's brief poll-preparation window;
//! `with_exclusive` takes `global` first and `session_list` second, the only
//! order [`SharedState`] exposes, so a caller cannot express the forbidden
//! ordering short of reaching into private fields.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::error::{Result, RtpProxyError};
use crate::registry::SessionSlab;
use crate::session::{Leg, Session, SessionHandle, SessionKind};
use crate::shims::{Notifier, Recorder, Resizer, RtpServer};

/// Everything the reactor and the command boundary share.
pub struct SharedState {
    global: Mutex<()>,
    session_list: Mutex<SessionSlab>,
    pub clock: Arc<dyn Clock>,
    pub config: ServerConfig,
    pub notifier: Arc<dyn Notifier>,
}

impl SharedState {
    pub fn new(config: ServerConfig, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        let slab = SessionSlab::new(config.port_min, config.port_max);
        SharedState {
            global: Mutex::new(()),
            session_list: Mutex::new(slab),
            clock,
            config,
            notifier,
        }
    }

    /// Session-list lock only: the reactor's poll-preparation window
    /// Never acquires `global`.
    pub fn poll_snapshot(&self) -> MutexGuard<'_, SessionSlab> {
        self.session_list.lock()
    }

    /// Global lock, then session-list lock, the only order this type
    /// allows. Used for `process_rtp`/`process_rtp_servers` and for every
    /// `CommandSink` mutation.
    pub fn with_exclusive<R>(&self, f: impl FnOnce(&mut SessionSlab) -> R) -> R {
        let _global = self.global.lock();
        let mut slab = self.session_list.lock();
        f(&mut slab)
    }
}

/// Mutation surface the (out-of-scope) command-channel parser would drive.
/// Every method mutates under the global lock.
pub trait CommandSink {
    fn insert_session(&self, kind: SessionKind, call_id: String) -> Result<SessionHandle>;
    /// Complete a session by binding its caller leg (the `L` command
    /// following the `U` that created it), drawing a fresh port from the
    /// pool for that leg.
    fn complete_session(&self, handle: SessionHandle) -> Result<()>;
    fn attach_sibling(&self, a: SessionHandle, b: SessionHandle) -> Result<()>;
    fn delete_session(&self, handle: SessionHandle) -> Result<()>;
    fn attach_recorder(
        &self,
        handle: SessionHandle,
        leg: usize,
        recorder: Box<dyn Recorder>,
    ) -> Result<()>;
    fn attach_generator(
        &self,
        handle: SessionHandle,
        leg: usize,
        generator: Box<dyn RtpServer>,
    ) -> Result<()>;
    fn attach_resizer(
        &self,
        handle: SessionHandle,
        leg: usize,
        resizer: Box<dyn Resizer>,
    ) -> Result<()>;
    fn set_asymmetric(&self, handle: SessionHandle, leg: usize, asymmetric: bool) -> Result<()>;
    fn query_counters(&self, handle: SessionHandle) -> Result<[u64; 4]>;
    fn lookup_by_port(&self, port: u16) -> Option<SessionHandle>;
}

impl CommandSink for SharedState {
    fn insert_session(&self, kind: SessionKind, call_id: String) -> Result<SessionHandle> {
        self.with_exclusive(|slab| {
            let port = slab.allocate_port()?;
            let leg = Leg::bind(&self.config.bind.external, port)?;
            let session = Session::new(kind, call_id, leg);
            Ok(slab.insert(session, port))
        })
    }

    fn complete_session(&self, handle: SessionHandle) -> Result<()> {
        self.with_exclusive(|slab| {
            if slab.get(handle).is_none() {
                return Err(RtpProxyError::SessionNotFound(format!("{:?}", handle)));
            }
            let port = slab.allocate_port()?;
            let leg = Leg::bind(&self.config.bind.external, port)?;
            // `get_mut` cannot fail here: nothing else can remove the
            // session while we hold the global lock.
            slab.get_mut(handle).expect("session present").attach_caller(leg);
            Ok(())
        })
    }

    fn attach_sibling(&self, a: SessionHandle, b: SessionHandle) -> Result<()> {
        self.with_exclusive(|slab| {
            let (sa, sb) = slab
                .get_two_mut(a, b)
                .ok_or_else(|| RtpProxyError::SessionNotFound(format!("{:?}/{:?}", a, b)))?;
            sa.sibling = Some(b);
            sb.sibling = Some(a);
            Ok(())
        })
    }

    fn delete_session(&self, handle: SessionHandle) -> Result<()> {
        self.with_exclusive(|slab| {
            if slab.remove(handle).is_empty() {
                return Err(RtpProxyError::SessionNotFound(format!("{:?}", handle)));
            }
            Ok(())
        })
    }

    fn attach_recorder(
        &self,
        handle: SessionHandle,
        leg: usize,
        recorder: Box<dyn Recorder>,
    ) -> Result<()> {
        self.with_exclusive(|slab| {
            let session = slab
                .get_mut(handle)
                .ok_or_else(|| RtpProxyError::SessionNotFound(format!("{:?}", handle)))?;
            session.recorders[leg] = Some(recorder);
            Ok(())
        })
    }

    fn attach_generator(
        &self,
        handle: SessionHandle,
        leg: usize,
        generator: Box<dyn RtpServer>,
    ) -> Result<()> {
        self.with_exclusive(|slab| {
            let session = slab
                .get_mut(handle)
                .ok_or_else(|| RtpProxyError::SessionNotFound(format!("{:?}", handle)))?;
            session.generators[leg] = Some(generator);
            Ok(())
        })
    }

    fn attach_resizer(
        &self,
        handle: SessionHandle,
        leg: usize,
        resizer: Box<dyn Resizer>,
    ) -> Result<()> {
        self.with_exclusive(|slab| {
            let session = slab
                .get_mut(handle)
                .ok_or_else(|| RtpProxyError::SessionNotFound(format!("{:?}", handle)))?;
            session.resizers[leg] = Some(resizer);
            Ok(())
        })
    }

    fn set_asymmetric(&self, handle: SessionHandle, leg: usize, asymmetric: bool) -> Result<()> {
        self.with_exclusive(|slab| {
            let session = slab
                .get_mut(handle)
                .ok_or_else(|| RtpProxyError::SessionNotFound(format!("{:?}", handle)))?;
            session.legs[leg].asymmetric = asymmetric;
            Ok(())
        })
    }

    fn query_counters(&self, handle: SessionHandle) -> Result<[u64; 4]> {
        self.with_exclusive(|slab| {
            slab.get(handle)
                .map(|s| s.pcount)
                .ok_or_else(|| RtpProxyError::SessionNotFound(format!("{:?}", handle)))
        })
    }

    fn lookup_by_port(&self, port: u16) -> Option<SessionHandle> {
        self.session_list.lock().lookup_by_port(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::shims::ChannelNotifier;

    fn new_state() -> SharedState {
        let (notifier, _rx) = ChannelNotifier::new();
        SharedState::new(
            ServerConfig {
                bind: crate::config::BindAddrs {
                    external: "127.0.0.1".to_string(),
                    internal: None,
                },
                port_min: 20000,
                port_max: 20010,
                ..ServerConfig::default()
            },
            Arc::new(FakeClock::new(0.0)),
            Arc::new(notifier),
        )
    }

    #[test]
    fn insert_and_lookup() {
        let state = new_state();
        let handle = state.insert_session(SessionKind::Rtp, "call-1".to_string()).unwrap();
        let port = state.with_exclusive(|slab| slab.get(handle).unwrap().legs[0].local_port);
        assert_eq!(state.lookup_by_port(port), Some(handle));
    }

    #[test]
    fn attach_sibling_links_both_ways() {
        let state = new_state();
        let rtp = state.insert_session(SessionKind::Rtp, "call-1".to_string()).unwrap();
        let rtcp = state.insert_session(SessionKind::Rtcp, "call-1".to_string()).unwrap();
        state.attach_sibling(rtp, rtcp).unwrap();
        let (rtp_sib, rtcp_sib) = state.with_exclusive(|slab| {
            (slab.get(rtp).unwrap().sibling, slab.get(rtcp).unwrap().sibling)
        });
        assert_eq!(rtp_sib, Some(rtcp));
        assert_eq!(rtcp_sib, Some(rtp));
    }

    #[test]
    fn delete_frees_port() {
        let state = new_state();
        let before = state.with_exclusive(|slab| slab.available_ports());
        let handle = state.insert_session(SessionKind::Rtp, "call-1".to_string()).unwrap();
        state.delete_session(handle).unwrap();
        let after = state.with_exclusive(|slab| slab.available_ports());
        assert_eq!(before, after);
    }
}

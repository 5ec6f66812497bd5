//! Session and leg data model.

use std::net::{SocketAddr, UdpSocket};

use crate::error::{RecvErrorKind, Result, RtpProxyError};
use crate::packet::{Packet, MAX_PACKET_SIZE};
use crate::shims::{Recorder, Resizer, RtpServer};

/// Leg index: the callee side of the call.
pub const CALLEE: usize = 0;
/// Leg index: the caller side of the call.
pub const CALLER: usize = 1;

/// One side of a relayed session: a proxy-owned non-blocking UDP socket plus
/// the address-learning state for that peer.
pub struct Leg {
    sock: UdpSocket,
    pub local_addr: SocketAddr,
    pub local_port: u16,
    pub remote_addr: Option<SocketAddr>,
    pub prev_remote_addr: Option<SocketAddr>,
    pub asymmetric: bool,
    pub can_update: bool,
    pub untrusted_addr: bool,
    pub last_update: f64,
    pub ttl: u32,
}

impl Leg {
    /// Bind a fresh non-blocking UDP socket on `port` of `bind_host`.
    pub fn bind(bind_host: &str, port: u16) -> Result<Self> {
        let sock = UdpSocket::bind((bind_host, port))
            .map_err(|e| RtpProxyError::SocketUnavailable(e.to_string()))?;
        sock.set_nonblocking(true)
            .map_err(|e| RtpProxyError::SocketUnavailable(e.to_string()))?;
        let local_addr = sock
            .local_addr()
            .map_err(|e| RtpProxyError::SocketUnavailable(e.to_string()))?;
        Ok(Leg {
            sock,
            local_addr,
            local_port: port,
            remote_addr: None,
            prev_remote_addr: None,
            asymmetric: false,
            can_update: true,
            untrusted_addr: false,
            last_update: 0.0,
            ttl: 0,
        })
    }

    pub fn fd(&self) -> i32 {
        use std::os::unix::io::AsRawFd;
        self.sock.as_raw_fd()
    }

    /// Try to read one datagram without blocking.
    pub fn recv(&self, now: f64) -> std::result::Result<Packet, RecvErrorKind> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        match self.sock.recv_from(&mut buf) {
            Ok((len, peer_addr)) => {
                buf.truncate(len);
                Ok(Packet::new(buf, peer_addr, self.local_addr, now))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(RecvErrorKind::WouldBlock),
            Err(_) => Err(RecvErrorKind::Transient),
        }
    }

    /// Send `payload` to `addr`, ignoring transient errors (never surfaced
    /// on the media path).
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) {
        let _ = self.sock.send_to(payload, addr);
    }
}

/// Which RFC 3550 stream a session carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Rtp,
    Rtcp,
}

/// Handle into a [`crate::registry::SessionSlab`]. Carries a generation so
/// that a stale handle (held by a since-freed sibling reference) is
/// detectable rather than aliasing a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub index: usize,
    pub generation: u64,
}

/// A bidirectional pairing with two legs. `pcount` mirrors the reference
/// implementation layout exactly: `pcount[0]`/`pcount[1]` are
/// per-leg received counts, `pcount[2]` is the shared forwarded count and
/// `pcount[3]` the shared dropped count.
pub struct Session {
    pub kind: SessionKind,
    pub legs: [Leg; 2],
    pub pcount: [u64; 4],
    /// Non-owning reference to the sibling RTP<->RTCP session.
    pub sibling: Option<SessionHandle>,
    /// This session's own handle, stamped on insertion.
    pub handle: Option<SessionHandle>,
    /// Row indices into the registry's compact descriptor/session arrays,
    /// one per leg.
    pub sidx: [Option<usize>; 2],
    /// True once both legs have been bound (mirrors `sp->complete`):
    /// the reactor only drains sockets for complete sessions.
    pub complete: bool,
    pub generators: [Option<Box<dyn RtpServer>>; 2],
    pub recorders: [Option<Box<dyn Recorder>>; 2],
    pub resizers: [Option<Box<dyn Resizer>>; 2],
    pub call_id: String,
}

impl Session {
    pub fn new(kind: SessionKind, call_id: String, callee_leg: Leg) -> Self {
        let caller_placeholder = callee_leg.local_addr;
        Session {
            kind,
            legs: [callee_leg, Leg::placeholder(caller_placeholder)],
            pcount: [0; 4],
            sibling: None,
            handle: None,
            sidx: [None, None],
            complete: false,
            generators: [None, None],
            recorders: [None, None],
            resizers: [None, None],
            call_id,
        }
    }

    /// Attach the caller leg, completing the session.
    pub fn attach_caller(&mut self, leg: Leg) {
        self.legs[CALLER] = leg;
        self.complete = true;
    }

    pub fn opposite(ridx: usize) -> usize {
        1 - ridx
    }

    /// Returns the session's shared TTL (unified mode: the minimum of the
    /// two legs'; independent mode is evaluated per-leg by the reactor, see
    /// `crate::reactor`).
    pub fn unified_ttl(&self) -> u32 {
        self.legs[CALLEE].ttl.min(self.legs[CALLER].ttl)
    }

    pub fn is_rtp(&self) -> bool {
        self.kind == SessionKind::Rtp
    }
}

impl Leg {
    /// Build a transient, unbound placeholder leg — replaced by
    /// [`Session::attach_caller`] once the second leg's socket is ready.
    /// The placeholder is never polled: it is only reachable before
    /// `complete` is set.
    fn placeholder(addr: SocketAddr) -> Self {
        // A placeholder never needs a live socket; bind an ephemeral one on
        // loopback so `Leg`'s invariants (a real fd exists) still hold.
        let sock = UdpSocket::bind((addr.ip(), 0)).expect("ephemeral bind never fails");
        sock.set_nonblocking(true).ok();
        let local_addr = sock.local_addr().unwrap_or(addr);
        Leg {
            sock,
            local_addr,
            local_port: local_addr.port(),
            remote_addr: None,
            prev_remote_addr: None,
            asymmetric: false,
            can_update: true,
            untrusted_addr: false,
            last_update: 0.0,
            ttl: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leg_bind_reports_local_port() {
        let leg = Leg::bind("127.0.0.1", 0).unwrap();
        assert!(leg.local_port > 0);
        assert_eq!(leg.local_addr.port(), leg.local_port);
    }

    #[test]
    fn recv_without_traffic_is_would_block() {
        let leg = Leg::bind("127.0.0.1", 0).unwrap();
        assert_eq!(leg.recv(0.0).unwrap_err(), RecvErrorKind::WouldBlock);
    }

    #[test]
    fn session_starts_incomplete() {
        let leg = Leg::bind("127.0.0.1", 0).unwrap();
        let session = Session::new(SessionKind::Rtp, "call-1".to_string(), leg);
        assert!(!session.complete);
    }
}

//! Address-learning and latching state machine.
//!
//! This module is deliberately free of locking and registry concerns: it
//! mutates a single [`Leg`] (and, for RTCP inference, the sibling leg) given
//! a just-received [`Packet`]. The reactor (`crate::reactor`) is responsible
//! for locating the right legs and calling [`learn`] once per drained
//! datagram.

use crate::config::UPDATE_WINDOW;
use crate::packet::Packet;
use crate::session::Leg;

/// Result of applying the address-learning rules to one received packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnOutcome {
    /// The packet failed the authenticity check and must not be forwarded.
    Dropped,
    /// The packet is accepted; the caller should hand it to the resizer or
    /// the forwarding path.
    Accepted,
}

fn leg_name(ridx: usize) -> &'static str {
    if ridx == 0 { "callee" } else { "caller" }
}

/// Apply the bootstrap/symmetric/asymmetric/RTCP-inference rules to `leg`,
/// given a packet received on leg index `ridx`. `sibling_rtcp_leg` is `Some`
/// only when this leg belongs to an RTP session that has a sibling RTCP
/// session (RTCP port inference).
///
/// Does not touch `pcount` or TTL — the caller (the reactor) owns those,
/// since they live on the `Session`, not the `Leg`.
pub fn learn(
    leg: &mut Leg,
    ridx: usize,
    packet: &Packet,
    now: f64,
    call_id: &str,
    session_is_rtp: bool,
    sibling_rtcp_leg: Option<&mut Leg>,
) -> LearnOutcome {
    let peer = packet.peer_addr;

    let current = match leg.remote_addr {
        None => {
            // Step 1: bootstrapping.
            leg.untrusted_addr = true;
            leg.remote_addr = Some(peer);
            tracing::info!(
                call_id,
                leg = leg_name(ridx),
                peer = %peer,
                kind = if session_is_rtp { "RTP" } else { "RTCP" },
                "address filled in"
            );
            fill_rtcp_sibling(ridx, peer, session_is_rtp, sibling_rtcp_leg);
            return LearnOutcome::Accepted;
        }
        Some(current) => current,
    };

    if !leg.asymmetric {
        // Step 2: symmetric authenticity.
        if peer == current {
            if leg.can_update
                && (leg.last_update == 0.0 || now - leg.last_update > UPDATE_WINDOW)
            {
                leg.can_update = false;
                leg.last_update = now;
                tracing::info!(
                    call_id,
                    leg = leg_name(ridx),
                    peer = %peer,
                    kind = if session_is_rtp { "RTP" } else { "RTCP" },
                    "address latched in"
                );
            }
            LearnOutcome::Accepted
        } else if !leg.can_update {
            LearnOutcome::Dropped
        } else {
            // New latch: overwrite and possibly stop future flapping.
            leg.untrusted_addr = true;
            let prev = leg.remote_addr;
            leg.prev_remote_addr = prev;
            leg.remote_addr = Some(peer);
            if prev.map(|p| p != peer).unwrap_or(true) {
                leg.can_update = false;
            }
            tracing::info!(
                call_id,
                leg = leg_name(ridx),
                peer = %peer,
                kind = if session_is_rtp { "RTP" } else { "RTCP" },
                "address filled in"
            );
            fill_rtcp_sibling(ridx, peer, session_is_rtp, sibling_rtcp_leg);
            LearnOutcome::Accepted
        }
    } else {
        // Step 3: asymmetric — host only.
        if peer.ip() == current.ip() {
            LearnOutcome::Accepted
        } else {
            LearnOutcome::Dropped
        }
    }
}

/// Step 4: RTCP port inference. Only applies when this leg belongs to an
/// RTP session with a live sibling RTCP session.
fn fill_rtcp_sibling(
    ridx: usize,
    peer: std::net::SocketAddr,
    session_is_rtp: bool,
    sibling_rtcp_leg: Option<&mut Leg>,
) {
    let Some(rtcp_leg) = sibling_rtcp_leg else {
        return;
    };
    if !session_is_rtp {
        return;
    }

    let needs_update = match rtcp_leg.remote_addr {
        None => true,
        Some(existing) => existing.ip() != peer.ip(),
    };
    if !needs_update {
        return;
    }

    let guessed_port = peer.port().wrapping_add(1);
    let guessed = std::net::SocketAddr::new(peer.ip(), guessed_port);
    rtcp_leg.remote_addr = Some(guessed);
    rtcp_leg.can_update = !rtcp_leg.asymmetric;

    tracing::info!(
        leg = leg_name(ridx),
        port = guessed_port,
        "guessing RTCP port"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Leg;

    fn packet_from(addr: &str) -> Packet {
        Packet::new(vec![1, 2, 3], addr.parse().unwrap(), "0.0.0.0:0".parse().unwrap(), 0.0)
    }

    #[test]
    fn bootstrap_fills_address_and_marks_untrusted() {
        let mut leg = Leg::bind("127.0.0.1", 0).unwrap();
        let pkt = packet_from("198.51.100.7:40000");
        let outcome = learn(&mut leg, 0, &pkt, 1.0, "call-1", true, None);
        assert_eq!(outcome, LearnOutcome::Accepted);
        assert_eq!(leg.remote_addr, Some(pkt.peer_addr));
        assert!(leg.untrusted_addr);
    }

    #[test]
    fn symmetric_rejects_mismatch_once_latched() {
        let mut leg = Leg::bind("127.0.0.1", 0).unwrap();
        leg.remote_addr = Some("198.51.100.7:40000".parse().unwrap());
        leg.can_update = false;
        let pkt = packet_from("198.51.100.7:40001");
        let outcome = learn(&mut leg, 0, &pkt, 1.0, "call-1", true, None);
        assert_eq!(outcome, LearnOutcome::Dropped);
        assert_eq!(leg.remote_addr, Some("198.51.100.7:40000".parse().unwrap()));
    }

    #[test]
    fn symmetric_accepts_exact_match() {
        let mut leg = Leg::bind("127.0.0.1", 0).unwrap();
        leg.remote_addr = Some("198.51.100.7:40000".parse().unwrap());
        leg.can_update = false;
        let pkt = packet_from("198.51.100.7:40000");
        let outcome = learn(&mut leg, 0, &pkt, 1.0, "call-1", true, None);
        assert_eq!(outcome, LearnOutcome::Accepted);
    }

    #[test]
    fn asymmetric_ignores_port() {
        let mut leg = Leg::bind("127.0.0.1", 0).unwrap();
        leg.asymmetric = true;
        leg.remote_addr = Some("198.51.100.7:40000".parse().unwrap());
        let pkt = packet_from("198.51.100.7:40001");
        let outcome = learn(&mut leg, 0, &pkt, 1.0, "call-1", true, None);
        assert_eq!(outcome, LearnOutcome::Accepted);
        assert_eq!(leg.remote_addr, Some("198.51.100.7:40000".parse().unwrap()));
    }

    #[test]
    fn asymmetric_drops_on_host_mismatch() {
        let mut leg = Leg::bind("127.0.0.1", 0).unwrap();
        leg.asymmetric = true;
        leg.remote_addr = Some("198.51.100.7:40000".parse().unwrap());
        let pkt = packet_from("203.0.113.5:40000");
        let outcome = learn(&mut leg, 0, &pkt, 1.0, "call-1", true, None);
        assert_eq!(outcome, LearnOutcome::Dropped);
    }

    #[test]
    fn rtcp_port_is_guessed_from_rtp_peer() {
        let mut leg = Leg::bind("127.0.0.1", 0).unwrap();
        let mut rtcp_leg = Leg::bind("127.0.0.1", 0).unwrap();
        let pkt = packet_from("198.51.100.7:40000");
        learn(&mut leg, 0, &pkt, 1.0, "call-1", true, Some(&mut rtcp_leg));
        assert_eq!(
            rtcp_leg.remote_addr,
            Some("198.51.100.7:40001".parse().unwrap())
        );
    }

    #[test]
    fn rtcp_inference_is_idempotent_on_repeat_peer() {
        let mut leg = Leg::bind("127.0.0.1", 0).unwrap();
        leg.remote_addr = Some("198.51.100.7:40000".parse().unwrap());
        leg.can_update = false;
        let mut rtcp_leg = Leg::bind("127.0.0.1", 0).unwrap();
        rtcp_leg.remote_addr = Some("198.51.100.7:40001".parse().unwrap());
        let pkt = packet_from("198.51.100.7:40000");
        learn(&mut leg, 0, &pkt, 1.0, "call-1", true, Some(&mut rtcp_leg));
        assert_eq!(
            rtcp_leg.remote_addr,
            Some("198.51.100.7:40001".parse().unwrap())
        );
    }
}

//! The forwarding reactor.
//!
//! A single-threaded `poll(2)` loop. No per-session parallelism: datagrams
//! on the same leg are always relayed in receive order because nothing else
//! ever touches that leg's socket between `recv` and `send_to`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::address::{self, LearnOutcome};
use crate::config::{LBR_THRS, TIMETICK};
use crate::error::RecvErrorKind;
use crate::session::{Session, SessionHandle, CALLEE, CALLER};
use crate::shared::SharedState;
use crate::shims::RtpServerPoll;

/// One polled leg: which session/leg it belongs to, and its raw fd.
struct PollRow {
    handle: SessionHandle,
    ridx: usize,
    fd: i32,
}

/// Owns the poll loop. Constructed once per process; `run` never returns
/// except on `stop` or a fatal startup error.
pub struct Reactor {
    state: Arc<SharedState>,
    stop: Arc<AtomicBool>,
    sleep_start: f64,
    last_tick_time: f64,
}

impl Reactor {
    pub fn new(state: Arc<SharedState>, stop: Arc<AtomicBool>) -> Self {
        let now = state.clock.now();
        Reactor {
            state,
            stop,
            sleep_start: now,
            last_tick_time: now,
        }
    }

    /// Run until `stop` is set. Blocking; intended to be the whole of the
    /// reactor thread's body.
    pub fn run(&mut self) {
        while !self.stop.load(Ordering::Relaxed) {
            self.tick();
        }
    }

    /// One reactor iteration. Split out of `run` so tests can single-step
    /// it with a `FakeClock`.
    pub fn tick(&mut self) {
        let poll_interval = 1.0 / f64::from(crate::config::POLL_RATE);
        let now = self.state.clock.now();

        // Step 1: pacing.
        if now < self.sleep_start {
            // Clock went backwards: resync and suppress one ticker tick.
            self.sleep_start = now;
            self.last_tick_time = now;
        } else {
            let delay = now - self.sleep_start;
            if delay < poll_interval {
                std::thread::sleep(Duration::from_secs_f64(poll_interval - delay));
            }
            self.sleep_start = self.state.clock.now();
        }

        // Step 2: snapshot the compact registry under the session-list lock.
        let rows = {
            let mut slab = self.state.poll_snapshot();
            let mut rows = Vec::new();
            for (handle, session) in slab.iter_mut() {
                if !session.complete {
                    continue;
                }
                rows.push(PollRow {
                    handle,
                    ridx: CALLEE,
                    fd: session.legs[CALLEE].fd(),
                });
                rows.push(PollRow {
                    handle,
                    ridx: CALLER,
                    fd: session.legs[CALLER].fd(),
                });
            }
            rows
        };

        if rows.is_empty() {
            std::thread::sleep(Duration::from_secs_f64(poll_interval));
            return;
        }

        let mut pollfds: Vec<libc::pollfd> = rows
            .iter()
            .map(|r| libc::pollfd {
                fd: r.fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let timeout_ms = (poll_interval * 1000.0) as libc::c_int;
        let ready = unsafe {
            libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms)
        };
        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return;
            }
            tracing::warn!(error = %err, "poll failed");
            return;
        }

        // Step 3: decide whether this is a ticker iteration.
        let now = self.state.clock.now();
        let alarm_tick = now - self.last_tick_time > TIMETICK;
        if alarm_tick {
            self.last_tick_time = now;
        }

        // Step 4: under the global lock, age sessions and drain sockets.
        let config = self.state.config.clone();
        let notifier = Arc::clone(&self.state.notifier);
        self.state.with_exclusive(|slab| {
            if alarm_tick {
                age_sessions(slab, &config, notifier.as_ref());
            }
            for (row, pfd) in rows.iter().zip(pollfds.iter()) {
                if pfd.revents & libc::POLLIN == 0 {
                    continue;
                }
                drain_one(slab, row.handle, row.ridx, now, &config);
            }
        });

        // Step 5: RTP-server sweep, still under the global lock.
        self.state.with_exclusive(|slab| {
            sweep_generators(slab, now, &config);
        });
    }
}

/// Ticker-driven TTL decrement and eviction.
///
/// Every complete session's own legs tick down independently, RTCP siblings
/// included. Liveness and eviction, though, are decided once per call: an
/// RTCP session with a live RTP sibling never evicts the pair on its own,
/// it's the RTP session's aging pass that does, and `remove` frees both
/// sides together. This avoids double-evicting (and double-notifying) a
/// single call when both halves of a pair go idle at once.
fn age_sessions(
    slab: &mut crate::registry::SessionSlab,
    config: &crate::config::ServerConfig,
    notifier: &dyn crate::shims::Notifier,
) {
    for (_handle, session) in slab.iter_mut() {
        if !session.complete {
            continue;
        }
        for leg in &mut session.legs {
            if leg.ttl > 0 {
                leg.ttl -= 1;
            }
        }
    }

    let mut expired = Vec::new();
    for (handle, session) in slab.iter_mut() {
        if !session.complete {
            continue;
        }
        if !session.is_rtp() && session.sibling.is_some() {
            continue;
        }
        let alive = match config.ttl_mode {
            crate::config::TtlMode::Unified => session.unified_ttl() > 0,
            crate::config::TtlMode::Independent => session.legs.iter().any(|leg| leg.ttl > 0),
        };
        if !alive {
            expired.push((handle, session.call_id.clone()));
        }
    }
    for (handle, call_id) in expired {
        if !slab.remove(handle).is_empty() {
            notifier.schedule(call_id);
        }
    }
}

/// Drain exactly one datagram from `ridx` of `handle`'s session. Refreshes
/// the receiving leg's TTL unconditionally once the packet is accepted,
/// regardless of whether a forwarding destination is latched yet.
fn drain_one(
    slab: &mut crate::registry::SessionSlab,
    handle: SessionHandle,
    ridx: usize,
    now: f64,
    config: &crate::config::ServerConfig,
) {
    let sibling = slab.get(handle).and_then(|s| s.sibling);
    let is_rtp = slab.get(handle).map(|s| s.is_rtp()).unwrap_or(false);

    let packet = {
        let Some(session) = slab.get(handle) else {
            return;
        };
        match session.legs[ridx].recv(now) {
            Ok(packet) => packet,
            Err(RecvErrorKind::WouldBlock) => return,
            Err(RecvErrorKind::Transient) => return,
        }
    };

    let call_id = slab.get(handle).map(|s| s.call_id.clone()).unwrap_or_default();

    let outcome = if is_rtp {
        if let Some(sibling) = sibling {
            match slab.get_two_mut(handle, sibling) {
                Some((session, sibling_session)) => address::learn(
                    &mut session.legs[ridx],
                    ridx,
                    &packet,
                    now,
                    &call_id,
                    true,
                    Some(&mut sibling_session.legs[ridx]),
                ),
                None => return,
            }
        } else {
            let Some(session) = slab.get_mut(handle) else {
                return;
            };
            address::learn(&mut session.legs[ridx], ridx, &packet, now, &call_id, true, None)
        }
    } else {
        let Some(session) = slab.get_mut(handle) else {
            return;
        };
        address::learn(&mut session.legs[ridx], ridx, &packet, now, &call_id, false, None)
    };

    if outcome != LearnOutcome::Accepted {
        return;
    }

    let Some(session) = slab.get_mut(handle) else {
        return;
    };
    session.pcount[ridx] += 1;
    session.legs[ridx].ttl = config.max_ttl;

    if session.resizers[ridx].is_some() {
        if let Some(resizer) = session.resizers[ridx].as_mut() {
            resizer.enqueue(packet);
        }
        loop {
            let ready = session.resizers[ridx].as_mut().and_then(|r| r.pull(now));
            match ready {
                Some(pkt) => forward(session, ridx, &pkt, config),
                None => break,
            }
        }
    } else {
        forward(session, ridx, &packet, config);
    }
}

/// Forwarding rule: send to the opposite leg, double-send under `LBR_THRS`,
/// tee to the recorder unless a generator owns the receiving leg.
fn forward(session: &mut Session, ridx: usize, packet: &crate::packet::Packet, config: &crate::config::ServerConfig) {
    let sidx = Session::opposite(ridx);
    let generator_active_on_dest = session.generators[sidx].is_some();
    let dest = session.legs[sidx].remote_addr;

    match dest {
        Some(dest) if !generator_active_on_dest => {
            session.legs[sidx].send_to(&packet.payload, dest);
            if config.dmode && packet.size() < LBR_THRS {
                session.legs[sidx].send_to(&packet.payload, dest);
            }
            session.pcount[2] += 1;
        }
        _ => {
            session.pcount[3] += 1;
        }
    }

    if session.generators[ridx].is_none() {
        if let Some(mut recorder) = session.recorders[ridx].take() {
            if let Err(err) = recorder.write(session, ridx, packet) {
                tracing::debug!(error = %err, "recorder write failed");
            }
            session.recorders[ridx] = Some(recorder);
        }
    }
}

/// Pull due packets from every attached generator.
fn sweep_generators(slab: &mut crate::registry::SessionSlab, now: f64, config: &crate::config::ServerConfig) {
    for (_handle, session) in slab.iter_mut() {
        for leg in [CALLEE, CALLER] {
            let Some(generator) = session.generators[leg].as_mut() else {
                continue;
            };
            match generator.pull(now) {
                RtpServerPoll::Later => {}
                RtpServerPoll::Packet(bytes) => {
                    if let Some(dest) = session.legs[leg].remote_addr {
                        session.legs[leg].send_to(&bytes, dest);
                        if config.dmode && bytes.len() < LBR_THRS {
                            session.legs[leg].send_to(&bytes, dest);
                        }
                    }
                }
                RtpServerPoll::EndOfStream => {
                    session.generators[leg] = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::{BindAddrs, ServerConfig};
    use crate::session::SessionKind;
    use crate::shared::CommandSink;
    use crate::shims::ChannelNotifier;
    use std::net::UdpSocket;

    fn new_state(port_min: u16, port_max: u16) -> Arc<SharedState> {
        let (notifier, _rx) = ChannelNotifier::new();
        Arc::new(SharedState::new(
            ServerConfig {
                bind: BindAddrs {
                    external: "127.0.0.1".to_string(),
                    internal: None,
                },
                port_min,
                port_max,
                ..ServerConfig::default()
            },
            Arc::new(FakeClock::new(1.0)),
            Arc::new(notifier),
        ))
    }

    #[test]
    fn tick_with_no_sessions_does_not_panic() {
        let state = new_state(21000, 21010);
        let mut reactor = Reactor::new(state, Arc::new(AtomicBool::new(false)));
        reactor.tick();
    }

    #[test]
    fn forward_drops_when_destination_unset() {
        let leg_a = crate::session::Leg::bind("127.0.0.1", 0).unwrap();
        let mut session = Session::new(SessionKind::Rtp, "call-1".to_string(), leg_a);
        let leg_b = crate::session::Leg::bind("127.0.0.1", 0).unwrap();
        session.attach_caller(leg_b);
        let config = ServerConfig::default();
        let packet = crate::packet::Packet::new(
            vec![1, 2, 3],
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
            0.0,
        );
        forward(&mut session, CALLEE, &packet, &config);
        assert_eq!(session.pcount[3], 1);
        assert_eq!(session.pcount[2], 0);
    }

    #[test]
    fn forward_sends_and_counts() {
        let leg_a = crate::session::Leg::bind("127.0.0.1", 0).unwrap();
        let mut session = Session::new(SessionKind::Rtp, "call-1".to_string(), leg_a);
        let leg_b = crate::session::Leg::bind("127.0.0.1", 0).unwrap();
        session.attach_caller(leg_b);

        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        session.legs[CALLER].remote_addr = Some(listener.local_addr().unwrap());

        let config = ServerConfig::default();
        let packet = crate::packet::Packet::new(
            vec![9, 9, 9],
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
            0.0,
        );
        forward(&mut session, CALLEE, &packet, &config);
        assert_eq!(session.pcount[2], 1);

        listener.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
        let mut buf = [0u8; 16];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[9, 9, 9]);
    }

    #[test]
    fn aging_evicts_sibling_pair_with_a_single_notification() {
        let (notifier, rx) = ChannelNotifier::new();
        let state = Arc::new(SharedState::new(
            ServerConfig {
                bind: BindAddrs {
                    external: "127.0.0.1".to_string(),
                    internal: None,
                },
                port_min: 22000,
                port_max: 22020,
                ..ServerConfig::default()
            },
            Arc::new(FakeClock::new(1.0)),
            Arc::new(notifier),
        ));

        let rtp = state.insert_session(SessionKind::Rtp, "call-1".to_string()).unwrap();
        state.complete_session(rtp).unwrap();
        let rtcp = state.insert_session(SessionKind::Rtcp, "call-1".to_string()).unwrap();
        state.complete_session(rtcp).unwrap();
        state.attach_sibling(rtp, rtcp).unwrap();

        // Both legs of both sessions are already at ttl 0 (never refreshed),
        // so the very next ticker pass evicts the pair.
        let config = state.config.clone();
        state.with_exclusive(|slab| {
            age_sessions(slab, &config, state.notifier.as_ref());
        });

        assert!(state.query_counters(rtp).is_err());
        assert!(state.query_counters(rtcp).is_err());
        assert_eq!(rx.try_iter().count(), 1, "one notification per call, not per session");
    }
}

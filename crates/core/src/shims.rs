//! External interface shims.
//!
//! The reactor never talks to recording, resizing, local media generation or
//! out-of-band notification directly: it goes through these traits, so tests
//! can swap in doubles instead of touching the filesystem or a real clock.

use std::fs::File;
use std::io::{self, Write as _};
use std::sync::mpsc;

use crate::packet::Packet;
use crate::session::Session;

/// Tees forwarded (and optionally dropped) media to storage.
pub trait Recorder: Send {
    fn write(&mut self, session: &Session, leg: usize, packet: &Packet) -> io::Result<()>;
}

/// Discards everything; the default when no `-r`/`-S` flag was given.
#[derive(Debug, Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn write(&mut self, _session: &Session, _leg: usize, _packet: &Packet) -> io::Result<()> {
        Ok(())
    }
}

/// Appends raw payloads to a single file, one record per `write` call.
///
/// This does not implement pcap framing for the `-C` flag; that output is
/// left for a follow-up once a pcap-writing crate is pulled into the
/// dependency stack.
pub struct FileRecorder {
    file: File,
}

impl FileRecorder {
    pub fn create(path: &str) -> io::Result<Self> {
        Ok(FileRecorder {
            file: File::create(path)?,
        })
    }
}

impl Recorder for FileRecorder {
    fn write(&mut self, _session: &Session, _leg: usize, packet: &Packet) -> io::Result<()> {
        self.file.write_all(&packet.payload)
    }
}

/// Buffers packets between a leg's recv loop and a session's send path.
///
/// The default implementation is a passthrough single-slot queue; a jitter
/// buffer or transcoder would implement this trait to reorder or resample
/// before `pull` hands a packet back to the reactor.
pub trait Resizer: Send {
    fn enqueue(&mut self, packet: Packet);
    fn pull(&mut self, now: f64) -> Option<Packet>;
}

#[derive(Debug, Default)]
pub struct NullResizer {
    pending: Option<Packet>,
}

impl Resizer for NullResizer {
    fn enqueue(&mut self, packet: Packet) {
        self.pending = Some(packet);
    }

    fn pull(&mut self, _now: f64) -> Option<Packet> {
        self.pending.take()
    }
}

/// Outcome of polling a locally-generated media source.
pub enum RtpServerPoll {
    /// No packet is due yet.
    Later,
    /// A packet ready to be sent on this leg.
    Packet(Vec<u8>),
    /// The generator has nothing further to send; the session may be torn
    /// down once its peer legs also go idle.
    EndOfStream,
}

/// A locally-generated RTP source substituting for a silent or missing peer
/// (used by the `-s` notify/local-generator flags).
pub trait RtpServer: Send {
    fn pull(&mut self, now: f64) -> RtpServerPoll;
}

/// Test double: never produces a packet. Mirrors rtpproxy's internal
/// "notify on answer" no-op generator.
#[derive(Debug, Default)]
pub struct SilenceGenerator;

impl RtpServer for SilenceGenerator {
    fn pull(&mut self, _now: f64) -> RtpServerPoll {
        RtpServerPoll::Later
    }
}

/// Out-of-band notification when a session is torn down (the `-n`/`timeout`
/// notify target).
pub trait Notifier: Send + Sync {
    fn schedule(&self, session_id: String);
}

/// In-memory notifier backed by an `mpsc` channel, for tests and for wiring
/// the reactor thread up to a command-processing thread in the same process.
pub struct ChannelNotifier {
    tx: mpsc::Sender<String>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel();
        (ChannelNotifier { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn schedule(&self, session_id: String) {
        let _ = self.tx.send(session_id);
    }
}

/// Placeholder for the Unix-domain-socket notify target (`-n unix:...`).
/// Not wired to a real socket yet: logs instead.
#[derive(Debug, Default)]
pub struct UnixNotifier;

impl Notifier for UnixNotifier {
    fn schedule(&self, session_id: String) {
        tracing::warn!(session_id, "unix notify target not implemented, dropping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_resizer_is_passthrough() {
        let mut resizer = NullResizer::default();
        assert!(resizer.pull(0.0).is_none());
        let pkt = Packet::new(vec![1], "127.0.0.1:1".parse().unwrap(), "127.0.0.1:2".parse().unwrap(), 0.0);
        resizer.enqueue(pkt.clone());
        let out = resizer.pull(0.0).unwrap();
        assert_eq!(out.payload, pkt.payload);
    }

    #[test]
    fn channel_notifier_delivers() {
        let (notifier, rx) = ChannelNotifier::new();
        notifier.schedule("call-1".to_string());
        assert_eq!(rx.recv().unwrap(), "call-1");
    }
}

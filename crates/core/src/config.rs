//! Stable, process-wide configuration consumed by the core.
//!
//! Mirrors the fields of `rtpproxy`'s `struct rtpp_proc_stable`: this is the
//! normalised result of parsing the CLI flags, not the flag parser itself
//! (that lives in `rtpproxy-cli`).

use crate::error::{Result, RtpProxyError};

/// Default reactor iterations per second (`POLL_RATE`). Bounds per-session
/// throughput at roughly this many forwarded packets/second, since exactly
/// one datagram is drained per socket per iteration.
pub const POLL_RATE: u32 = 100;

/// Eviction ticker period, in seconds.
pub const TIMETICK: f64 = 1.0;

/// Minimum interval between successive latch events on the same leg, used
/// only to coalesce "address latched in" log lines.
pub const UPDATE_WINDOW: f64 = 1.0;

/// Payload size (bytes) below which double-send duplicates a forwarded
/// packet when `dmode` is enabled.
pub const LBR_THRS: usize = 128;

/// Default session TTL in ticker units (`SESSION_TIMEOUT`).
pub const DEFAULT_MAX_TTL: u32 = 60;

/// Default TOS value applied to allocated sockets.
pub const DEFAULT_TOS: u8 = 0;

/// How a session's two legs' TTLs interact to decide liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlMode {
    /// Both legs must have a nonzero TTL for the session to stay alive; a
    /// single stalled leg does not evict the pair (`-i` absent).
    Unified,
    /// Each leg's TTL is evaluated independently; a stalled leg is dropped
    /// on its own (`-i`).
    Independent,
}

impl Default for TtlMode {
    fn default() -> Self {
        Self::Unified
    }
}

/// One bind address pair: `[external, internal]` in bridging mode, or just
/// `[addr, None]` otherwise.
#[derive(Debug, Clone)]
pub struct BindAddrs {
    pub external: String,
    pub internal: Option<String>,
}

/// Normalised, validated configuration shared by the reactor and the
/// command-channel thread.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port_min: u16,
    pub port_max: u16,
    pub max_ttl: u32,
    pub ttl_mode: TtlMode,
    pub tos: u8,
    /// Double-send mode (`-2`): duplicate forwarded packets under `LBR_THRS`.
    pub dmode: bool,
    /// Record RTCP in addition to RTP when a recorder is attached (`-R` clears this).
    pub record_rtcp: bool,
    pub record_dir: Option<String>,
    pub record_sdir: Option<String>,
    pub record_pcap: bool,
    pub record_all: bool,
    pub bind: BindAddrs,
    pub bridging: bool,
    pub advertised: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port_min: 35000,
            port_max: 65000,
            max_ttl: DEFAULT_MAX_TTL,
            ttl_mode: TtlMode::Unified,
            tos: DEFAULT_TOS,
            dmode: false,
            record_rtcp: true,
            record_dir: None,
            record_sdir: None,
            record_pcap: false,
            record_all: false,
            bind: BindAddrs {
                external: "0.0.0.0".to_string(),
                internal: None,
            },
            bridging: false,
            advertised: None,
        }
    }
}

impl ServerConfig {
    /// Round `port_min` up to even, round `port_max` down so that
    /// `port_max + 1` (the paired RTCP port) stays in range, then validate
    /// the interval.
    pub fn normalize_ports(mut port_min: u32, mut port_max: u32) -> Result<(u16, u16)> {
        if port_min % 2 != 0 {
            port_min += 1;
        }
        if port_max % 2 != 0 {
            port_max -= 1;
        } else {
            port_max -= 2;
        }

        let valid = |p: u32| (1..=65535).contains(&p);
        if !valid(port_min) {
            return Err(RtpProxyError::ConfigInvalid(
                "port_min not in range 1-65535".to_string(),
            ));
        }
        if !valid(port_max) {
            return Err(RtpProxyError::ConfigInvalid(
                "port_max not in range 1-65535".to_string(),
            ));
        }
        if port_min > port_max {
            return Err(RtpProxyError::ConfigInvalid(
                "port_min should be less than port_max".to_string(),
            ));
        }

        Ok((port_min as u16, port_max as u16))
    }

    /// Validate that `-S` was only given alongside `-r`, and that a bridging
    /// config mixes neither address families nor leaves a slot empty.
    pub fn validate(&self) -> Result<()> {
        if self.record_sdir.is_some() && self.record_dir.is_none() {
            return Err(RtpProxyError::ConfigInvalid(
                "-S switch requires -r switch".to_string(),
            ));
        }
        if self.bridging && self.bind.internal.is_none() {
            return Err(RtpProxyError::ConfigInvalid(
                "bridging mode requires exactly 2 listen addresses".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rounds_min_up_and_max_down_odd() {
        let (min, max) = ServerConfig::normalize_ports(35001, 65001).unwrap();
        assert_eq!(min, 35002);
        assert_eq!(max, 65000);
    }

    #[test]
    fn normalize_rounds_max_down_by_two_when_even() {
        let (min, max) = ServerConfig::normalize_ports(35000, 65000).unwrap();
        assert_eq!(min, 35000);
        assert_eq!(max, 64998);
    }

    #[test]
    fn normalize_rejects_crossed_range() {
        assert!(ServerConfig::normalize_ports(65000, 35000).is_err());
    }

    #[test]
    fn sdir_without_rdir_is_invalid() {
        let mut cfg = ServerConfig::default();
        cfg.record_sdir = Some("/tmp/sdir".to_string());
        assert!(cfg.validate().is_err());
    }
}

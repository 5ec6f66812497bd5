//! CLI flag surface, normalised into a `rtpproxy::config::ServerConfig`.

use clap::Parser;
use rtpproxy::config::{BindAddrs, ServerConfig, TtlMode};
use rtpproxy::error::{Result, RtpProxyError};

/// Standalone RTP/RTCP media relay daemon.
///
/// Flag letters are preserved bit-for-bit from the reference command-line
/// surface.
#[derive(Parser, Debug)]
#[command(name = "rtpproxy", about = "Standalone RTP/RTCP media relay daemon")]
pub struct Args {
    /// Run in the foreground instead of daemonising.
    #[arg(short = 'f')]
    pub foreground: bool,

    /// IPv4 bind host(s), `A` or `A/B` for bridging mode.
    #[arg(short = 'l')]
    pub listen: Option<String>,

    /// IPv6 bind host(s), `A` or `A/B` for bridging mode.
    #[arg(short = '6')]
    pub listen6: Option<String>,

    /// Command socket: `path`, `udp:host[:port]`, `udp6:host[:port]`, or `unix:path`.
    #[arg(short = 's')]
    pub control_socket: Option<String>,

    /// IP TOS value, 0..255.
    #[arg(short = 't')]
    pub tos: Option<u8>,

    /// Enable double-send mode for low-bitrate flows.
    #[arg(short = '2')]
    pub dmode: bool,

    /// Enable recording, writing to this directory.
    #[arg(short = 'r')]
    pub record_dir: Option<String>,

    /// Separate recording directory (requires `-r`).
    #[arg(short = 'S')]
    pub record_sdir: Option<String>,

    /// Disable RTCP recording.
    #[arg(short = 'R')]
    pub no_record_rtcp: bool,

    /// Pidfile path.
    #[arg(short = 'p')]
    pub pidfile: Option<String>,

    /// Maximum session TTL in ticker units.
    #[arg(short = 'T')]
    pub max_ttl: Option<u32>,

    /// `RLIMIT_NOFILE` to request at startup.
    #[arg(short = 'L')]
    pub nofile_limit: Option<u64>,

    /// Lowest proxy port to allocate.
    #[arg(short = 'm')]
    pub port_min: Option<u32>,

    /// Highest proxy port to allocate.
    #[arg(short = 'M')]
    pub port_max: Option<u32>,

    /// Drop privileges to `user[:group]` after binding.
    #[arg(short = 'u')]
    pub user: Option<String>,

    /// Skip the startup superuser check.
    #[arg(short = 'F')]
    pub skip_uid_check: bool,

    /// Use independent (per-leg) TTL eviction instead of unified.
    #[arg(short = 'i')]
    pub independent_ttl: bool,

    /// `unix:PATH` target for timeout notifications.
    #[arg(short = 'n')]
    pub notify_socket: Option<String>,

    /// Record in pcap format.
    #[arg(short = 'P')]
    pub pcap: bool,

    /// Record every session, not only those explicitly requested.
    #[arg(short = 'a')]
    pub record_all: bool,

    /// Log level, optionally `LEVEL:FACILITY`.
    #[arg(short = 'd')]
    pub log_level: Option<String>,

    /// Address advertised to the command channel in place of the bind address.
    #[arg(short = 'A')]
    pub advertised: Option<String>,

    /// Print protocol version and capabilities, then exit.
    #[arg(short = 'v')]
    pub version: bool,
}

impl Args {
    /// Normalise parsed flags into a `ServerConfig`, applying the
    /// port-rounding rule and the `-S`-requires-`-r` / bridging-address
    /// validations.
    pub fn into_config(self) -> Result<ServerConfig> {
        let (external, internal) = parse_bind(self.listen.as_deref().or(self.listen6.as_deref()))?;
        let bridging = internal.is_some();

        let port_min_in = self.port_min.unwrap_or(35000);
        let port_max_in = self.port_max.unwrap_or(65000);
        let (port_min, port_max) = ServerConfig::normalize_ports(port_min_in, port_max_in)?;

        let config = ServerConfig {
            port_min,
            port_max,
            max_ttl: self.max_ttl.unwrap_or(rtpproxy::config::DEFAULT_MAX_TTL),
            ttl_mode: if self.independent_ttl {
                TtlMode::Independent
            } else {
                TtlMode::Unified
            },
            tos: self.tos.unwrap_or(rtpproxy::config::DEFAULT_TOS),
            dmode: self.dmode,
            record_rtcp: !self.no_record_rtcp,
            record_dir: self.record_dir,
            record_sdir: self.record_sdir,
            record_pcap: self.pcap,
            record_all: self.record_all,
            bind: BindAddrs { external, internal },
            bridging,
            advertised: self.advertised,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Split `A[/B]` bind syntax into (external, optional internal).
fn parse_bind(spec: Option<&str>) -> Result<(String, Option<String>)> {
    let spec = spec.unwrap_or("0.0.0.0");
    match spec.split_once('/') {
        Some((a, b)) => {
            if a.is_empty() || b.is_empty() {
                return Err(RtpProxyError::ConfigInvalid(
                    "bridging bind spec requires two non-empty addresses".to_string(),
                ));
            }
            Ok((a.to_string(), Some(b.to_string())))
        }
        None => Ok((spec.to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_address_is_not_bridging() {
        let (external, internal) = parse_bind(Some("10.0.0.1")).unwrap();
        assert_eq!(external, "10.0.0.1");
        assert!(internal.is_none());
    }

    #[test]
    fn slash_form_enables_bridging() {
        let (external, internal) = parse_bind(Some("10.0.0.1/192.168.0.1")).unwrap();
        assert_eq!(external, "10.0.0.1");
        assert_eq!(internal.as_deref(), Some("192.168.0.1"));
    }

    #[test]
    fn rejects_dangling_slash() {
        assert!(parse_bind(Some("10.0.0.1/")).is_err());
    }
}

//! Startup sequencing: pidfile, rlimit, privilege drop, daemonisation,
//! signal handling.
//!
//! None of this lives in `rtpproxy-core`: the core never touches the
//! filesystem, `setuid`, or the process's own fd table, so the daemon
//! lifecycle is entirely this crate's concern.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rtpproxy::config::ServerConfig;

/// Drops the pidfile on exit, matching the reference implementation's guard
/// semantics: the pidfile and command socket path are removed by the
/// guard's `Drop`.
pub struct ShutdownGuard {
    pidfile: Option<PathBuf>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if let Some(path) = &self.pidfile {
            if let Err(err) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove pidfile");
            }
        }
    }
}

/// Write `pid\n` to `path`; returns a guard that removes it on drop.
pub fn write_pidfile(path: Option<&str>) -> io::Result<ShutdownGuard> {
    let Some(path) = path else {
        return Ok(ShutdownGuard { pidfile: None });
    };
    let pid = std::process::id();
    fs::write(path, format!("{pid}\n"))?;
    Ok(ShutdownGuard {
        pidfile: Some(Path::new(path).to_path_buf()),
    })
}

/// Raise `RLIMIT_NOFILE` to cover `2 * (port_max - port_min + 1)` sockets
/// plus fixed overhead, or to `requested` if given explicitly.
pub fn raise_nofile_limit(config: &ServerConfig, requested: Option<u64>) -> io::Result<()> {
    let needed = requested.unwrap_or_else(|| {
        let ports = (config.port_max - config.port_min) as u64 + 1;
        2 * ports + 64
    });

    let limit = libc::rlimit {
        rlim_cur: needed,
        rlim_max: needed,
    };
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Drop privileges to `user[:group]`. Must be called after every privileged
/// socket bind.
pub fn drop_privileges(spec: &str) -> io::Result<()> {
    let (user, group) = spec.split_once(':').map(|(u, g)| (u, Some(g))).unwrap_or((spec, None));

    let uid = resolve_uid(user)?;
    if let Some(group) = group {
        let gid = resolve_gid(group)?;
        if unsafe { libc::setgid(gid) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    if unsafe { libc::setuid(uid) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn resolve_uid(user: &str) -> io::Result<libc::uid_t> {
    if let Ok(uid) = user.parse::<libc::uid_t>() {
        return Ok(uid);
    }
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("resolving user name '{user}' requires nss lookup, pass a numeric uid"),
    ))
}

fn resolve_gid(group: &str) -> io::Result<libc::gid_t> {
    if let Ok(gid) = group.parse::<libc::gid_t>() {
        return Ok(gid);
    }
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("resolving group name '{group}' requires nss lookup, pass a numeric gid"),
    ))
}

/// `fork` into the background unless `-f` was given, matching `rtpproxy`'s
/// use of `daemon(3)`.
pub fn daemonize(foreground: bool) -> io::Result<()> {
    if foreground {
        return Ok(());
    }
    let rc = unsafe { libc::daemon(0, 0) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Install `SIGHUP`/`SIGINT`/`SIGTERM` handlers that flip `stop`: shutdown is
/// modelled as a reactor-loop exit flag, not a raw `exit(0)`.
pub fn install_signal_handlers(stop: Arc<AtomicBool>) -> io::Result<()> {
    for signal in [signal_hook::consts::SIGHUP, signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        let flag = Arc::clone(&stop);
        unsafe {
            signal_hook::low_level::register(signal, move || {
                flag.store(true, Ordering::SeqCst);
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pidfile_round_trips() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rtpproxy-test-{}.pid", std::process::id()));
        let path_str = path.to_str().unwrap();
        {
            let _guard = write_pidfile(Some(path_str)).unwrap();
            let contents = fs::read_to_string(&path).unwrap();
            assert_eq!(contents.trim(), std::process::id().to_string());
        }
        assert!(!path.exists());
    }

    #[test]
    fn no_pidfile_path_is_a_noop() {
        let guard = write_pidfile(None).unwrap();
        drop(guard);
    }

    #[test]
    fn numeric_user_spec_resolves() {
        let uid = resolve_uid("1000").unwrap();
        assert_eq!(uid, 1000);
    }
}

mod args;
mod startup;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;

use args::Args;
use rtpproxy::clock::MonotonicClock;
use rtpproxy::reactor::Reactor;
use rtpproxy::shared::SharedState;
use rtpproxy::shims::ChannelNotifier;

const PROTOCOL_VERSION: &str = "20230509";

fn main() {
    let args = Args::parse();

    if args.version {
        println!("rtpproxy {PROTOCOL_VERSION}");
        println!("capabilities: dmode, bridging, pcap-record, independent-ttl");
        return;
    }

    init_logging(args.log_level.as_deref());

    let nofile_limit = args.nofile_limit;
    let pidfile = args.pidfile.clone();
    let user = args.user.clone();
    let foreground = args.foreground;

    let config = match args.into_config() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = startup::raise_nofile_limit(&config, nofile_limit) {
        tracing::error!(error = %err, "failed to raise RLIMIT_NOFILE");
        std::process::exit(1);
    }

    if let Some(user) = user {
        if let Err(err) = startup::drop_privileges(&user) {
            tracing::error!(error = %err, "failed to drop privileges");
            std::process::exit(1);
        }
    }

    if let Err(err) = startup::daemonize(foreground) {
        tracing::error!(error = %err, "failed to daemonise");
        std::process::exit(1);
    }

    let _guard = match startup::write_pidfile(pidfile.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            tracing::error!(error = %err, "failed to write pidfile");
            std::process::exit(1);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    if let Err(err) = startup::install_signal_handlers(Arc::clone(&stop)) {
        tracing::error!(error = %err, "failed to install signal handlers");
        std::process::exit(1);
    }

    let (notifier, notifications) = ChannelNotifier::new();
    std::thread::spawn(move || {
        for call_id in notifications {
            tracing::info!(call_id, "session timed out");
        }
    });

    let state = Arc::new(SharedState::new(
        config,
        Arc::new(MonotonicClock::new()),
        Arc::new(notifier),
    ));

    tracing::info!("rtpproxy starting");
    let mut reactor = Reactor::new(state, stop);
    reactor.run();
    tracing::info!("rtpproxy exiting");
}

fn init_logging(level_spec: Option<&str>) {
    let level = level_spec
        .and_then(|spec| spec.split(':').next())
        .unwrap_or("info");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level))
        .init();
}

// Daemon entry point: CLI parsing, logging, pre-flight (uinput + control
// socket), signal handling, and the control accept loop.

use std::os::unix::net::UnixListener;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing_subscriber::EnvFilter;

use remapd::cli;
use remapd::config::ConfigDir;
use remapd::control::{self, Daemon};
use remapd::inventory;

/// Pre-flight failure: /dev/uinput or the control socket could not be set
/// up.
const EXIT_PREFLIGHT: i32 = 11;

/// Raise process priority so injection latency stays low under load.
/// Requires root or CAP_SYS_NICE; failing is fine.
fn set_high_priority() {
    // SAFETY: plain syscall wrapper with valid constant arguments.
    let res = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -20) };
    if res != 0 {
        tracing::debug!("unable to set niceness to -20");
    }
}

fn init_logging(args: &cli::Args) {
    let filter = if let Some(filter) = &args.log_filter {
        EnvFilter::new(filter.clone())
    } else if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn list_groups_and_exit() -> ! {
    match inventory::list_groups() {
        Ok(groups) => {
            println!("{:<40} {:<32} PATHS", "GROUP KEY", "NAME");
            println!("{}", "-".repeat(100));
            for group in groups {
                let paths: Vec<String> = group
                    .paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                println!("{:<40} {:<32} {}", group.key, group.name, paths.join(" "));
            }
            println!();
            println!("Reading /dev/input/event* usually needs root or membership in `input`.");
            exit(0);
        }
        Err(err) => {
            eprintln!("error listing device groups: {err}");
            exit(2);
        }
    }
}

fn main() {
    let args = cli::parse_args();
    init_logging(&args);

    if args.list_groups {
        list_groups_and_exit();
    }

    set_high_priority();

    let config_dir = args
        .config_dir
        .clone()
        .unwrap_or_else(ConfigDir::default_path);
    let socket_path = args
        .socket
        .clone()
        .unwrap_or_else(control::default_socket_path);
    tracing::info!(
        config_dir = %config_dir.display(),
        socket = %socket_path.display(),
        "remapd starting"
    );

    let daemon = Arc::new(Daemon::new(ConfigDir::new(config_dir)));

    // Pre-flight: the virtual outputs and the control socket must come up
    // before the daemon is of any use.
    if let Err(err) = daemon.supervisor.preflight() {
        tracing::error!(%err, "cannot create virtual output devices");
        exit(EXIT_PREFLIGHT);
    }
    // A stale socket from a previous run would block the bind.
    let _ = std::fs::remove_file(&socket_path);
    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(socket = %socket_path.display(), %err, "cannot bind control socket");
            exit(EXIT_PREFLIGHT);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_for_signals = Arc::clone(&running);
    let mut signals = match Signals::new([SIGTERM, SIGINT, SIGQUIT]) {
        Ok(signals) => signals,
        Err(err) => {
            tracing::error!(%err, "cannot install signal handlers");
            exit(EXIT_PREFLIGHT);
        }
    };
    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            tracing::info!(signal, "shutting down");
            running_for_signals.store(false, Ordering::SeqCst);
        }
    });

    // With --autoload, also watch for hot-plugged groups and start their
    // configured preset when they appear.
    let mut watcher = None;
    if args.autoload {
        daemon.autoload(None);
        let stop = Arc::new(AtomicBool::new(false));
        let (handle, events) = inventory::watch(Arc::clone(&stop), Duration::from_secs(2));
        let daemon_for_watch = Arc::clone(&daemon);
        let relay = std::thread::spawn(move || {
            for event in events {
                if let inventory::InventoryEvent::Appeared(group) = event {
                    let pairs = match daemon_for_watch.config_dir().autoload_pairs() {
                        Ok(pairs) => pairs,
                        Err(_) => continue,
                    };
                    if let Some((_, preset)) = pairs.iter().find(|(key, _)| *key == group.key) {
                        tracing::info!(group = %group.key, %preset, "device appeared, autoloading");
                        let _ = daemon_for_watch.handle(control::Request::StartInjection {
                            group_key: group.key.clone(),
                            preset_name: preset.clone(),
                        });
                    }
                }
            }
        });
        watcher = Some((stop, handle, relay));
    }

    if let Err(err) = control::serve(&daemon, listener, &running) {
        tracing::error!(%err, "control socket failed");
    }

    if let Some((stop, handle, relay)) = watcher {
        stop.store(true, Ordering::SeqCst);
        let _ = handle.join();
        let _ = relay.join();
    }

    daemon.supervisor.stop_all();
    let _ = std::fs::remove_file(&socket_path);
    tracing::info!("remapd stopped");
}

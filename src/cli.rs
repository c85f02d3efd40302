use std::path::PathBuf;

use clap::Parser;

/// Grab evdev input devices and re-emit their events through mappable
/// virtual devices: key remaps, combinations, macros and analog shaping,
/// configured per device group by preset files.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "Grab evdev input devices and re-emit their events through mappable virtual devices.\n\
Presets describe input combinations and their outputs (keys, macros, shaped axes); the daemon\n\
grabs the physical device group exclusively, consumes mapped events and forwards the rest, so\n\
the host keeps seeing unmapped activity.\n\
\n\
EXAMPLES:\n\
  # See which device groups are connected:\n\
  sudo remapd --list-groups\n\
\n\
  # Run the daemon and start everything configured for autoload:\n\
  sudo remapd --autoload\n\
\n\
  # Use a non-default config directory with debug logging:\n\
  sudo remapd --config-dir /etc/remapd --verbose\n\
\n\
  # Start one injection from another terminal (JSON over the control socket):\n\
  printf '%s\\n' '{\"op\":\"start_injection\",\"group_key\":\"mykbd-1a2b3c4d\",\"preset_name\":\"gaming\"}' \\\n\
    | socat - UNIX-CONNECT:/run/remapd.sock\n\
\n\
Presets live in <config-dir>/presets/<group>/<preset>.json; see the README for the record format."
)]
pub struct Args {
    /// Config directory (default: $XDG_CONFIG_HOME/remapd).
    #[arg(long, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Control socket path (default: $XDG_RUNTIME_DIR/remapd.sock).
    #[arg(long, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// List connected device groups and exit (requires read access to
    /// /dev/input/event*).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub list_groups: bool,

    /// Start the autoload pairs from config.json before serving.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub autoload: bool,

    /// Debug verbosity (shorthand for --log-filter debug).
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// Tracing filter, e.g. "info" or "info,remapd::injection=trace".
    /// Overrides RUST_LOG.
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,
}

pub fn parse_args() -> Args {
    Args::parse()
}

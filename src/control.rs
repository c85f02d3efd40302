//! The control surface: a JSON-lines request/response protocol over a
//! local Unix socket, consumed by the CLI and the GUI. Operation names and
//! payload shapes are stable.

use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigDir;
use crate::error::Error;
use crate::injection::{CounterSnapshot, Status, Supervisor};
use crate::inventory;
use crate::keys::SymbolTable;
use crate::vars::VarStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Health probe.
    Hello,
    ListGroups,
    StartInjection {
        group_key: String,
        preset_name: String,
    },
    StopInjection {
        group_key: String,
    },
    /// Start everything `config.json` lists under `autoload`.
    Autoload {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config_dir: Option<PathBuf>,
    },
    SetConfigDir {
        path: PathBuf,
    },
    Status {
        group_key: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_key: String,
    pub name: String,
    pub sub_device_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Response {
    Hello,
    Groups {
        groups: Vec<GroupInfo>,
    },
    Accepted,
    Rejected {
        reason: String,
    },
    Ok,
    Status {
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counters: Option<CounterSnapshot>,
    },
    Error {
        message: String,
    },
}

/// `$XDG_RUNTIME_DIR/remapd.sock`, or `/run/remapd.sock` for root.
pub fn default_socket_path() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("remapd.sock");
        }
    }
    PathBuf::from("/run/remapd.sock")
}

/// Daemon state the control server dispatches against.
pub struct Daemon {
    pub supervisor: Supervisor,
    config: Mutex<ConfigDir>,
}

impl Daemon {
    /// Builds the daemon around a config directory: symbol table with the
    /// host's xmodmap overrides, shared variable store, supervisor.
    pub fn new(config: ConfigDir) -> Self {
        let symbols = match config.load_xmodmap() {
            Ok(overrides) if !overrides.is_empty() => {
                Arc::new(SymbolTable::with_overrides(&overrides))
            }
            Ok(_) => Arc::new(SymbolTable::with_defaults()),
            Err(err) => {
                tracing::warn!(%err, "ignoring unreadable xmodmap.json");
                Arc::new(SymbolTable::with_defaults())
            }
        };
        let vars = Arc::new(VarStore::new());
        Daemon {
            supervisor: Supervisor::new(symbols, vars),
            config: Mutex::new(config),
        }
    }

    /// The active config directory (it can move via `SetConfigDir`).
    pub fn config_dir(&self) -> ConfigDir {
        self.config.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Hello => Response::Hello,
            Request::ListGroups => match inventory::list_groups() {
                Ok(groups) => Response::Groups {
                    groups: groups
                        .into_iter()
                        .map(|g| GroupInfo {
                            group_key: g.key,
                            name: g.name,
                            sub_device_paths: g.paths,
                        })
                        .collect(),
                },
                Err(err) => Response::Error {
                    message: err.to_string(),
                },
            },
            Request::StartInjection {
                group_key,
                preset_name,
            } => self.start_injection(&group_key, &preset_name),
            Request::StopInjection { group_key } => match self.supervisor.stop(&group_key) {
                Ok(()) => Response::Ok,
                Err(err) => Response::Error {
                    message: err.to_string(),
                },
            },
            Request::Autoload { config_dir } => self.autoload(config_dir),
            Request::SetConfigDir { path } => {
                *self.config.lock().unwrap_or_else(|p| p.into_inner()) = ConfigDir::new(path);
                Response::Ok
            }
            Request::Status { group_key } => Response::Status {
                status: self.supervisor.status(&group_key),
                counters: self.supervisor.counters(&group_key),
            },
        }
    }

    fn start_injection(&self, group_key: &str, preset_name: &str) -> Response {
        let config = self.config_dir();
        let preset = match config.load_preset(group_key, preset_name) {
            Ok(preset) => preset,
            Err(err) => {
                return Response::Rejected {
                    reason: err.to_string(),
                }
            }
        };
        match self.supervisor.start(group_key, preset) {
            Ok(()) => Response::Accepted,
            Err(err) if err.rejects_start() => Response::Rejected {
                reason: err.to_string(),
            },
            Err(err) => Response::Error {
                message: err.to_string(),
            },
        }
    }

    /// Starts every configured `(group, preset)` pair. Individual failures
    /// are reported and do not stop the iteration.
    pub fn autoload(&self, config_dir: Option<PathBuf>) -> Response {
        if let Some(path) = config_dir {
            *self.config.lock().unwrap_or_else(|p| p.into_inner()) = ConfigDir::new(path);
        }
        let pairs = match self.config_dir().autoload_pairs() {
            Ok(pairs) => pairs,
            Err(err) => {
                return Response::Error {
                    message: err.to_string(),
                }
            }
        };
        for (group_key, preset_name) in pairs {
            match self.start_injection(&group_key, &preset_name) {
                Response::Accepted => {
                    tracing::info!(group = %group_key, preset = %preset_name, "autoloaded");
                }
                Response::Rejected { reason } | Response::Error { message: reason } => {
                    tracing::warn!(group = %group_key, preset = %preset_name, %reason, "autoload skipped");
                }
                _ => {}
            }
        }
        Response::Ok
    }
}

/// Accept loop. Non-blocking accept with a short sleep so the `running`
/// flag is observed promptly; each connection is one short-lived CLI or
/// GUI exchange, handled inline.
pub fn serve(daemon: &Daemon, listener: UnixListener, running: &AtomicBool) -> io::Result<()> {
    listener.set_nonblocking(true)?;
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(daemon, stream) {
                    tracing::debug!(%err, "control connection error");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn handle_connection(daemon: &Daemon, stream: UnixStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_millis(500)))?;
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => daemon.handle(request),
            Err(err) => Response::Error {
                message: format!("bad request: {err}"),
            },
        };
        serde_json::to_writer(&mut writer, &response)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    Ok(())
}

/// One request/response round trip; the client side of the protocol.
pub fn request(socket: &Path, request: &Request) -> Result<Response, Error> {
    let stream = UnixStream::connect(socket)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut writer = stream.try_clone()?;
    serde_json::to_writer(&mut writer, request)
        .map_err(|e| Error::Config(format!("encoding request: {e}")))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    serde_json::from_str(&line).map_err(|e| Error::Config(format!("decoding response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_round_trip_as_json() {
        let req = Request::StartInjection {
            group_key: "kbd-12345678".into(),
            preset_name: "gaming".into(),
        };
        let text = serde_json::to_string(&req).unwrap();
        assert!(text.contains("\"op\":\"start_injection\""));
        let back: Request = serde_json::from_str(&text).unwrap();
        match back {
            Request::StartInjection {
                group_key,
                preset_name,
            } => {
                assert_eq!(group_key, "kbd-12345678");
                assert_eq!(preset_name, "gaming");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn responses_round_trip_as_json() {
        let resp = Response::Rejected {
            reason: "no devices".into(),
        };
        let text = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&text).unwrap();
        assert!(matches!(back, Response::Rejected { reason } if reason == "no devices"));
    }

    #[test]
    fn stop_on_idle_daemon_is_ok() {
        let daemon = Daemon::new(ConfigDir::new("/nonexistent"));
        let resp = daemon.handle(Request::StopInjection {
            group_key: "nope".into(),
        });
        assert!(matches!(resp, Response::Ok));
        let resp = daemon.handle(Request::Status {
            group_key: "nope".into(),
        });
        match resp {
            Response::Status { status, counters } => {
                assert_eq!(status, Status::Stopped);
                assert!(counters.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hello_answers_hello() {
        let daemon = Daemon::new(ConfigDir::new("/nonexistent"));
        assert!(matches!(daemon.handle(Request::Hello), Response::Hello));
    }
}

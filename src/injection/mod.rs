//! The injection engine: per-device pipelines from grabbed hardware to
//! virtual outputs, owned and supervised per device group.

pub mod axis;
pub mod context;
pub mod graph;
pub mod handlers;
pub mod producer;
pub mod resolver;

pub use context::{Context, CounterSnapshot, Counters, EngineCx};
pub use graph::{AbsRanges, HandlerGraph};
pub use resolver::Verdict;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::event::{self, TaggedEvent};
use crate::inventory;
use crate::keys::SymbolTable;
use crate::macros::MacroRuntime;
use crate::preset::validate;
use crate::preset::Preset;
use crate::uinputs::{self, DeviceLeds, LedProbe, NoLeds, OutputRegistry, UinputSink};
use crate::vars::VarStore;

/// Capacity of the producer -> engine merge channel.
const MERGE_CHANNEL_CAP: usize = 1024;

/// Slack added on top of the largest `release_timeout` when draining.
const DRAIN_SLACK_MS: u64 = 100;

/// Lifecycle of one injection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Status {
    Starting,
    Running,
    Stopped,
    Failed(String),
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Starting => write!(f, "starting"),
            Status::Running => write!(f, "running"),
            Status::Stopped => write!(f, "stopped"),
            Status::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

struct Injection {
    stop: Arc<AtomicBool>,
    status: Arc<Mutex<Status>>,
    counters: Arc<Counters>,
    sink: Arc<UinputSink>,
    producers: Vec<JoinHandle<()>>,
    engine: Option<JoinHandle<()>>,
}

/// Owns every running injection plus the engine-wide singletons (virtual
/// outputs, symbol table, shared variables) as explicit state.
pub struct Supervisor {
    registry: Mutex<Option<Arc<OutputRegistry>>>,
    symbols: Arc<SymbolTable>,
    vars: Arc<VarStore>,
    injections: Mutex<HashMap<String, Injection>>,
}

impl Supervisor {
    pub fn new(symbols: Arc<SymbolTable>, vars: Arc<VarStore>) -> Self {
        Supervisor {
            registry: Mutex::new(None),
            symbols,
            vars,
            injections: Mutex::new(HashMap::new()),
        }
    }

    /// Opens the named virtual outputs. Called once at daemon startup so
    /// missing uinput access fails pre-flight rather than on first start.
    pub fn preflight(&self) -> Result<(), Error> {
        self.ensure_registry().map(|_| ())
    }

    fn ensure_registry(&self) -> Result<Arc<OutputRegistry>, Error> {
        let mut slot = self.registry.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(registry) = slot.as_ref() {
            return Ok(Arc::clone(registry));
        }
        let registry = Arc::new(OutputRegistry::create()?);
        *slot = Some(Arc::clone(&registry));
        Ok(registry)
    }

    /// Grabs the group's sub-devices and brings the pipeline up. A grab
    /// failure on any sub-device aborts the whole start and releases the
    /// partial grabs.
    pub fn start(&self, group_key: &str, preset: Preset) -> Result<(), Error> {
        // Restarting a running group replaces its injection.
        self.stop(group_key)?;

        let paths = inventory::resolve(group_key)?;
        if paths.is_empty() {
            return Err(Error::NoDevicesFound(group_key.to_string()));
        }

        let compiled = validate::compile(&preset, &self.symbols)?;

        // Grab all sub-devices up front; dropping a Device releases its
        // grab, so bailing anywhere below cleans up by itself.
        let mut devices: Vec<(PathBuf, evdev::Device)> = Vec::with_capacity(paths.len());
        for path in paths {
            let mut device = evdev::Device::open(&path).map_err(|err| open_error(&path, err))?;
            device.grab().map_err(|err| {
                Error::PermissionDenied(format!("grabbing {}: {err}", path.display()))
            })?;
            devices.push((path, device));
        }

        let mut ranges = AbsRanges::new();
        for (_, device) in &devices {
            let origin = inventory::origin_hash(device);
            if let Ok(absinfo) = device.get_absinfo() {
                for (axis, info) in absinfo {
                    ranges.insert(origin, axis.0, (info.minimum(), info.maximum()));
                }
            }
        }

        let graph = HandlerGraph::build(&compiled, &ranges)?;

        let registry = self.ensure_registry()?;
        let source_refs: Vec<&evdev::Device> = devices.iter().map(|(_, d)| d).collect();
        let forward = uinputs::create_forward_device(group_key, &source_refs)?;
        let leds = led_probe(&devices);
        drop(source_refs);

        let sink = Arc::new(UinputSink::new(registry, forward));
        let counters = Arc::new(Counters::default());
        let ctx = Context {
            preset: compiled,
            symbols: Arc::clone(&self.symbols),
            sink: Arc::clone(&sink) as Arc<dyn uinputs::OutputSink>,
            leds,
            vars: Arc::clone(&self.vars),
            counters: Arc::clone(&counters),
        };

        let stop = Arc::new(AtomicBool::new(false));
        let status = Arc::new(Mutex::new(Status::Starting));
        let (tx, rx) = bounded::<TaggedEvent>(MERGE_CHANNEL_CAP);

        let mut producers = Vec::with_capacity(devices.len());
        for (path, device) in devices {
            let origin = inventory::origin_hash(&device);
            producers.push(producer::spawn(
                device,
                path,
                origin,
                tx.clone(),
                Arc::clone(&stop),
            ));
        }
        drop(tx);

        let drain_bound_ms = ctx.preset.max_release_timeout_ms() + DRAIN_SLACK_MS;
        let engine = spawn_engine(
            group_key.to_string(),
            graph,
            ctx,
            rx,
            Arc::clone(&stop),
            Arc::clone(&status),
            drain_bound_ms,
        );

        tracing::info!(
            group = group_key,
            preset = %preset.name,
            producers = producers.len(),
            "injection started"
        );

        let mut injections = self.injections.lock().unwrap_or_else(|p| p.into_inner());
        injections.insert(
            group_key.to_string(),
            Injection {
                stop,
                status,
                counters,
                sink,
                producers,
                engine: Some(engine),
            },
        );
        Ok(())
    }

    /// Stops an injection and waits for its drain. Stopping a group that
    /// is not running is a no-op.
    pub fn stop(&self, group_key: &str) -> Result<(), Error> {
        let injection = {
            let mut injections = self.injections.lock().unwrap_or_else(|p| p.into_inner());
            injections.remove(group_key)
        };
        let Some(mut injection) = injection else {
            return Ok(());
        };
        injection.stop.store(true, Ordering::SeqCst);
        for producer in injection.producers.drain(..) {
            let _ = producer.join();
        }
        if let Some(engine) = injection.engine.take() {
            let _ = engine.join();
        }
        tracing::info!(group = group_key, "injection stopped");
        Ok(())
    }

    pub fn stop_all(&self) {
        let keys: Vec<String> = {
            let injections = self.injections.lock().unwrap_or_else(|p| p.into_inner());
            injections.keys().cloned().collect()
        };
        for key in keys {
            let _ = self.stop(&key);
        }
    }

    pub fn status(&self, group_key: &str) -> Status {
        let injections = self.injections.lock().unwrap_or_else(|p| p.into_inner());
        injections
            .get(group_key)
            .map(|i| i.status.lock().unwrap_or_else(|p| p.into_inner()).clone())
            .unwrap_or(Status::Stopped)
    }

    /// Counter snapshot for a running injection.
    pub fn counters(&self, group_key: &str) -> Option<CounterSnapshot> {
        let injections = self.injections.lock().unwrap_or_else(|p| p.into_inner());
        injections.get(group_key).map(|i| {
            let mut snapshot = i.counters.snapshot();
            snapshot.dropped_writes = i.sink.dropped_writes();
            snapshot
        })
    }

    pub fn running_groups(&self) -> Vec<String> {
        let injections = self.injections.lock().unwrap_or_else(|p| p.into_inner());
        injections.keys().cloned().collect()
    }
}

fn open_error(path: &std::path::Path, err: std::io::Error) -> Error {
    if err.kind() == ErrorKind::PermissionDenied {
        Error::PermissionDenied(format!("opening {}: {err}", path.display()))
    } else {
        Error::Io(err)
    }
}

/// LED state comes from a second, non-grabbed handle on the first
/// LED-capable sub-device.
fn led_probe(devices: &[(PathBuf, evdev::Device)]) -> Arc<dyn LedProbe> {
    for (path, device) in devices {
        if device
            .supported_events()
            .contains(evdev::EventType::LED)
        {
            match evdev::Device::open(path) {
                Ok(handle) => return Arc::new(DeviceLeds::new(handle)),
                Err(err) => {
                    tracing::debug!(path = %path.display(), %err, "LED probe open failed");
                }
            }
        }
    }
    Arc::new(NoLeds)
}

#[allow(clippy::too_many_arguments)]
fn spawn_engine(
    group: String,
    mut graph: HandlerGraph,
    ctx: Context,
    rx: Receiver<TaggedEvent>,
    stop: Arc<AtomicBool>,
    status: Arc<Mutex<Status>>,
    drain_bound_ms: u64,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("engine-{group}"))
        .spawn(move || {
            let started = Instant::now();
            set_status(&status, Status::Running);
            let mut runtime = MacroRuntime::new();

            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let now = event::now_microseconds();
                let deadline = min_deadline(graph.next_deadline(), runtime.next_deadline());
                let timeout_us = deadline
                    .map(|d| d.saturating_sub(now))
                    .unwrap_or(50_000)
                    .min(50_000);

                match rx.recv_timeout(Duration::from_micros(timeout_us)) {
                    Ok(tagged) => {
                        let mut cx = EngineCx {
                            ctx: &ctx,
                            runtime: &mut runtime,
                        };
                        graph.handle_event(tagged, &mut cx);
                        // Drain whatever the producers batched up.
                        while let Ok(more) = rx.try_recv() {
                            graph.handle_event(more, &mut cx);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        // Every producer is gone (all sub-devices lost).
                        tracing::info!(group, "all producers gone, stopping injection");
                        break;
                    }
                }

                let now = event::now_microseconds();
                let mut cx = EngineCx {
                    ctx: &ctx,
                    runtime: &mut runtime,
                };
                graph.tick(now, &mut cx);
                let task_cx = ctx.task_ctx();
                runtime.poll(now, &task_cx);
                ctx.counters
                    .macro_errors
                    .store(runtime.stats().errors, std::sync::atomic::Ordering::Relaxed);
            }

            // Cooperative drain: release pressed outputs, cancel macro
            // tasks, and give timer tails until the bound expires.
            let drain_start = event::now_microseconds();
            let drain_deadline = drain_start + drain_bound_ms * 1000;
            {
                let mut cx = EngineCx {
                    ctx: &ctx,
                    runtime: &mut runtime,
                };
                graph.drain(drain_start, &mut cx);
            }
            let task_cx = ctx.task_ctx();
            runtime.cancel_all(drain_start, &task_cx);
            while !runtime.is_idle() {
                let now = event::now_microseconds();
                if now >= drain_deadline {
                    tracing::warn!(group, "drain bound hit, aborting remaining macro tasks");
                    runtime.abort_all(&task_cx);
                    break;
                }
                let wake = runtime
                    .next_deadline()
                    .map(|d| d.min(drain_deadline))
                    .unwrap_or(drain_deadline);
                std::thread::sleep(Duration::from_micros(wake.saturating_sub(now).min(10_000)));
                runtime.poll(event::now_microseconds(), &task_cx);
            }

            ctx.counters
                .macro_errors
                .store(runtime.stats().errors, std::sync::atomic::Ordering::Relaxed);
            let snapshot = ctx.counters.snapshot();
            tracing::info!(
                group,
                runtime = %humantime::format_duration(started.elapsed()),
                events_in = snapshot.events_in,
                mapped = snapshot.mapped,
                forwarded = snapshot.forwarded,
                macro_errors = snapshot.macro_errors,
                "engine finished"
            );
            set_status(&status, Status::Stopped);
        })
        .expect("spawning engine thread")
}

fn min_deadline(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn set_status(status: &Mutex<Status>, value: Status) {
    *status.lock().unwrap_or_else(|p| p.into_inner()) = value;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> Supervisor {
        Supervisor::new(
            Arc::new(SymbolTable::with_defaults()),
            Arc::new(VarStore::new()),
        )
    }

    #[test]
    fn stop_is_idempotent() {
        let s = supervisor();
        assert!(s.stop("no-such-group").is_ok());
        assert!(s.stop("no-such-group").is_ok());
    }

    #[test]
    fn unknown_group_reports_stopped() {
        let s = supervisor();
        assert_eq!(s.status("no-such-group"), Status::Stopped);
        assert!(s.counters("no-such-group").is_none());
    }
}

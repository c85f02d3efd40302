//! Per-injection context: the validated preset, the symbol table, the
//! output sink, LED probe, the process-wide variable store, and the
//! injection's counters. Handlers and macro tasks take references; nothing
//! in the engine reaches for globals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::keys::SymbolTable;
use crate::macros::task::TaskCtx;
use crate::macros::MacroRuntime;
use crate::preset::validate::CompiledPreset;
use crate::uinputs::{LedProbe, OutputSink};
use crate::vars::VarStore;

/// Observability counters, shared with the supervisor for `status`.
#[derive(Debug, Default)]
pub struct Counters {
    pub events_in: AtomicU64,
    pub mapped: AtomicU64,
    pub forwarded: AtomicU64,
    pub macro_errors: AtomicU64,
    pub dropped_writes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub events_in: u64,
    pub mapped: u64,
    pub forwarded: u64,
    pub macro_errors: u64,
    pub dropped_writes: u64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            events_in: self.events_in.load(Ordering::Relaxed),
            mapped: self.mapped.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            macro_errors: self.macro_errors.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
        }
    }
}

/// Immutable bundle owned by one injection. Destroyed when the supervisor
/// tears the injection down.
pub struct Context {
    pub preset: CompiledPreset,
    pub symbols: Arc<SymbolTable>,
    pub sink: Arc<dyn OutputSink>,
    pub leds: Arc<dyn LedProbe>,
    pub vars: Arc<VarStore>,
    pub counters: Arc<Counters>,
}

impl Context {
    /// The borrow bundle macro tasks run against. Derived from the shared
    /// context so the caller can keep mutating the runtime alongside it.
    pub fn task_ctx(&self) -> TaskCtx<'_> {
        TaskCtx {
            sink: &*self.sink,
            vars: &self.vars,
            leds: &*self.leds,
            symbols: &self.symbols,
        }
    }
}

/// The mutable half the engine threads through handler calls: the shared
/// context plus this injection's macro runtime.
pub struct EngineCx<'a> {
    pub ctx: &'a Context,
    pub runtime: &'a mut MacroRuntime,
}

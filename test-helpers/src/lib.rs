//! Common helpers for tests and benchmarks: event constructors, mapping
//! builders, a capturing output sink, and a full engine harness driven by
//! synthetic time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use remapd::error::Error;
use remapd::event::{Event, TaggedEvent, EV_ABS, EV_KEY, EV_REL};
use remapd::injection::{AbsRanges, Context, Counters, EngineCx, HandlerGraph};
use remapd::keys::SymbolTable;
use remapd::macros::MacroRuntime;
use remapd::preset::validate;
use remapd::preset::{InputCombination, InputConfig, Mapping, Preset, TargetUinput};
use remapd::uinputs::{Led, LedProbe, OutputSink, Route};
use remapd::vars::VarStore;

// Key codes the tests keep reaching for.
pub const KEY_A: u16 = 30;
pub const KEY_S: u16 = 31;
pub const KEY_B: u16 = 48;
pub const KEY_LEFTSHIFT: u16 = 42;
pub const BTN_MIDDLE: u16 = 0x112;

/// Default sub-device origin used by single-device tests.
pub const ORIGIN: u64 = 0xdead_beef;

// --- Event constructors ---

pub fn key_ev(ts_us: u64, code: u16, value: i32) -> TaggedEvent {
    TaggedEvent::new(Event::new(EV_KEY, code, value), ORIGIN, ts_us)
}

pub fn abs_ev(ts_us: u64, code: u16, value: i32) -> TaggedEvent {
    TaggedEvent::new(Event::new(EV_ABS, code, value), ORIGIN, ts_us)
}

pub fn rel_ev(ts_us: u64, code: u16, value: i32) -> TaggedEvent {
    TaggedEvent::new(Event::new(EV_REL, code, value), ORIGIN, ts_us)
}

// --- Mapping builders ---

pub fn combo(codes: &[u16]) -> InputCombination {
    InputCombination::new(codes.iter().map(|&c| InputConfig::key(c)).collect())
}

/// `[keys...] -> KEY out` on the keyboard output.
pub fn key_mapping(codes: &[u16], out: u16) -> Mapping {
    let mut m = Mapping::new(combo(codes), TargetUinput::Keyboard);
    m.output_type = Some(EV_KEY);
    m.output_code = Some(out);
    m
}

/// `[keys...] -> macro text` on the given target.
pub fn macro_mapping(codes: &[u16], text: &str, target: TargetUinput) -> Mapping {
    let mut m = Mapping::new(combo(codes), target);
    m.output_symbol = Some(text.to_string());
    m
}

pub fn preset(mappings: Vec<Mapping>) -> Preset {
    Preset::with_mappings("test-preset", "test-group", mappings)
}

// --- Capturing sink ---

/// Records emissions instead of writing uinput.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<(Route, Event)>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains and returns everything captured so far.
    pub fn take(&self) -> Vec<(Route, Event)> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<(Route, Event)> {
        self.events.lock().unwrap().clone()
    }
}

impl OutputSink for CaptureSink {
    fn emit(&self, route: Route, event: Event) -> Result<(), Error> {
        self.events.lock().unwrap().push((route, event));
        Ok(())
    }
}

// --- LED stub ---

#[derive(Default)]
pub struct FixedLeds {
    capslock: AtomicBool,
    numlock: AtomicBool,
}

impl FixedLeds {
    pub fn set(&self, led: Led, on: bool) {
        match led {
            Led::CapsLock => self.capslock.store(on, Ordering::SeqCst),
            Led::NumLock => self.numlock.store(on, Ordering::SeqCst),
        }
    }
}

impl LedProbe for FixedLeds {
    fn led_on(&self, led: Led) -> bool {
        match led {
            Led::CapsLock => self.capslock.load(Ordering::SeqCst),
            Led::NumLock => self.numlock.load(Ordering::SeqCst),
        }
    }
}

// --- Engine harness ---

/// A whole injection pipeline minus devices: handler graph, resolver and
/// macro runtime against a capturing sink, driven by explicit timestamps.
pub struct EngineHarness {
    pub graph: HandlerGraph,
    pub runtime: MacroRuntime,
    pub ctx: Context,
    pub sink: Arc<CaptureSink>,
    pub leds: Arc<FixedLeds>,
}

impl EngineHarness {
    pub fn new(preset: Preset) -> Self {
        Self::build(preset, AbsRanges::new(), Arc::new(VarStore::new()))
    }

    pub fn with_ranges(preset: Preset, ranges: AbsRanges) -> Self {
        Self::build(preset, ranges, Arc::new(VarStore::new()))
    }

    pub fn with_vars(preset: Preset, vars: Arc<VarStore>) -> Self {
        Self::build(preset, AbsRanges::new(), vars)
    }

    fn build(preset: Preset, ranges: AbsRanges, vars: Arc<VarStore>) -> Self {
        let symbols = Arc::new(SymbolTable::with_defaults());
        let compiled = validate::compile(&preset, &symbols).expect("valid test preset");
        let graph = HandlerGraph::build(&compiled, &ranges).expect("buildable test graph");
        let sink = Arc::new(CaptureSink::new());
        let leds = Arc::new(FixedLeds::default());
        let ctx = Context {
            preset: compiled,
            symbols,
            sink: Arc::clone(&sink) as Arc<dyn OutputSink>,
            leds: Arc::clone(&leds) as Arc<dyn LedProbe>,
            vars,
            counters: Arc::new(Counters::default()),
        };
        EngineHarness {
            graph,
            runtime: MacroRuntime::new(),
            ctx,
            sink,
            leds,
        }
    }

    /// Feeds one event, then runs timers up to the event's timestamp.
    pub fn feed(&mut self, tagged: TaggedEvent) {
        let mut cx = EngineCx {
            ctx: &self.ctx,
            runtime: &mut self.runtime,
        };
        self.graph.handle_event(tagged, &mut cx);
        self.advance(tagged.time_us);
    }

    /// Runs graph timers and the macro runtime at `now`.
    pub fn advance(&mut self, now_us: u64) {
        let mut cx = EngineCx {
            ctx: &self.ctx,
            runtime: &mut self.runtime,
        };
        self.graph.tick(now_us, &mut cx);
        let task_cx = self.ctx.task_ctx();
        self.runtime.poll(now_us, &task_cx);
    }

    /// Advances through every pending deadline up to `until_us`, firing
    /// timers in order, like the engine loop does with real time.
    pub fn run_until(&mut self, until_us: u64) {
        loop {
            let next = [self.graph.next_deadline(), self.runtime.next_deadline()]
                .into_iter()
                .flatten()
                .min();
            match next {
                Some(deadline) if deadline <= until_us => self.advance(deadline),
                _ => break,
            }
        }
        self.advance(until_us);
    }

    /// Stop-time drain at `now`: releases outputs and cancels tasks, then
    /// runs timer tails until idle (bounded like the supervisor's drain).
    pub fn drain(&mut self, now_us: u64, bound_us: u64) {
        {
            let mut cx = EngineCx {
                ctx: &self.ctx,
                runtime: &mut self.runtime,
            };
            self.graph.drain(now_us, &mut cx);
        }
        let task_cx = self.ctx.task_ctx();
        self.runtime.cancel_all(now_us, &task_cx);
        let deadline = now_us + bound_us;
        let mut now = now_us;
        while !self.runtime.is_idle() && now < deadline {
            now = self
                .runtime
                .next_deadline()
                .map(|d| d.min(deadline))
                .unwrap_or(deadline);
            self.runtime.poll(now, &task_cx);
        }
        if !self.runtime.is_idle() {
            self.runtime.abort_all(&task_cx);
        }
    }

    /// Captured emissions so far, drained.
    pub fn outputs(&self) -> Vec<(Route, Event)> {
        self.sink.take()
    }
}

/// Filters a capture down to the key edges on one route.
pub fn key_edges(captured: &[(Route, Event)], route: Route) -> Vec<(u16, i32)> {
    captured
        .iter()
        .filter(|(r, ev)| *r == route && ev.ty == EV_KEY)
        .map(|(_, ev)| (ev.code, ev.value))
        .collect()
}

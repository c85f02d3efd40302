//! The per-mapping handler state machines.
//!
//! Trigger-style handlers (key, combination, macro, analog-to-key) are
//! thin executors: the [`Resolver`](super::resolver::Resolver) owns their
//! satisfaction state and tells them when to press and release. Axis
//! handlers own their own sample/tick state.

use std::sync::Arc;

use crate::event::{Event, TaggedEvent, EV_ABS, EV_KEY, EV_REL};
use crate::injection::axis::{self, FractionalCarry};
use crate::injection::context::{Counters, EngineCx};
use crate::injection::resolver::Verdict;
use crate::macros::Program;
use crate::preset::{Shaping, TargetUinput};
use crate::uinputs::{self, Route};

/// Which handler role a trigger executor plays; only affects logs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    /// Single key, 1-to-1 output.
    Key,
    /// Multi-config combination.
    Combination,
    /// Combination spawning a macro task.
    Macro,
    /// Analog threshold acting as a key.
    AnalogKey,
}

pub enum TriggerOutput {
    /// Consume and emit nothing.
    Disabled,
    Key { ty: u16, code: u16 },
    Macro(Arc<Program>),
}

/// Executes a combination's output when the resolver says so.
pub struct TriggerHandler {
    pub mapping_idx: usize,
    /// Resolver entry this handler listens to.
    pub entry: usize,
    pub kind: TriggerKind,
    pub name: String,
    pub output: TriggerOutput,
    target: TargetUinput,
    key_sleep_ms: u64,
    rel_rate: u32,
    /// Key codes of the combination; macro tasks use them to tell the
    /// trigger apart from "another key".
    trigger_codes: Vec<(u16, u16)>,
}

impl TriggerHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mapping_idx: usize,
        entry: usize,
        kind: TriggerKind,
        name: String,
        output: TriggerOutput,
        target: TargetUinput,
        key_sleep_ms: u64,
        rel_rate: u32,
        trigger_codes: Vec<(u16, u16)>,
    ) -> Self {
        TriggerHandler {
            mapping_idx,
            entry,
            kind,
            name,
            output,
            target,
            key_sleep_ms,
            rel_rate,
            trigger_codes,
        }
    }

    pub fn press(&self, now_us: u64, cx: &mut EngineCx) {
        match &self.output {
            TriggerOutput::Disabled => {}
            TriggerOutput::Key { ty, code } => {
                self.emit_edge(*ty, *code, 1, cx);
            }
            TriggerOutput::Macro(program) => {
                let ctx = cx.ctx;
                let task_cx = ctx.task_ctx();
                cx.runtime.spawn(
                    self.mapping_idx,
                    Arc::clone(program),
                    self.target,
                    self.key_sleep_ms,
                    self.rel_rate,
                    self.trigger_codes.clone(),
                    self.name.clone(),
                    now_us,
                    &task_cx,
                );
            }
        }
    }

    pub fn repeat(&self, cx: &mut EngineCx) {
        match &self.output {
            TriggerOutput::Key { ty, code } if *ty == EV_KEY => {
                self.emit_edge(*ty, *code, 2, cx);
            }
            // REL outputs tick again on key repeat (key-to-wheel style).
            TriggerOutput::Key { ty, code } if *ty == EV_REL => {
                self.emit_edge(*ty, *code, 1, cx);
            }
            _ => {}
        }
    }

    pub fn release(&self, now_us: u64, cx: &mut EngineCx) {
        match &self.output {
            TriggerOutput::Disabled => {}
            TriggerOutput::Key { ty, code } => {
                self.emit_edge(*ty, *code, 0, cx);
            }
            TriggerOutput::Macro(_) => {
                let ctx = cx.ctx;
                let task_cx = ctx.task_ctx();
                cx.runtime.release(self.mapping_idx, now_us, &task_cx);
            }
        }
    }

    /// Output-type-aware edge emission. KEY outputs mirror the edge value;
    /// a REL output emits one signed tick per press; an ABS output snaps
    /// to the axis extreme on press and back to center on release.
    fn emit_edge(&self, ty: u16, code: u16, value: i32, cx: &mut EngineCx) {
        let event = match ty {
            EV_KEY => Event::new(ty, code, value),
            EV_REL => {
                if value == 0 {
                    return;
                }
                Event::new(ty, code, 1)
            }
            EV_ABS => {
                let (min, max) = uinputs::abs_range(self.target, code).unwrap_or((0, 1));
                let raw = if value >= 1 { max } else { (min + max) / 2 };
                Event::new(ty, code, raw)
            }
            _ => Event::new(ty, code, value),
        };
        if cx.ctx.sink.emit(Route::Target(self.target), event).is_ok() {
            Counters::bump(&cx.ctx.counters.mapped);
        }
    }
}

/// ABS sample in, shaped ABS sample out.
pub struct AbsToAbsHandler {
    pub mapping_idx: usize,
    src: (u16, Option<u64>),
    in_min: i32,
    in_max: i32,
    out_code: u16,
    out_min: i32,
    out_max: i32,
    shape: Shaping,
    target: TargetUinput,
}

impl AbsToAbsHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mapping_idx: usize,
        src_code: u16,
        src_origin: Option<u64>,
        in_range: (i32, i32),
        out_code: u16,
        out_range: (i32, i32),
        shape: Shaping,
        target: TargetUinput,
    ) -> Self {
        AbsToAbsHandler {
            mapping_idx,
            src: (src_code, src_origin),
            in_min: in_range.0,
            in_max: in_range.1,
            out_code,
            out_min: out_range.0,
            out_max: out_range.1,
            shape,
            target,
        }
    }

    fn handle(&mut self, tagged: &TaggedEvent, cx: &mut EngineCx) -> Verdict {
        let x = axis::normalize_abs(tagged.event.value, self.in_min, self.in_max);
        let y = axis::shape(x, &self.shape);
        let out = axis::denormalize_abs(y, self.out_min, self.out_max);
        let event = Event::new(EV_ABS, self.out_code, out);
        if cx.ctx.sink.emit(Route::Target(self.target), event).is_ok() {
            Counters::bump(&cx.ctx.counters.mapped);
        }
        Verdict::Consumed
    }
}

/// ABS position in, REL ticks out at `rel_rate` Hz while the input sits
/// outside the deadzone.
pub struct AbsToRelHandler {
    pub mapping_idx: usize,
    src: (u16, Option<u64>),
    in_min: i32,
    in_max: i32,
    out_code: u16,
    shape: Shaping,
    target: TargetUinput,
    speed: f64,
    active: bool,
    carry: FractionalCarry,
    next_tick_us: u64,
}

impl AbsToRelHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mapping_idx: usize,
        src_code: u16,
        src_origin: Option<u64>,
        in_range: (i32, i32),
        out_code: u16,
        shape: Shaping,
        target: TargetUinput,
    ) -> Self {
        AbsToRelHandler {
            mapping_idx,
            src: (src_code, src_origin),
            in_min: in_range.0,
            in_max: in_range.1,
            out_code,
            shape,
            target,
            speed: 0.0,
            active: false,
            carry: FractionalCarry::new(),
            next_tick_us: 0,
        }
    }

    fn period_us(&self) -> u64 {
        1_000_000 / u64::from(self.shape.rel_rate.max(1))
    }

    fn handle(&mut self, tagged: &TaggedEvent, cx: &mut EngineCx) -> Verdict {
        let x = axis::normalize_abs(tagged.event.value, self.in_min, self.in_max);
        let v = axis::shape(x, &self.shape);
        if v == 0.0 {
            self.active = false;
            self.carry.reset();
        } else {
            if !self.active {
                self.active = true;
                self.next_tick_us = tagged.time_us;
            }
            self.speed = v;
            self.tick(tagged.time_us, cx);
        }
        Verdict::Consumed
    }

    fn tick(&mut self, now_us: u64, cx: &mut EngineCx) {
        if !self.active {
            return;
        }
        let period = self.period_us();
        while self.next_tick_us <= now_us {
            let whole = self.carry.take(self.speed);
            if whole != 0 {
                let event = Event::new(EV_REL, self.out_code, whole);
                if cx.ctx.sink.emit(Route::Target(self.target), event).is_ok() {
                    Counters::bump(&cx.ctx.counters.mapped);
                }
            }
            self.next_tick_us += period;
        }
    }

    fn deadline(&self) -> Option<u64> {
        self.active.then_some(self.next_tick_us)
    }

    fn stop(&mut self) {
        self.active = false;
        self.carry.reset();
    }
}

/// REL deltas accumulated into a virtual ABS position, saturating at the
/// axis boundaries and re-centering after `release_timeout` of silence.
pub struct RelToAbsHandler {
    pub mapping_idx: usize,
    src: (u16, Option<u64>),
    out_code: u16,
    out_min: i32,
    out_max: i32,
    shape: Shaping,
    target: TargetUinput,
    position: f64,
    active: bool,
    last_input_us: u64,
}

impl RelToAbsHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mapping_idx: usize,
        src_code: u16,
        src_origin: Option<u64>,
        out_code: u16,
        out_range: (i32, i32),
        shape: Shaping,
        target: TargetUinput,
    ) -> Self {
        RelToAbsHandler {
            mapping_idx,
            src: (src_code, src_origin),
            out_code,
            out_min: out_range.0,
            out_max: out_range.1,
            shape,
            target,
            position: 0.0,
            active: false,
            last_input_us: 0,
        }
    }

    fn handle(&mut self, tagged: &TaggedEvent, cx: &mut EngineCx) -> Verdict {
        let step = f64::from(tagged.event.value) / self.shape.rel_to_abs_input_cutoff.max(1e-9);
        self.position = (self.position + step).clamp(-1.0, 1.0);
        self.active = true;
        self.last_input_us = tagged.time_us;
        self.emit_position(cx);
        Verdict::Consumed
    }

    fn emit_position(&self, cx: &mut EngineCx) {
        let y = axis::shape(self.position, &self.shape);
        let out = axis::denormalize_abs(y, self.out_min, self.out_max);
        let event = Event::new(EV_ABS, self.out_code, out);
        if cx.ctx.sink.emit(Route::Target(self.target), event).is_ok() {
            Counters::bump(&cx.ctx.counters.mapped);
        }
    }

    fn tick(&mut self, now_us: u64, cx: &mut EngineCx) {
        if self.active
            && now_us.saturating_sub(self.last_input_us)
                >= self.shape.release_timeout_ms.saturating_mul(1000)
        {
            // Silence means the axis returns to center.
            self.position = 0.0;
            self.emit_position(cx);
            self.active = false;
        }
    }

    fn deadline(&self) -> Option<u64> {
        self.active
            .then(|| self.last_input_us + self.shape.release_timeout_ms.saturating_mul(1000))
    }

    fn stop(&mut self) {
        self.position = 0.0;
        self.active = false;
    }
}

/// One handler in the graph.
pub enum Handler {
    Trigger(TriggerHandler),
    AbsToAbs(AbsToAbsHandler),
    AbsToRel(AbsToRelHandler),
    RelToAbs(RelToAbsHandler),
}

impl Handler {
    /// The `(type, code, origin)` an axis handler listens on; trigger
    /// handlers route through the resolver instead.
    pub fn axis_input(&self) -> Option<(u16, u16, Option<u64>)> {
        match self {
            Handler::Trigger(_) => None,
            Handler::AbsToAbs(h) => Some((EV_ABS, h.src.0, h.src.1)),
            Handler::AbsToRel(h) => Some((EV_ABS, h.src.0, h.src.1)),
            Handler::RelToAbs(h) => Some((EV_REL, h.src.0, h.src.1)),
        }
    }

    pub fn handle_axis(&mut self, tagged: &TaggedEvent, cx: &mut EngineCx) -> Verdict {
        match self {
            Handler::Trigger(_) => Verdict::Passthrough,
            Handler::AbsToAbs(h) => h.handle(tagged, cx),
            Handler::AbsToRel(h) => h.handle(tagged, cx),
            Handler::RelToAbs(h) => h.handle(tagged, cx),
        }
    }

    pub fn tick(&mut self, now_us: u64, cx: &mut EngineCx) {
        match self {
            Handler::Trigger(_) | Handler::AbsToAbs(_) => {}
            Handler::AbsToRel(h) => h.tick(now_us, cx),
            Handler::RelToAbs(h) => h.tick(now_us, cx),
        }
    }

    pub fn deadline(&self) -> Option<u64> {
        match self {
            Handler::Trigger(_) | Handler::AbsToAbs(_) => None,
            Handler::AbsToRel(h) => h.deadline(),
            Handler::RelToAbs(h) => h.deadline(),
        }
    }

    /// Stop-time quiescing for stateful axis handlers.
    pub fn stop(&mut self) {
        match self {
            Handler::Trigger(_) | Handler::AbsToAbs(_) => {}
            Handler::AbsToRel(h) => h.stop(),
            Handler::RelToAbs(h) => h.stop(),
        }
    }
}

//! A single macro task: an explicit AST cursor (frame stack), the held
//! flag, and the key-up edges the task still owes.
//!
//! Tasks never block. `poll` advances the cursor until the task completes
//! or reaches a suspension point (a timed sleep, a wait-for-release, or a
//! rate-limited emitter tick) and reports when it next wants to run.
//! Timestamps come in from the caller, so tests can drive a task through
//! synthetic time.

use std::sync::Arc;

use crate::error::Error;
use crate::event::{Event, EV_REL};
use crate::keys::SymbolTable;
use crate::macros::ast::{Node, NodeId, Program, Value};
use crate::preset::TargetUinput;
use crate::uinputs::{Led, LedProbe, OutputSink, Route};
use crate::vars::{VarStore, VarValue};

/// Ceiling for a single `wait`. Anything longer is treated as a hung macro.
pub const MAX_WAIT_MS: i64 = 60_000;

/// Ceiling on cursor steps per poll. A macro that loops without ever
/// suspending (e.g. `hold(set(x,1))`) hits this and is terminated.
const STEP_BUDGET: usize = 10_000;

const DEFAULT_MOD_TAP_TERM_MS: i64 = 200;

/// What a task needs from its surroundings while stepping.
pub struct TaskCtx<'a> {
    pub sink: &'a dyn OutputSink,
    pub vars: &'a VarStore,
    pub leds: &'a dyn LedProbe,
    pub symbols: &'a SymbolTable,
}

/// Where a task stands after a poll.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Poll {
    /// Re-poll at (or after) the given time.
    Sleeping(u64),
    /// Blocked on the trigger's release; no deadline of its own.
    Waiting,
    /// Blocked on release or another key, but with a timer running.
    WaitingUntil(u64),
    Done,
}

impl Poll {
    pub fn deadline(&self) -> Option<u64> {
        match self {
            Poll::Sleeping(t) | Poll::WaitingUntil(t) => Some(*t),
            Poll::Waiting | Poll::Done => None,
        }
    }
}

/// Rate-limited REL emitter state for `mouse`, `mouse_xy` and `wheel`.
#[derive(Clone, Debug)]
struct Emitter {
    codes: Vec<u16>,
    /// Units added per tick per axis, before acceleration.
    per_tick: Vec<f64>,
    carries: Vec<f64>,
    /// Linear ramp: full speed after `1/accel` seconds.
    accel: Option<f64>,
    period_us: u64,
    started_us: u64,
    next_tick_us: u64,
}

impl Emitter {
    fn new(codes: Vec<u16>, per_tick: Vec<f64>, accel: Option<f64>, rate: u32, now: u64) -> Self {
        let rate = rate.max(1);
        let n = codes.len();
        Emitter {
            codes,
            per_tick,
            carries: vec![0.0; n],
            accel,
            period_us: 1_000_000 / u64::from(rate),
            started_us: now,
            next_tick_us: now,
        }
    }

    /// Emits all ticks due by `now`, keeping the fractional carry.
    fn run_due(&mut self, now: u64, target: TargetUinput, cx: &TaskCtx) {
        while self.next_tick_us <= now {
            let tick_time = self.next_tick_us;
            let factor = match self.accel {
                Some(a) if a > 0.0 => {
                    let elapsed_s = (tick_time.saturating_sub(self.started_us)) as f64 / 1e6;
                    (elapsed_s * a).min(1.0)
                }
                _ => 1.0,
            };
            for i in 0..self.codes.len() {
                self.carries[i] += self.per_tick[i] * factor;
                let whole = self.carries[i].trunc();
                if whole != 0.0 {
                    self.carries[i] -= whole;
                    let _ = cx
                        .sink
                        .emit(Route::Target(target), Event::new(EV_REL, self.codes[i], whole as i32));
                }
            }
            self.next_tick_us += self.period_us;
        }
    }
}

#[derive(Clone, Debug)]
enum Frame {
    /// Sequential execution of a node list.
    Seq { nodes: Vec<NodeId>, idx: usize },
    /// A completed-on-schedule timed suspension.
    Sleep { until_us: u64 },
    /// `key()`: press, half gap, release, half gap.
    KeyTap {
        ty: u16,
        code: u16,
        stage: u8,
        wake_us: u64,
    },
    RepeatLoop { body: Vec<NodeId>, remaining: i64 },
    HoldLoop { body: Vec<NodeId> },
    /// Emits the modifier's key-up once the body beneath it finishes.
    ModifyTail { ty: u16, code: u16 },
    HoldKeysWait { syms: Vec<(u16, u16)> },
    ModTapWait {
        default: (u16, u16),
        modifier: (u16, u16),
        deadline_us: u64,
        mod_held: bool,
    },
    TickEmit(Emitter),
    IfTapWait {
        then: Vec<NodeId>,
        otherwise: Vec<NodeId>,
        deadline_us: u64,
    },
    IfSingleWait {
        then: Vec<NodeId>,
        otherwise: Vec<NodeId>,
        deadline_us: Option<u64>,
    },
}

/// What the frame inspection decided; executed after the borrow ends.
enum Act {
    Exec(NodeId),
    Pop,
    PushSeq(Vec<NodeId>),
    PopPushSeq(Vec<NodeId>),
    PopTap { ty: u16, code: u16 },
    Suspend(Poll),
}

pub struct MacroTask {
    program: Arc<Program>,
    frames: Vec<Frame>,
    /// Key-down edges this task owes a key-up for, in press order.
    cleanup: Vec<(u16, u16)>,
    held: bool,
    other_key_seen: bool,
    released_at_us: Option<u64>,
    /// The combination's key configs; presses of these never count as
    /// "another key" for `if_single`/`mod_tap`.
    trigger_codes: Vec<(u16, u16)>,
    target: TargetUinput,
    key_sleep_ms: u64,
    rel_rate: u32,
    mapping_name: String,
}

impl MacroTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        program: Arc<Program>,
        target: TargetUinput,
        key_sleep_ms: u64,
        rel_rate: u32,
        trigger_codes: Vec<(u16, u16)>,
        mapping_name: String,
    ) -> Self {
        let root = program.root.clone();
        MacroTask {
            program,
            frames: vec![Frame::Seq {
                nodes: root,
                idx: 0,
            }],
            cleanup: Vec::new(),
            held: true,
            other_key_seen: false,
            released_at_us: None,
            trigger_codes,
            target,
            key_sleep_ms,
            rel_rate,
            mapping_name,
        }
    }

    pub fn mapping_name(&self) -> &str {
        &self.mapping_name
    }

    /// The trigger was released. Suspension points observe this on the
    /// next poll; sleeps still run to completion first.
    pub fn release(&mut self, now_us: u64) {
        self.held = false;
        self.released_at_us.get_or_insert(now_us);
    }

    /// A key outside the trigger combination was pressed somewhere in the
    /// injection.
    pub fn note_key_press(&mut self, ty: u16, code: u16) {
        if !self.trigger_codes.contains(&(ty, code)) {
            self.other_key_seen = true;
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Emits any owed key-up edges. Used on error aborts; normal completion
    /// does the same internally.
    pub fn abort(&mut self, cx: &TaskCtx) {
        self.emit_cleanup(cx);
        self.frames.clear();
    }

    fn emit_cleanup(&mut self, cx: &TaskCtx) {
        while let Some((ty, code)) = self.cleanup.pop() {
            let _ = cx.sink.emit(Route::Target(self.target), Event::new(ty, code, 0));
        }
    }

    fn runtime_err(&self, message: impl Into<String>) -> Error {
        Error::MacroRuntime {
            mapping: self.mapping_name.clone(),
            message: message.into(),
        }
    }

    /// Advances the cursor until done or suspended.
    pub fn poll(&mut self, now_us: u64, cx: &TaskCtx) -> Result<Poll, Error> {
        let mut steps = 0usize;
        loop {
            steps += 1;
            if steps > STEP_BUDGET {
                return Err(self.runtime_err("macro loops without suspending"));
            }
            if self.frames.is_empty() {
                self.emit_cleanup(cx);
                return Ok(Poll::Done);
            }
            let act = self.inspect_top(now_us, cx);
            match act {
                Act::Exec(id) => self.exec_node(id, now_us, cx)?,
                Act::Pop => {
                    self.frames.pop();
                }
                Act::PushSeq(nodes) => {
                    self.frames.push(Frame::Seq { nodes, idx: 0 });
                }
                Act::PopPushSeq(nodes) => {
                    self.frames.pop();
                    self.frames.push(Frame::Seq { nodes, idx: 0 });
                }
                Act::PopTap { ty, code } => {
                    self.frames.pop();
                    self.frames.push(Frame::KeyTap {
                        ty,
                        code,
                        stage: 0,
                        wake_us: 0,
                    });
                }
                Act::Suspend(poll) => return Ok(poll),
            }
        }
    }

    /// Looks at the top frame and decides the next action. Emission during
    /// inspection only touches `cx` and copied fields, so frame borrows
    /// stay local.
    fn inspect_top(&mut self, now: u64, cx: &TaskCtx) -> Act {
        let held = self.held;
        let other_key_seen = self.other_key_seen;
        let released_at = self.released_at_us;
        let target = self.target;
        let half_gap_us = self.key_sleep_ms * 1000 / 2;

        let frame = self.frames.last_mut().expect("non-empty frame stack");
        match frame {
            Frame::Seq { nodes, idx } => {
                if *idx < nodes.len() {
                    let id = nodes[*idx];
                    *idx += 1;
                    Act::Exec(id)
                } else {
                    Act::Pop
                }
            }
            Frame::Sleep { until_us } => {
                if now >= *until_us {
                    Act::Pop
                } else {
                    Act::Suspend(Poll::Sleeping(*until_us))
                }
            }
            Frame::KeyTap {
                ty,
                code,
                stage,
                wake_us,
            } => match *stage {
                0 => {
                    let _ = cx
                        .sink
                        .emit(Route::Target(target), Event::new(*ty, *code, 1));
                    self.cleanup.push((*ty, *code));
                    *stage = 1;
                    *wake_us = now + half_gap_us;
                    if half_gap_us == 0 {
                        Act::Suspend(Poll::Sleeping(now))
                    } else {
                        Act::Suspend(Poll::Sleeping(*wake_us))
                    }
                }
                1 => {
                    if now < *wake_us {
                        return Act::Suspend(Poll::Sleeping(*wake_us));
                    }
                    let _ = cx
                        .sink
                        .emit(Route::Target(target), Event::new(*ty, *code, 0));
                    if let Some(pos) = self.cleanup.iter().rposition(|&c| c == (*ty, *code)) {
                        self.cleanup.remove(pos);
                    }
                    *stage = 2;
                    *wake_us = now + half_gap_us;
                    Act::Suspend(Poll::Sleeping(*wake_us))
                }
                _ => {
                    if now < *wake_us {
                        Act::Suspend(Poll::Sleeping(*wake_us))
                    } else {
                        Act::Pop
                    }
                }
            },
            Frame::RepeatLoop { body, remaining } => {
                if *remaining > 0 {
                    *remaining -= 1;
                    Act::PushSeq(body.clone())
                } else {
                    Act::Pop
                }
            }
            Frame::HoldLoop { body } => {
                if held {
                    Act::PushSeq(body.clone())
                } else {
                    Act::Pop
                }
            }
            Frame::ModifyTail { ty, code } => {
                let _ = cx
                    .sink
                    .emit(Route::Target(target), Event::new(*ty, *code, 0));
                if let Some(pos) = self.cleanup.iter().rposition(|&c| c == (*ty, *code)) {
                    self.cleanup.remove(pos);
                }
                Act::Pop
            }
            Frame::HoldKeysWait { syms } => {
                if held {
                    Act::Suspend(Poll::Waiting)
                } else {
                    for &(ty, code) in syms.iter().rev() {
                        let _ = cx
                            .sink
                            .emit(Route::Target(target), Event::new(ty, code, 0));
                        if let Some(pos) = self.cleanup.iter().rposition(|&c| c == (ty, code)) {
                            self.cleanup.remove(pos);
                        }
                    }
                    Act::Pop
                }
            }
            Frame::ModTapWait {
                default,
                modifier,
                deadline_us,
                mod_held,
            } => {
                if *mod_held {
                    if held {
                        Act::Suspend(Poll::Waiting)
                    } else {
                        let _ = cx
                            .sink
                            .emit(Route::Target(target), Event::new(modifier.0, modifier.1, 0));
                        if let Some(pos) =
                            self.cleanup.iter().rposition(|&c| c == *modifier)
                        {
                            self.cleanup.remove(pos);
                        }
                        Act::Pop
                    }
                } else if released_at.map_or(false, |t| t <= *deadline_us) && !other_key_seen {
                    // Quick tap: play the default symbol.
                    let (ty, code) = *default;
                    Act::PopTap { ty, code }
                } else if other_key_seen || now >= *deadline_us {
                    // Held past the term (or interleaved with another key):
                    // act as the modifier until release.
                    let _ = cx
                        .sink
                        .emit(Route::Target(target), Event::new(modifier.0, modifier.1, 1));
                    self.cleanup.push(*modifier);
                    *mod_held = true;
                    if held {
                        Act::Suspend(Poll::Waiting)
                    } else {
                        // Released after the decision point: close immediately.
                        let _ = cx
                            .sink
                            .emit(Route::Target(target), Event::new(modifier.0, modifier.1, 0));
                        if let Some(pos) =
                            self.cleanup.iter().rposition(|&c| c == *modifier)
                        {
                            self.cleanup.remove(pos);
                        }
                        Act::Pop
                    }
                } else {
                    Act::Suspend(Poll::WaitingUntil(*deadline_us))
                }
            }
            Frame::TickEmit(em) => {
                if !held {
                    Act::Pop
                } else {
                    em.run_due(now, target, cx);
                    Act::Suspend(Poll::Sleeping(em.next_tick_us))
                }
            }
            Frame::IfTapWait {
                then,
                otherwise,
                deadline_us,
            } => {
                if released_at.map_or(false, |t| t <= *deadline_us) {
                    Act::PopPushSeq(then.clone())
                } else if now >= *deadline_us {
                    Act::PopPushSeq(otherwise.clone())
                } else {
                    Act::Suspend(Poll::WaitingUntil(*deadline_us))
                }
            }
            Frame::IfSingleWait {
                then,
                otherwise,
                deadline_us,
            } => {
                if other_key_seen {
                    Act::PopPushSeq(otherwise.clone())
                } else if released_at.is_some() {
                    Act::PopPushSeq(then.clone())
                } else if let Some(deadline) = *deadline_us {
                    if now >= deadline {
                        Act::PopPushSeq(otherwise.clone())
                    } else {
                        Act::Suspend(Poll::WaitingUntil(deadline))
                    }
                } else {
                    Act::Suspend(Poll::Waiting)
                }
            }
        }
    }

    /// Executes one node: immediate effects happen here, anything that
    /// suspends pushes a frame.
    fn exec_node(&mut self, id: NodeId, now: u64, cx: &TaskCtx) -> Result<(), Error> {
        let program = Arc::clone(&self.program);
        match program.node(id) {
            Node::Key { sym } => {
                self.frames.push(Frame::KeyTap {
                    ty: sym.ty,
                    code: sym.code,
                    stage: 0,
                    wake_us: 0,
                });
            }
            Node::KeyDown { sym } => {
                let _ = cx
                    .sink
                    .emit(Route::Target(self.target), Event::new(sym.ty, sym.code, 1));
                self.cleanup.push((sym.ty, sym.code));
            }
            Node::KeyUp { sym } => {
                let _ = cx
                    .sink
                    .emit(Route::Target(self.target), Event::new(sym.ty, sym.code, 0));
                if let Some(pos) = self
                    .cleanup
                    .iter()
                    .rposition(|&c| c == (sym.ty, sym.code))
                {
                    self.cleanup.remove(pos);
                }
            }
            Node::Wait { min, max } => {
                let min_ms = self.resolve_int(min, cx)?;
                let ms = match max {
                    Some(max) => {
                        let max_ms = self.resolve_int(max, cx)?;
                        if max_ms > min_ms {
                            fastrand::i64(min_ms..=max_ms)
                        } else {
                            min_ms
                        }
                    }
                    None => min_ms,
                };
                if ms > MAX_WAIT_MS {
                    return Err(self.runtime_err(format!("wait of {ms} ms exceeds the ceiling")));
                }
                if ms > 0 {
                    self.frames.push(Frame::Sleep {
                        until_us: now + (ms as u64) * 1000,
                    });
                }
            }
            Node::Repeat { count, body } => {
                let n = self.resolve_int(count, cx)?;
                if n > 0 {
                    self.frames.push(Frame::RepeatLoop {
                        body: body.clone(),
                        remaining: n,
                    });
                }
            }
            Node::Modify { modifier, body } => {
                let _ = cx.sink.emit(
                    Route::Target(self.target),
                    Event::new(modifier.ty, modifier.code, 1),
                );
                self.cleanup.push((modifier.ty, modifier.code));
                self.frames.push(Frame::ModifyTail {
                    ty: modifier.ty,
                    code: modifier.code,
                });
                self.frames.push(Frame::Seq {
                    nodes: body.clone(),
                    idx: 0,
                });
            }
            Node::Hold { body } => {
                self.frames.push(Frame::HoldLoop { body: body.clone() });
            }
            Node::HoldKeys { syms } => {
                let mut pressed = Vec::with_capacity(syms.len());
                for sym in syms {
                    let _ = cx
                        .sink
                        .emit(Route::Target(self.target), Event::new(sym.ty, sym.code, 1));
                    self.cleanup.push((sym.ty, sym.code));
                    pressed.push((sym.ty, sym.code));
                }
                self.frames.push(Frame::HoldKeysWait { syms: pressed });
            }
            Node::ModTap {
                default,
                modifier,
                term_ms,
            } => {
                let term = match term_ms {
                    Some(t) => self.resolve_int(t, cx)?,
                    None => DEFAULT_MOD_TAP_TERM_MS,
                };
                self.frames.push(Frame::ModTapWait {
                    default: (default.ty, default.code),
                    modifier: (modifier.ty, modifier.code),
                    deadline_us: now + term.max(0) as u64 * 1000,
                    mod_held: false,
                });
            }
            Node::Mouse { dir, speed, accel } => {
                let speed = self.resolve_int(speed, cx)?;
                let accel = self.resolve_accel(accel.as_ref(), cx)?;
                let (code, sign) = dir.rel_axis();
                self.frames.push(Frame::TickEmit(Emitter::new(
                    vec![code],
                    vec![(speed * sign) as f64],
                    accel,
                    self.rel_rate,
                    now,
                )));
            }
            Node::MouseXy { x, y, accel } => {
                let x = self.resolve_int(x, cx)?;
                let y = self.resolve_int(y, cx)?;
                let accel = self.resolve_accel(accel.as_ref(), cx)?;
                self.frames.push(Frame::TickEmit(Emitter::new(
                    vec![crate::event::REL_X, crate::event::REL_Y],
                    vec![x as f64, y as f64],
                    accel,
                    self.rel_rate,
                    now,
                )));
            }
            Node::Wheel { dir, speed } => {
                let speed = self.resolve_int(speed, cx)?;
                let (code, sign) = dir.wheel_axis();
                // Wheel speed is notches per second; the carry turns it
                // into whole notches at the tick rate.
                let per_tick = (speed * sign) as f64 / f64::from(self.rel_rate.max(1));
                self.frames.push(Frame::TickEmit(Emitter::new(
                    vec![code],
                    vec![per_tick],
                    None,
                    self.rel_rate,
                    now,
                )));
            }
            Node::Event { ty, code, value } => {
                let ty = self.resolve_event_type(ty, cx)?;
                let code = self.resolve_event_code(ty, code, cx)?;
                let value = self.resolve_int(value, cx)?;
                let _ = cx.sink.emit(
                    Route::Target(self.target),
                    Event::new(ty, code, value as i32),
                );
            }
            Node::Set { name, value } => {
                let value = self.resolve_var_value(value, cx)?;
                cx.vars.set(name, value);
            }
            Node::Add { name, delta } => {
                let delta = self.resolve_int(delta, cx)?;
                cx.vars.add(name, delta);
            }
            Node::IfEq {
                a,
                b,
                then,
                otherwise,
            } => {
                let a = self.resolve_var_value_opt(a, cx);
                let b = self.resolve_var_value_opt(b, cx);
                let branch = if values_equal(&a, &b) { then } else { otherwise };
                if !branch.is_empty() {
                    self.frames.push(Frame::Seq {
                        nodes: branch.clone(),
                        idx: 0,
                    });
                }
            }
            Node::IfTap {
                then,
                otherwise,
                timeout_ms,
            } => {
                let timeout = self.resolve_int(timeout_ms, cx)?.max(0) as u64;
                self.frames.push(Frame::IfTapWait {
                    then: then.clone(),
                    otherwise: otherwise.clone(),
                    deadline_us: now + timeout * 1000,
                });
            }
            Node::IfSingle {
                then,
                otherwise,
                timeout_ms,
            } => {
                let deadline = match timeout_ms {
                    Some(t) => Some(now + self.resolve_int(t, cx)?.max(0) as u64 * 1000),
                    None => None,
                };
                self.frames.push(Frame::IfSingleWait {
                    then: then.clone(),
                    otherwise: otherwise.clone(),
                    deadline_us: deadline,
                });
            }
            Node::IfCapslock { then, otherwise } => {
                let branch = if cx.leds.led_on(Led::CapsLock) {
                    then
                } else {
                    otherwise
                };
                if !branch.is_empty() {
                    self.frames.push(Frame::Seq {
                        nodes: branch.clone(),
                        idx: 0,
                    });
                }
            }
            Node::IfNumlock { then, otherwise } => {
                let branch = if cx.leds.led_on(Led::NumLock) {
                    then
                } else {
                    otherwise
                };
                if !branch.is_empty() {
                    self.frames.push(Frame::Seq {
                        nodes: branch.clone(),
                        idx: 0,
                    });
                }
            }
        }
        Ok(())
    }

    // --- Value resolution ($name is late-bound against the store) ---

    fn resolve_var_value(&self, v: &Value, cx: &TaskCtx) -> Result<VarValue, Error> {
        match v {
            Value::Int(i) => Ok(VarValue::Int(*i)),
            Value::Float(f) => Ok(VarValue::Int(*f as i64)),
            Value::Text(s) => Ok(VarValue::Text(s.clone())),
            Value::Var(name) => cx
                .vars
                .get(name)
                .ok_or_else(|| self.runtime_err(format!("variable `${name}` is not set"))),
        }
    }

    /// Like [`resolve_var_value`], but a missing variable resolves to
    /// `None` so `if_eq` can compare against "unset".
    fn resolve_var_value_opt(&self, v: &Value, cx: &TaskCtx) -> Option<VarValue> {
        match v {
            Value::Int(i) => Some(VarValue::Int(*i)),
            Value::Float(f) => Some(VarValue::Int(*f as i64)),
            Value::Text(s) => Some(VarValue::Text(s.clone())),
            Value::Var(name) => cx.vars.get(name),
        }
    }

    fn resolve_int(&self, v: &Value, cx: &TaskCtx) -> Result<i64, Error> {
        match self.resolve_var_value(v, cx)? {
            VarValue::Int(i) => Ok(i),
            VarValue::Text(s) => s
                .parse()
                .map_err(|_| self.runtime_err(format!("`{s}` is not an integer"))),
        }
    }

    fn resolve_accel(&self, v: Option<&Value>, cx: &TaskCtx) -> Result<Option<f64>, Error> {
        match v {
            None => Ok(None),
            Some(Value::Float(f)) => Ok(Some(*f)),
            Some(other) => Ok(Some(self.resolve_int(other, cx)? as f64)),
        }
    }

    fn resolve_event_type(&self, v: &Value, cx: &TaskCtx) -> Result<u16, Error> {
        match v {
            Value::Text(name) => crate::keys::type_from_name(name)
                .ok_or_else(|| self.runtime_err(format!("unknown event type `{name}`"))),
            other => {
                let n = self.resolve_int(other, cx)?;
                u16::try_from(n).map_err(|_| self.runtime_err(format!("bad event type {n}")))
            }
        }
    }

    fn resolve_event_code(&self, ty: u16, v: &Value, cx: &TaskCtx) -> Result<u16, Error> {
        match v {
            Value::Text(name) => match cx.symbols.lookup(name) {
                Some((sym_ty, code)) if sym_ty == ty => Ok(code),
                Some((_, code)) => Ok(code),
                None => Err(self.runtime_err(format!("unknown event code `{name}`"))),
            },
            other => {
                let n = self.resolve_int(other, cx)?;
                u16::try_from(n).map_err(|_| self.runtime_err(format!("bad event code {n}")))
            }
        }
    }
}

/// `if_eq` comparison: missing variables only equal other missing values;
/// ints and strings compare across representations (`1` equals `"1"`).
fn values_equal(a: &Option<VarValue>, b: &Option<VarValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => match (a, b) {
            (VarValue::Int(x), VarValue::Int(y)) => x == y,
            (VarValue::Text(x), VarValue::Text(y)) => x == y,
            (VarValue::Int(x), VarValue::Text(y)) | (VarValue::Text(y), VarValue::Int(x)) => {
                y.parse::<i64>().map_or(false, |p| p == *x)
            }
        },
        _ => false,
    }
}

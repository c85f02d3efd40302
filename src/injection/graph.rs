//! The handler graph: routing table, verdict collection, and the forward
//! path for events no mapping consumed.

use std::collections::{HashMap, HashSet};

use crate::error::Error;
use crate::event::{OriginHash, TaggedEvent, EV_KEY, EV_MSC, EV_REL, EV_SYN};
use crate::injection::context::{Counters, EngineCx};
use crate::injection::handlers::{
    AbsToAbsHandler, AbsToRelHandler, Handler, RelToAbsHandler, TriggerHandler, TriggerKind,
    TriggerOutput,
};
use crate::injection::resolver::{Action, ComboEntry, Resolver, Verdict};
use crate::preset::validate::{CompiledMapping, CompiledOutput, CompiledPreset};
use crate::preset::{ConfigKind, InputConfig};
use crate::uinputs::{self, Route};

/// Source-axis ranges harvested from the grabbed sub-devices at start.
#[derive(Debug, Default, Clone)]
pub struct AbsRanges {
    map: HashMap<(OriginHash, u16), (i32, i32)>,
}

const DEFAULT_ABS_RANGE: (i32, i32) = (-32768, 32767);

impl AbsRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, origin: OriginHash, code: u16, range: (i32, i32)) {
        self.map.insert((origin, code), range);
    }

    /// Range for a config: exact origin match first, then any sub-device
    /// with the axis, then a sane default.
    pub fn lookup(&self, config: &InputConfig) -> (i32, i32) {
        if let Some(origin) = config.origin_hash {
            if let Some(&range) = self.map.get(&(origin, config.code)) {
                return range;
            }
        }
        self.map
            .iter()
            .find(|((_, code), _)| *code == config.code)
            .map(|(_, &range)| range)
            .unwrap_or(DEFAULT_ABS_RANGE)
    }
}

pub struct HandlerGraph {
    handlers: Vec<Handler>,
    resolver: Resolver,
    /// `(type, code)` -> axis handler indices.
    axis_routes: HashMap<(u16, u16), Vec<usize>>,
    /// Entry index -> trigger handler index.
    entry_handlers: Vec<usize>,
    /// Key codes currently pressed on the forwarded device.
    forward_held: HashSet<u16>,
    /// Keys synthetically released on the forwarded device; their next
    /// real release is swallowed.
    suppress_forward: HashSet<u16>,
}

impl HandlerGraph {
    /// Materializes handlers and the resolver table from a compiled
    /// preset.
    pub fn build(preset: &CompiledPreset, ranges: &AbsRanges) -> Result<Self, Error> {
        let mut handlers = Vec::new();
        let mut entries: Vec<ComboEntry> = Vec::new();
        let mut entry_handlers = Vec::new();
        let mut axis_routes: HashMap<(u16, u16), Vec<usize>> = HashMap::new();

        for mapping in &preset.mappings {
            match &mapping.output {
                CompiledOutput::Axis { ty, code } => {
                    let handler = build_axis_handler(mapping, *ty, *code, ranges)?;
                    let idx = handlers.len();
                    if let Some((ty, code, _)) = handler.axis_input() {
                        axis_routes.entry((ty, code)).or_default().push(idx);
                    }
                    handlers.push(handler);
                }
                CompiledOutput::Key { ty, code } => {
                    let kind = trigger_kind(&mapping.combination);
                    push_trigger(
                        &mut handlers,
                        &mut entries,
                        &mut entry_handlers,
                        mapping,
                        kind,
                        TriggerOutput::Key {
                            ty: *ty,
                            code: *code,
                        },
                        ranges,
                    );
                }
                CompiledOutput::Disabled => {
                    let kind = trigger_kind(&mapping.combination);
                    push_trigger(
                        &mut handlers,
                        &mut entries,
                        &mut entry_handlers,
                        mapping,
                        kind,
                        TriggerOutput::Disabled,
                        ranges,
                    );
                }
                CompiledOutput::Macro(program) => {
                    push_trigger(
                        &mut handlers,
                        &mut entries,
                        &mut entry_handlers,
                        mapping,
                        TriggerKind::Macro,
                        TriggerOutput::Macro(std::sync::Arc::clone(program)),
                        ranges,
                    );
                }
            }
        }

        Ok(HandlerGraph {
            handlers,
            resolver: Resolver::new(entries),
            axis_routes,
            entry_handlers,
            forward_held: HashSet::new(),
            suppress_forward: HashSet::new(),
        })
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Entry point: one tagged event from the merge channel.
    pub fn handle_event(&mut self, tagged: TaggedEvent, cx: &mut EngineCx) {
        Counters::bump(&cx.ctx.counters.events_in);
        let ev = tagged.event;

        tracing::trace!(
            ty = crate::keys::type_name(ev.ty),
            code = crate::keys::code_name(ev.ty, ev.code),
            value = ev.value,
            origin = tagged.origin,
            "event in"
        );

        // SYN/MSC are batch markers: never routed to handlers. MSC is
        // forwarded; SYN reports are re-created by the sink per write.
        if ev.ty == EV_SYN {
            return;
        }
        if ev.ty == EV_MSC {
            self.forward(tagged, cx);
            return;
        }

        let mut consumed = false;
        let mut deferred = false;

        // Trigger combinations, arbitrated by the resolver.
        if self.resolver.listens_to(ev.ty, ev.code) {
            let (verdict, actions) = self.resolver.on_event(&tagged);
            self.execute(&actions, tagged.time_us, cx);
            match verdict {
                Verdict::Consumed => consumed = true,
                Verdict::Deferred => deferred = true,
                Verdict::Passthrough => {}
            }
        }

        // Fresh key presses wake macro decision points (`if_single`,
        // `mod_tap`); tasks exclude their own trigger themselves.
        if ev.ty == EV_KEY && ev.value == 1 {
            let ctx = cx.ctx;
            let task_cx = ctx.task_ctx();
            cx.runtime
                .note_key_press(ev.ty, ev.code, tagged.time_us, &task_cx);
        }

        // Axis handlers; an event can feed several mappings.
        if let Some(route) = self.axis_routes.get(&(ev.ty, ev.code)).cloned() {
            for idx in route {
                if let Some((_, _, Some(origin))) = self.handlers[idx].axis_input() {
                    if origin != tagged.origin {
                        continue;
                    }
                }
                match self.handlers[idx].handle_axis(&tagged, cx) {
                    Verdict::Consumed => consumed = true,
                    Verdict::Deferred => deferred = true,
                    Verdict::Passthrough => {}
                }
            }
        }

        if !consumed && !deferred {
            self.forward(tagged, cx);
        }
    }

    /// Timer service for rate emitters, release timeouts and threshold
    /// switches.
    pub fn tick(&mut self, now_us: u64, cx: &mut EngineCx) {
        let actions = self.resolver.tick(now_us);
        self.execute(&actions, now_us, cx);
        for handler in &mut self.handlers {
            handler.tick(now_us, cx);
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        let handler_deadline = self.handlers.iter().filter_map(Handler::deadline).min();
        match (self.resolver.next_deadline(), handler_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Stop-time drain: release every pressed output, quiesce axis state.
    pub fn drain(&mut self, now_us: u64, cx: &mut EngineCx) {
        let actions = self.resolver.release_all();
        self.execute(&actions, now_us, cx);
        for handler in &mut self.handlers {
            handler.stop();
        }
        self.forward_held.clear();
        self.suppress_forward.clear();
    }

    fn execute(&mut self, actions: &[Action], now_us: u64, cx: &mut EngineCx) {
        for action in actions {
            match action {
                Action::ForwardRelease { keys } => {
                    for &(ty, code) in keys {
                        // Only keys the host actually saw pressed need a
                        // synthetic release.
                        if self.forward_held.remove(&code) {
                            let release = crate::event::Event::new(ty, code, 0);
                            if cx.ctx.sink.emit(Route::Forward, release).is_ok() {
                                Counters::bump(&cx.ctx.counters.forwarded);
                            }
                            self.suppress_forward.insert(code);
                        }
                    }
                }
                Action::Press { entry } => {
                    if let Handler::Trigger(h) = &self.handlers[self.entry_handlers[*entry]] {
                        tracing::debug!(mapping = %h.name, "press");
                        h.press(now_us, cx);
                    }
                }
                Action::Repeat { entry } => {
                    if let Handler::Trigger(h) = &self.handlers[self.entry_handlers[*entry]] {
                        h.repeat(cx);
                    }
                }
                Action::Release { entry } => {
                    if let Handler::Trigger(h) = &self.handlers[self.entry_handlers[*entry]] {
                        tracing::debug!(mapping = %h.name, "release");
                        h.release(now_us, cx);
                    }
                }
            }
        }
    }

    /// The forwarder: unconsumed events go to the forwarded device in
    /// arrival order.
    fn forward(&mut self, tagged: TaggedEvent, cx: &mut EngineCx) {
        let ev = tagged.event;
        if ev.ty == EV_KEY {
            if ev.value >= 1 {
                self.suppress_forward.remove(&ev.code);
                self.forward_held.insert(ev.code);
            } else {
                // A key we synthetically released on trigger: swallow the
                // real release so the host never sees a double edge.
                if self.suppress_forward.remove(&ev.code) {
                    return;
                }
                self.forward_held.remove(&ev.code);
            }
        }
        if cx.ctx.sink.emit(Route::Forward, ev).is_ok() {
            Counters::bump(&cx.ctx.counters.forwarded);
        }
    }
}

fn trigger_kind(combination: &crate::preset::InputCombination) -> TriggerKind {
    let configs = combination.configs();
    if configs.len() == 1 {
        match configs[0].kind() {
            ConfigKind::Key => TriggerKind::Key,
            _ => TriggerKind::AnalogKey,
        }
    } else {
        TriggerKind::Combination
    }
}

#[allow(clippy::too_many_arguments)]
fn push_trigger(
    handlers: &mut Vec<Handler>,
    entries: &mut Vec<ComboEntry>,
    entry_handlers: &mut Vec<usize>,
    mapping: &CompiledMapping,
    kind: TriggerKind,
    output: TriggerOutput,
    ranges: &AbsRanges,
) {
    let handler_idx = handlers.len();
    let entry_idx = entries.len();
    let entry = ComboEntry::new(
        handler_idx,
        mapping.combination.configs(),
        mapping.release_combination_keys,
        mapping.shape.release_timeout_ms,
        |config| ranges.lookup(config),
    );
    let trigger_codes = entry.key_codes();
    entries.push(entry);
    entry_handlers.push(handler_idx);
    handlers.push(Handler::Trigger(TriggerHandler::new(
        mapping.index,
        entry_idx,
        kind,
        mapping.name.clone(),
        output,
        mapping.target,
        mapping.key_sleep_ms,
        mapping.shape.rel_rate,
        trigger_codes,
    )));
}

fn build_axis_handler(
    mapping: &CompiledMapping,
    out_ty: u16,
    out_code: u16,
    ranges: &AbsRanges,
) -> Result<Handler, Error> {
    let analog = mapping
        .combination
        .configs()
        .iter()
        .find(|c| c.kind() == ConfigKind::Analog)
        .ok_or_else(|| {
            Error::Fatal(format!(
                "axis mapping `{}` has no analog config",
                mapping.name
            ))
        })?;
    let out_range = uinputs::abs_range(mapping.target, out_code).unwrap_or(DEFAULT_ABS_RANGE);
    match (analog.ty, out_ty) {
        (crate::event::EV_ABS, crate::event::EV_ABS) => Ok(Handler::AbsToAbs(AbsToAbsHandler::new(
            mapping.index,
            analog.code,
            analog.origin_hash,
            ranges.lookup(analog),
            out_code,
            out_range,
            mapping.shape,
            mapping.target,
        ))),
        (crate::event::EV_ABS, EV_REL) => Ok(Handler::AbsToRel(AbsToRelHandler::new(
            mapping.index,
            analog.code,
            analog.origin_hash,
            ranges.lookup(analog),
            out_code,
            mapping.shape,
            mapping.target,
        ))),
        (EV_REL, crate::event::EV_ABS) => Ok(Handler::RelToAbs(RelToAbsHandler::new(
            mapping.index,
            analog.code,
            analog.origin_hash,
            out_code,
            out_range,
            mapping.shape,
            mapping.target,
        ))),
        // Validation rejects other pairings before the graph is built.
        (src, out) => Err(Error::Fatal(format!(
            "unsupported axis translation {} -> {} in `{}`",
            crate::keys::type_name(src),
            crate::keys::type_name(out),
            mapping.name
        ))),
    }
}

//! Combination arbitration.
//!
//! The injection owns one resolver holding every trigger-style combination
//! (key, threshold, or mixed) as an indexed table; handlers carry indices
//! into it. For each incoming event the resolver updates config
//! satisfaction and decides, longest combination first, which mappings
//! press, release, or re-activate, and which physical keys the forwarder
//! must synthetically release.

use crate::event::{OriginHash, TaggedEvent, EV_KEY};
use crate::injection::axis;
use crate::preset::InputConfig;

/// Hysteresis: an analog switch releases when the magnitude falls to 75 %
/// of its threshold.
pub const THRESHOLD_HYSTERESIS: f64 = 0.75;

/// What a handler reports back for an event it saw.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Do not forward.
    Consumed,
    /// Forward to the forwarded device.
    Passthrough,
    /// Held pending a later decision (e.g. an analog sample inside the
    /// hysteresis band). Not forwarded.
    Deferred,
}

/// How one config participates in matching.
#[derive(Clone, Debug)]
enum MatchKind {
    Key,
    /// Percentage threshold against the source axis range.
    AbsThreshold { threshold: i32, min: i32, max: i32 },
    /// Raw speed threshold; sign is direction.
    RelThreshold { threshold: i32 },
}

#[derive(Clone, Debug)]
struct Matcher {
    ty: u16,
    code: u16,
    origin: Option<OriginHash>,
    kind: MatchKind,
}

impl Matcher {
    fn matches(&self, ty: u16, code: u16, origin: OriginHash) -> bool {
        self.ty == ty && self.code == code && self.origin.map_or(true, |h| h == origin)
    }
}

/// One combination registered with the resolver.
pub struct ComboEntry {
    /// Index of the trigger handler that executes this combination's
    /// output.
    pub handler: usize,
    pub release_keys: bool,
    matchers: Vec<Matcher>,
    satisfied: Vec<bool>,
    /// Last motion per matcher, for REL threshold timeouts.
    last_motion_us: Vec<u64>,
    release_timeout_us: u64,
    /// Sorted (type, code) pairs for subset comparisons.
    code_set: Vec<(u16, u16)>,
    pub triggered: bool,
}

impl ComboEntry {
    /// Builds an entry from a combination's configs. `abs_range` resolves
    /// the source axis range for percentage thresholds.
    pub fn new(
        handler: usize,
        configs: &[InputConfig],
        release_keys: bool,
        release_timeout_ms: u64,
        abs_range: impl Fn(&InputConfig) -> (i32, i32),
    ) -> Self {
        let matchers: Vec<Matcher> = configs
            .iter()
            .map(|config| {
                let kind = match config.kind() {
                    crate::preset::ConfigKind::Key => MatchKind::Key,
                    crate::preset::ConfigKind::Analog => {
                        // Analog configs do not belong in trigger entries;
                        // treated as an always-on key so they never block.
                        MatchKind::Key
                    }
                    crate::preset::ConfigKind::Threshold => {
                        let threshold = config.analog_threshold.unwrap_or(0);
                        if config.ty == crate::event::EV_ABS {
                            let (min, max) = abs_range(config);
                            MatchKind::AbsThreshold { threshold, min, max }
                        } else {
                            MatchKind::RelThreshold { threshold }
                        }
                    }
                };
                Matcher {
                    ty: config.ty,
                    code: config.code,
                    origin: config.origin_hash,
                    kind,
                }
            })
            .collect();
        let mut code_set: Vec<(u16, u16)> = matchers.iter().map(|m| (m.ty, m.code)).collect();
        code_set.sort_unstable();
        let len = matchers.len();
        ComboEntry {
            handler,
            release_keys,
            matchers,
            satisfied: vec![false; len],
            last_motion_us: vec![0; len],
            release_timeout_us: release_timeout_ms.saturating_mul(1000),
            code_set,
            triggered: false,
        }
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    fn complete(&self) -> bool {
        self.satisfied.iter().all(|&s| s)
    }

    /// The key configs to synthetically release on trigger, minus the
    /// trigger config itself.
    fn forward_release_keys(&self, trigger: Option<usize>) -> Vec<(u16, u16)> {
        self.matchers
            .iter()
            .enumerate()
            .filter(|(i, m)| {
                matches!(m.kind, MatchKind::Key) && m.ty == EV_KEY && Some(*i) != trigger
            })
            .map(|(_, m)| (m.ty, m.code))
            .collect()
    }

    /// All key codes of the combination, used as a macro task's trigger
    /// set.
    pub fn key_codes(&self) -> Vec<(u16, u16)> {
        self.matchers
            .iter()
            .filter(|m| m.ty == EV_KEY)
            .map(|m| (m.ty, m.code))
            .collect()
    }

    fn is_proper_subset_of(&self, other: &ComboEntry) -> bool {
        self.code_set.len() < other.code_set.len()
            && self.code_set.iter().all(|c| other.code_set.contains(c))
    }
}

/// What the handler graph must do after an event or tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Emit synthetic key releases on the forwarded device. Ordered before
    /// the press that caused them.
    ForwardRelease { keys: Vec<(u16, u16)> },
    Press { entry: usize },
    /// Key repeat of a triggered combination; mirror the hold.
    Repeat { entry: usize },
    Release { entry: usize },
}

pub struct Resolver {
    entries: Vec<ComboEntry>,
    /// Entry indices, longest combination first.
    order: Vec<usize>,
    /// Key codes whose press was consumed as a trigger; their release is
    /// consumed too.
    consumed_keys: Vec<(u16, u16)>,
}

impl Resolver {
    pub fn new(entries: Vec<ComboEntry>) -> Self {
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(entries[i].len()));
        Resolver {
            entries,
            order,
            consumed_keys: Vec::new(),
        }
    }

    pub fn entry(&self, idx: usize) -> &ComboEntry {
        &self.entries[idx]
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether any entry listens on `(ty, code)`; used to build the
    /// routing table.
    pub fn listens_to(&self, ty: u16, code: u16) -> bool {
        self.entries
            .iter()
            .any(|e| e.matchers.iter().any(|m| m.ty == ty && m.code == code))
    }

    /// Feeds one event through every combination and arbitrates.
    pub fn on_event(&mut self, tagged: &TaggedEvent) -> (Verdict, Vec<Action>) {
        let ev = tagged.event;
        let mut actions = Vec::new();
        let mut matched_any = false;
        let mut analog_match = false;
        let mut transitioned = false;
        // (entry, trigger matcher) pairs that completed on this event.
        let mut completions: Vec<(usize, usize)> = Vec::new();
        let mut released_any = false;

        for idx in 0..self.entries.len() {
            let entry = &mut self.entries[idx];
            for m in 0..entry.matchers.len() {
                if !entry.matchers[m].matches(ev.ty, ev.code, tagged.origin) {
                    continue;
                }
                matched_any = true;
                let was = entry.satisfied[m];
                // Key repeats keep a triggered combination held and mirror
                // onto its output.
                if matches!(entry.matchers[m].kind, MatchKind::Key)
                    && ev.value == 2
                    && was
                    && entry.triggered
                {
                    actions.push(Action::Repeat { entry: idx });
                    continue;
                }
                let now_satisfied = match &entry.matchers[m].kind {
                    MatchKind::Key => ev.value >= 1,
                    MatchKind::AbsThreshold { threshold, min, max } => {
                        analog_match = true;
                        let pct = axis::normalize_abs(ev.value, *min, *max) * 100.0;
                        threshold_state(was, pct, f64::from(*threshold))
                    }
                    MatchKind::RelThreshold { threshold } => {
                        analog_match = true;
                        entry.last_motion_us[m] = tagged.time_us;
                        threshold_state(was, f64::from(ev.value), f64::from(*threshold))
                    }
                };
                if now_satisfied == was {
                    continue;
                }
                transitioned = true;
                entry.satisfied[m] = now_satisfied;
                if now_satisfied {
                    if entry.complete() && !entry.triggered {
                        completions.push((idx, m));
                    }
                } else if entry.triggered {
                    entry.triggered = false;
                    actions.push(Action::Release { entry: idx });
                    released_any = true;
                }
            }
        }

        if !matched_any {
            return (Verdict::Passthrough, actions);
        }

        // Longest combination first.
        completions
            .sort_by_key(|&(idx, _)| std::cmp::Reverse(self.entries[idx].len()));

        let mut pressed_any = false;
        for (idx, trigger) in completions {
            if self.blocked_by_triggered_superset(idx) {
                continue;
            }
            self.press_entry(idx, Some(trigger), &mut actions);
            pressed_any = true;
            if ev.ty == EV_KEY && !self.consumed_keys.contains(&(ev.ty, ev.code)) {
                self.consumed_keys.push((ev.ty, ev.code));
            }
        }

        // A release may let still-held shorter combinations re-activate.
        if released_any {
            self.reactivate(&mut actions);
        }

        let verdict = self.verdict_for(&ev, analog_match, transitioned, pressed_any);
        (verdict, actions)
    }

    /// Timer service: REL-driven switches release after
    /// `release_timeout` without further motion.
    pub fn tick(&mut self, now_us: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        let mut released_any = false;
        for idx in 0..self.entries.len() {
            let entry = &mut self.entries[idx];
            let timeout = entry.release_timeout_us;
            for m in 0..entry.matchers.len() {
                if !entry.satisfied[m] {
                    continue;
                }
                if !matches!(entry.matchers[m].kind, MatchKind::RelThreshold { .. }) {
                    continue;
                }
                if now_us.saturating_sub(entry.last_motion_us[m]) >= timeout {
                    entry.satisfied[m] = false;
                    if entry.triggered {
                        entry.triggered = false;
                        actions.push(Action::Release { entry: idx });
                        released_any = true;
                    }
                }
            }
        }
        if released_any {
            self.reactivate(&mut actions);
        }
        actions
    }

    /// Next time `tick` has something to do.
    pub fn next_deadline(&self) -> Option<u64> {
        let mut next: Option<u64> = None;
        for entry in &self.entries {
            for (m, matcher) in entry.matchers.iter().enumerate() {
                if entry.satisfied[m] && matches!(matcher.kind, MatchKind::RelThreshold { .. }) {
                    let deadline = entry.last_motion_us[m] + entry.release_timeout_us;
                    next = Some(next.map_or(deadline, |d| d.min(deadline)));
                }
            }
        }
        next
    }

    /// Stop-time drain: release everything that is pressed.
    pub fn release_all(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        for idx in 0..self.entries.len() {
            let entry = &mut self.entries[idx];
            if entry.triggered {
                entry.triggered = false;
                actions.push(Action::Release { entry: idx });
            }
            entry.satisfied.iter_mut().for_each(|s| *s = false);
        }
        self.consumed_keys.clear();
        actions
    }

    fn blocked_by_triggered_superset(&self, idx: usize) -> bool {
        self.entries.iter().enumerate().any(|(other, e)| {
            other != idx && e.triggered && self.entries[idx].is_proper_subset_of(e)
        })
    }

    fn press_entry(&mut self, idx: usize, trigger: Option<usize>, actions: &mut Vec<Action>) {
        // Rule 2: a previously-triggered proper subset gets a synthetic
        // release before the longer combination presses.
        for other in 0..self.entries.len() {
            if other == idx {
                continue;
            }
            if self.entries[other].triggered
                && self.entries[other].is_proper_subset_of(&self.entries[idx])
            {
                self.entries[other].triggered = false;
                actions.push(Action::Release { entry: other });
            }
        }
        // Rule 3: synthetic forward releases precede the output press.
        if self.entries[idx].release_keys {
            let keys = self.entries[idx].forward_release_keys(trigger);
            if !keys.is_empty() {
                actions.push(Action::ForwardRelease { keys });
            }
        }
        self.entries[idx].triggered = true;
        actions.push(Action::Press { entry: idx });
    }

    fn reactivate(&mut self, actions: &mut Vec<Action>) {
        for pos in 0..self.order.len() {
            let idx = self.order[pos];
            if self.entries[idx].triggered || !self.entries[idx].complete() {
                continue;
            }
            if self.blocked_by_triggered_superset(idx) {
                continue;
            }
            self.press_entry(idx, None, actions);
        }
    }

    fn verdict_for(
        &mut self,
        ev: &crate::event::Event,
        analog_match: bool,
        transitioned: bool,
        pressed_any: bool,
    ) -> Verdict {
        if ev.ty == EV_KEY {
            if pressed_any {
                return Verdict::Consumed;
            }
            if ev.is_key_up() {
                if let Some(pos) = self
                    .consumed_keys
                    .iter()
                    .position(|&c| c == (ev.ty, ev.code))
                {
                    self.consumed_keys.remove(pos);
                    return Verdict::Consumed;
                }
                return Verdict::Passthrough;
            }
            // Presses and repeats of keys belonging to a triggered
            // combination stay consumed.
            if self.entries.iter().any(|e| {
                e.triggered && e.matchers.iter().any(|m| m.ty == ev.ty && m.code == ev.code)
            }) {
                return Verdict::Consumed;
            }
            return Verdict::Passthrough;
        }
        if analog_match {
            // Bound axis samples never reach the forwarded device; the
            // in-band ones just carry no decision yet.
            if transitioned || pressed_any {
                return Verdict::Consumed;
            }
            return Verdict::Deferred;
        }
        Verdict::Passthrough
    }
}

/// Threshold satisfaction with hysteresis. `value` and `threshold` share
/// units (percent for ABS, raw speed for REL); the sign of the threshold
/// selects the direction.
fn threshold_state(was: bool, value: f64, threshold: f64) -> bool {
    if threshold == 0.0 {
        return false;
    }
    let directional = if threshold > 0.0 { value } else { -value };
    let magnitude = threshold.abs();
    if was {
        directional > magnitude * THRESHOLD_HYSTERESIS
    } else {
        directional >= magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, TaggedEvent, EV_ABS};
    use crate::preset::InputConfig;

    const ORIGIN: u64 = 1;

    fn key_entry(handler: usize, codes: &[u16], release_keys: bool) -> ComboEntry {
        let configs: Vec<InputConfig> = codes.iter().map(|&c| InputConfig::key(c)).collect();
        ComboEntry::new(handler, &configs, release_keys, 50, |_| (-32768, 32767))
    }

    fn key_ev(code: u16, value: i32, t: u64) -> TaggedEvent {
        TaggedEvent::new(Event::key(code, value), ORIGIN, t)
    }

    fn abs_ev(code: u16, value: i32, t: u64) -> TaggedEvent {
        TaggedEvent::new(Event::new(EV_ABS, code, value), ORIGIN, t)
    }

    #[test]
    fn single_key_press_and_release() {
        let mut r = Resolver::new(vec![key_entry(0, &[30], true)]);
        let (v, actions) = r.on_event(&key_ev(30, 1, 0));
        assert_eq!(v, Verdict::Consumed);
        assert_eq!(actions, vec![Action::Press { entry: 0 }]);
        let (v, actions) = r.on_event(&key_ev(30, 0, 10));
        assert_eq!(v, Verdict::Consumed);
        assert_eq!(actions, vec![Action::Release { entry: 0 }]);
    }

    #[test]
    fn prefix_key_passes_through_then_combination_wins() {
        // Combination 42+30, no mapping for 42 alone.
        let mut r = Resolver::new(vec![key_entry(0, &[42, 30], true)]);
        let (v, actions) = r.on_event(&key_ev(42, 1, 0));
        assert_eq!(v, Verdict::Passthrough);
        assert!(actions.is_empty());
        let (v, actions) = r.on_event(&key_ev(30, 1, 10));
        assert_eq!(v, Verdict::Consumed);
        assert_eq!(
            actions,
            vec![
                Action::ForwardRelease {
                    keys: vec![(EV_KEY, 42)]
                },
                Action::Press { entry: 0 },
            ]
        );
        let (v, actions) = r.on_event(&key_ev(30, 0, 20));
        assert_eq!(v, Verdict::Consumed);
        assert_eq!(actions, vec![Action::Release { entry: 0 }]);
        // 42 was never consumed; its release passes through (the graph
        // suppresses it because of the synthetic forward release).
        let (v, actions) = r.on_event(&key_ev(42, 0, 30));
        assert_eq!(v, Verdict::Passthrough);
        assert!(actions.is_empty());
    }

    #[test]
    fn longest_match_releases_the_shorter_and_reactivates() {
        let mut r = Resolver::new(vec![
            key_entry(0, &[30], false),
            key_entry(1, &[30, 48], false),
        ]);
        let (_, actions) = r.on_event(&key_ev(30, 1, 0));
        assert_eq!(actions, vec![Action::Press { entry: 0 }]);
        // Completing the longer combination releases the shorter first.
        let (v, actions) = r.on_event(&key_ev(48, 1, 10));
        assert_eq!(v, Verdict::Consumed);
        assert_eq!(
            actions,
            vec![Action::Release { entry: 0 }, Action::Press { entry: 1 }]
        );
        assert!(r.entry(1).triggered);
        assert!(!r.entry(0).triggered);
        // Releasing 48 releases the pair and re-activates the singleton.
        let (_, actions) = r.on_event(&key_ev(48, 0, 20));
        assert_eq!(
            actions,
            vec![Action::Release { entry: 1 }, Action::Press { entry: 0 }]
        );
        let (_, actions) = r.on_event(&key_ev(30, 0, 30));
        assert_eq!(actions, vec![Action::Release { entry: 0 }]);
    }

    #[test]
    fn same_event_completion_prefers_the_longest() {
        let mut r = Resolver::new(vec![
            key_entry(0, &[48], false),
            key_entry(1, &[30, 48], false),
        ]);
        let (_, actions) = r.on_event(&key_ev(30, 1, 0));
        assert!(actions.is_empty());
        // 48 completes both; only the pair may press.
        let (_, actions) = r.on_event(&key_ev(48, 1, 10));
        assert_eq!(actions, vec![Action::Press { entry: 1 }]);
        assert!(!r.entry(0).triggered);
    }

    #[test]
    fn abs_threshold_with_hysteresis() {
        let config = InputConfig {
            ty: EV_ABS,
            code: 0,
            origin_hash: None,
            analog_threshold: Some(50),
        };
        let entry = ComboEntry::new(0, &[config], true, 50, |_| (-100, 100));
        let mut r = Resolver::new(vec![entry]);
        // +60% crosses the threshold.
        let (v, actions) = r.on_event(&abs_ev(0, 60, 0));
        assert_eq!(v, Verdict::Consumed);
        assert_eq!(actions, vec![Action::Press { entry: 0 }]);
        // 45% sits inside the hysteresis band: no decision, no forward.
        let (v, actions) = r.on_event(&abs_ev(0, 45, 10));
        assert_eq!(v, Verdict::Deferred);
        assert!(actions.is_empty());
        // 30% falls below 75% of the threshold: release.
        let (v, actions) = r.on_event(&abs_ev(0, 30, 20));
        assert_eq!(v, Verdict::Consumed);
        assert_eq!(actions, vec![Action::Release { entry: 0 }]);
    }

    #[test]
    fn rel_threshold_releases_after_timeout() {
        let config = InputConfig {
            ty: crate::event::EV_REL,
            code: 8,
            origin_hash: None,
            analog_threshold: Some(5),
        };
        let entry = ComboEntry::new(0, &[config], true, 50, |_| (0, 0));
        let mut r = Resolver::new(vec![entry]);
        let ev = TaggedEvent::new(Event::new(crate::event::EV_REL, 8, 6), ORIGIN, 1_000);
        let (_, actions) = r.on_event(&ev);
        assert_eq!(actions, vec![Action::Press { entry: 0 }]);
        assert_eq!(r.next_deadline(), Some(51_000));
        // Nothing happens before the timeout.
        assert!(r.tick(40_000).is_empty());
        // Silence for release_timeout releases the switch.
        assert_eq!(r.tick(51_000), vec![Action::Release { entry: 0 }]);
        assert_eq!(r.next_deadline(), None);
    }

    #[test]
    fn negative_threshold_means_the_other_direction() {
        let config = InputConfig {
            ty: EV_ABS,
            code: 0,
            origin_hash: None,
            analog_threshold: Some(-50),
        };
        let entry = ComboEntry::new(0, &[config], true, 50, |_| (-100, 100));
        let mut r = Resolver::new(vec![entry]);
        let (_, actions) = r.on_event(&abs_ev(0, 60, 0));
        assert!(actions.is_empty());
        let (_, actions) = r.on_event(&abs_ev(0, -60, 10));
        assert_eq!(actions, vec![Action::Press { entry: 0 }]);
    }

    #[test]
    fn release_all_balances_edges() {
        let mut r = Resolver::new(vec![key_entry(0, &[30], true)]);
        let _ = r.on_event(&key_ev(30, 1, 0));
        assert!(r.entry(0).triggered);
        assert_eq!(r.release_all(), vec![Action::Release { entry: 0 }]);
        assert!(!r.entry(0).triggered);
        // Idempotent.
        assert!(r.release_all().is_empty());
    }

    #[test]
    fn repeats_of_triggered_keys_stay_consumed() {
        let mut r = Resolver::new(vec![key_entry(0, &[30], true)]);
        let _ = r.on_event(&key_ev(30, 1, 0));
        let (v, actions) = r.on_event(&key_ev(30, 2, 10));
        assert_eq!(v, Verdict::Consumed);
        assert_eq!(actions, vec![Action::Repeat { entry: 0 }]);
    }
}

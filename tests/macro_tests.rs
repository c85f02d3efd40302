//! Macro language tests: parsing edge cases, runtime semantics, timing
//! and cancellation, all driven through the scheduler with synthetic time.

use std::sync::Arc;

use remapd::event::EV_KEY;
use remapd::keys::SymbolTable;
use remapd::macros::task::TaskCtx;
use remapd::macros::{parse, MacroRuntime};
use remapd::preset::TargetUinput;
use remapd::uinputs::{Led, Route};
use remapd::vars::{VarStore, VarValue};

use test_helpers::{key_edges, CaptureSink, FixedLeds, KEY_A, KEY_B};

const MS: u64 = 1_000;
const KBD: Route = Route::Target(TargetUinput::Keyboard);

/// Minimal macro-task bench: one mapping slot, capturing sink, synthetic
/// clock.
struct TaskBench {
    runtime: MacroRuntime,
    sink: Arc<CaptureSink>,
    vars: Arc<VarStore>,
    leds: Arc<FixedLeds>,
    symbols: SymbolTable,
    program: Arc<remapd::macros::Program>,
}

impl TaskBench {
    fn new(text: &str) -> Self {
        let symbols = SymbolTable::with_defaults();
        let program = Arc::new(parse(text, &symbols).expect(text));
        TaskBench {
            runtime: MacroRuntime::new(),
            sink: Arc::new(CaptureSink::new()),
            vars: Arc::new(VarStore::new()),
            leds: Arc::new(FixedLeds::default()),
            symbols,
            program,
        }
    }

    fn press(&mut self, now_us: u64) {
        let cx = TaskCtx {
            sink: &*self.sink,
            vars: &self.vars,
            leds: &*self.leds,
            symbols: &self.symbols,
        };
        self.runtime.spawn(
            0,
            Arc::clone(&self.program),
            TargetUinput::Keyboard,
            10,
            60,
            vec![(EV_KEY, 99)],
            "bench".into(),
            now_us,
            &cx,
        );
    }

    fn release(&mut self, now_us: u64) {
        self.runtime.release(
            0,
            now_us,
            &TaskCtx {
                sink: &*self.sink,
                vars: &self.vars,
                leds: &*self.leds,
                symbols: &self.symbols,
            },
        );
    }

    fn other_key(&mut self, now_us: u64) {
        self.runtime.note_key_press(
            EV_KEY,
            50,
            now_us,
            &TaskCtx {
                sink: &*self.sink,
                vars: &self.vars,
                leds: &*self.leds,
                symbols: &self.symbols,
            },
        );
    }

    /// Steps through every runtime deadline up to `until`.
    fn run_until(&mut self, until_us: u64) {
        loop {
            let cx = TaskCtx {
                sink: &*self.sink,
                vars: &self.vars,
                leds: &*self.leds,
                symbols: &self.symbols,
            };
            match self.runtime.next_deadline() {
                Some(deadline) if deadline <= until_us => self.runtime.poll(deadline, &cx),
                _ => break,
            }
        }
        self.runtime.poll(
            until_us,
            &TaskCtx {
                sink: &*self.sink,
                vars: &self.vars,
                leds: &*self.leds,
                symbols: &self.symbols,
            },
        );
    }

    fn edges(&self) -> Vec<(u16, i32)> {
        key_edges(&self.sink.take(), KBD)
    }
}

#[test]
fn key_tap_emits_spaced_edges() {
    let mut b = TaskBench::new("key(a)");
    b.press(0);
    // Press lands immediately; release after half the key gap (5 ms).
    let first = b.sink.take();
    assert_eq!(key_edges(&first, KBD), vec![(KEY_A, 1)]);
    b.run_until(4 * MS);
    assert!(b.edges().is_empty());
    b.run_until(20 * MS);
    assert_eq!(b.edges(), vec![(KEY_A, 0)]);
    assert!(b.runtime.is_idle());
}

#[test]
fn sequence_runs_in_order() {
    let mut b = TaskBench::new("key_down(Control_L).key(a).key_up(Control_L)");
    b.press(0);
    b.run_until(100 * MS);
    assert_eq!(
        b.edges(),
        vec![(29, 1), (KEY_A, 1), (KEY_A, 0), (29, 0)]
    );
}

#[test]
fn repeat_runs_n_full_times() {
    let mut b = TaskBench::new("repeat(3,key(a))");
    b.press(0);
    b.run_until(1_000 * MS);
    assert_eq!(
        b.edges(),
        vec![
            (KEY_A, 1),
            (KEY_A, 0),
            (KEY_A, 1),
            (KEY_A, 0),
            (KEY_A, 1),
            (KEY_A, 0)
        ]
    );
}

#[test]
fn repeat_zero_is_a_no_op() {
    let mut b = TaskBench::new("repeat(0,key(a)).key(b)");
    b.press(0);
    b.run_until(1_000 * MS);
    assert_eq!(b.edges(), vec![(KEY_B, 1), (KEY_B, 0)]);
}

#[test]
fn wait_samples_inside_the_range() {
    let mut b = TaskBench::new("wait(10,20).key(a)");
    b.press(0);
    // Nothing before the minimum.
    b.run_until(9 * MS);
    assert!(b.edges().is_empty());
    // By the maximum the press must have happened.
    b.run_until(21 * MS);
    let edges = b.edges();
    assert_eq!(edges.first(), Some(&(KEY_A, 1)));
}

#[test]
fn hold_loops_until_release_and_wait_tail_completes() {
    let mut b = TaskBench::new("hold(key(a))");
    b.press(0);
    b.run_until(35 * MS);
    // 10 ms per tap: several full taps by now.
    let edges = b.edges();
    assert!(edges.len() >= 4, "expected several taps, got {edges:?}");
    assert_eq!(edges[0], (KEY_A, 1));

    // Release mid-tap: the in-flight tap still finishes its timing, then
    // the loop exits with balanced edges.
    b.release(36 * MS);
    b.run_until(100 * MS);
    let tail = b.edges();
    let presses = tail.iter().filter(|&&(_, v)| v == 1).count();
    let releases = tail.iter().filter(|&&(_, v)| v == 0).count();
    assert_eq!(presses, releases);
    assert!(b.runtime.is_idle());
}

#[test]
fn hold_keys_presses_in_order_and_releases_in_reverse() {
    let mut b = TaskBench::new("hold_keys(Control_L,Shift_L,a)");
    b.press(0);
    assert_eq!(
        key_edges(&b.sink.take(), KBD),
        vec![(29, 1), (42, 1), (KEY_A, 1)]
    );
    b.release(50 * MS);
    b.run_until(60 * MS);
    assert_eq!(
        b.edges(),
        vec![(KEY_A, 0), (42, 0), (29, 0)]
    );
}

#[test]
fn mod_tap_quick_release_taps_default() {
    let mut b = TaskBench::new("mod_tap(a,Shift_L,200)");
    b.press(0);
    b.release(50 * MS);
    b.run_until(300 * MS);
    assert_eq!(b.edges(), vec![(KEY_A, 1), (KEY_A, 0)]);
}

#[test]
fn mod_tap_held_past_term_becomes_modifier() {
    let mut b = TaskBench::new("mod_tap(a,Shift_L,200)");
    b.press(0);
    b.run_until(250 * MS);
    assert_eq!(b.edges(), vec![(42, 1)]);
    b.release(400 * MS);
    b.run_until(410 * MS);
    assert_eq!(b.edges(), vec![(42, 0)]);
}

#[test]
fn mod_tap_other_key_forces_modifier() {
    let mut b = TaskBench::new("mod_tap(a,Shift_L,200)");
    b.press(0);
    b.other_key(30 * MS);
    assert_eq!(b.edges(), vec![(42, 1)]);
    b.release(80 * MS);
    b.run_until(90 * MS);
    assert_eq!(b.edges(), vec![(42, 0)]);
}

#[test]
fn if_single_sees_other_key() {
    let mut b = TaskBench::new("if_single(key(a),key(b))");
    b.press(0);
    b.other_key(20 * MS);
    b.release(40 * MS);
    b.run_until(100 * MS);
    assert_eq!(b.edges(), vec![(KEY_B, 1), (KEY_B, 0)]);

    let mut b = TaskBench::new("if_single(key(a),key(b))");
    b.press(0);
    b.release(40 * MS);
    b.run_until(100 * MS);
    assert_eq!(b.edges(), vec![(KEY_A, 1), (KEY_A, 0)]);
}

#[test]
fn variables_bind_late() {
    let mut b = TaskBench::new("set(mode,1).add(mode,2).if_eq($mode,3,key(a),key(b))");
    b.press(0);
    b.run_until(100 * MS);
    assert_eq!(b.edges(), vec![(KEY_A, 1), (KEY_A, 0)]);
    assert_eq!(b.vars.get("mode"), Some(VarValue::Int(3)));
}

#[test]
fn if_eq_compares_across_representations() {
    let mut b = TaskBench::new("set(tag,\"1\").if_eq($tag,1,key(a),key(b))");
    b.press(0);
    b.run_until(100 * MS);
    assert_eq!(b.edges(), vec![(KEY_A, 1), (KEY_A, 0)]);
}

#[test]
fn missing_variable_matches_nothing() {
    let mut b = TaskBench::new("if_eq($nope,1,key(a),key(b))");
    b.press(0);
    b.run_until(100 * MS);
    assert_eq!(b.edges(), vec![(KEY_B, 1), (KEY_B, 0)]);
}

#[test]
fn led_branches_follow_kernel_state() {
    let mut b = TaskBench::new("if_capslock(key(a),key(b))");
    b.leds.set(Led::CapsLock, true);
    b.press(0);
    b.run_until(100 * MS);
    assert_eq!(b.edges(), vec![(KEY_A, 1), (KEY_A, 0)]);

    let mut b = TaskBench::new("if_numlock(key(a),key(b))");
    b.press(0);
    b.run_until(100 * MS);
    assert_eq!(b.edges(), vec![(KEY_B, 1), (KEY_B, 0)]);
}

#[test]
fn mouse_ticks_until_release() {
    let mut b = TaskBench::new("mouse(right,4)");
    b.press(0);
    b.run_until(500 * MS);
    b.release(500 * MS);
    b.run_until(600 * MS);
    let rel: Vec<i32> = b
        .sink
        .take()
        .iter()
        .filter(|(r, ev)| *r == KBD && ev.ty == remapd::event::EV_REL && ev.code == 0)
        .map(|(_, ev)| ev.value)
        .collect();
    // ~30 ticks of +4 over half a second at 60 Hz.
    let total: i32 = rel.iter().sum();
    assert!(total >= 100 && total <= 140, "total {total}");
    assert!(rel.iter().all(|&v| v == 4));
}

#[test]
fn wheel_carries_fractional_notches() {
    let mut b = TaskBench::new("wheel(down,10)");
    b.press(0);
    b.run_until(1_000 * MS);
    b.release(1_000 * MS);
    b.run_until(1_100 * MS);
    let notches: i32 = b
        .sink
        .take()
        .iter()
        .filter(|(_, ev)| ev.ty == remapd::event::EV_REL && ev.code == remapd::event::REL_WHEEL)
        .map(|(_, ev)| ev.value)
        .sum();
    // 10 notches/s downward for one second.
    assert!((-12..=-8).contains(&notches), "notches {notches}");
}

#[test]
fn event_node_emits_raw_triples() {
    let mut b = TaskBench::new("event(EV_REL,REL_WHEEL,-1)");
    b.press(0);
    b.run_until(10 * MS);
    let out = b.sink.take();
    assert_eq!(out.len(), 1);
    assert_eq!(
        (out[0].1.ty, out[0].1.code, out[0].1.value),
        (remapd::event::EV_REL, remapd::event::REL_WHEEL, -1)
    );
}

#[test]
fn overlong_wait_kills_the_task() {
    let mut b = TaskBench::new("wait(120000).key(a)");
    b.press(0);
    b.run_until(1_000 * MS);
    assert!(b.runtime.is_idle());
    assert_eq!(b.runtime.stats().errors, 1);
    assert!(b.edges().is_empty());
}

#[test]
fn busy_loop_is_terminated() {
    let mut b = TaskBench::new("hold(set(x,1))");
    b.press(0);
    b.run_until(10 * MS);
    assert!(b.runtime.is_idle());
    assert_eq!(b.runtime.stats().errors, 1);
}

#[test]
fn modify_wraps_and_unwraps() {
    let mut b = TaskBench::new("modify(Shift_L,key(a))");
    b.press(0);
    b.run_until(100 * MS);
    assert_eq!(
        b.edges(),
        vec![(42, 1), (KEY_A, 1), (KEY_A, 0), (42, 0)]
    );
}

#[test]
fn abort_emits_owed_key_ups() {
    let mut b = TaskBench::new("hold_keys(Control_L,a)");
    b.press(0);
    assert_eq!(key_edges(&b.sink.take(), KBD), vec![(29, 1), (KEY_A, 1)]);
    // Hard teardown (drain bound expired): still balanced.
    let cx = TaskCtx {
        sink: &*b.sink,
        vars: &b.vars,
        leds: &*b.leds,
        symbols: &b.symbols,
    };
    b.runtime.abort_all(&cx);
    assert_eq!(b.edges(), vec![(KEY_A, 0), (29, 0)]);
    assert!(b.runtime.is_idle());
}

//! End-to-end pipeline tests: events in, captured emissions out, synthetic
//! time throughout.

use remapd::event::{EV_ABS, EV_KEY, EV_REL};
use remapd::injection::AbsRanges;
use remapd::preset::{InputCombination, InputConfig, Mapping, TargetUinput};
use remapd::uinputs::Route;
use remapd::vars::VarStore;
use std::sync::Arc;

use test_helpers::*;

const KBD: Route = Route::Target(TargetUinput::Keyboard);
const KBD_MOUSE: Route = Route::Target(TargetUinput::KeyboardMouse);
const MOUSE: Route = Route::Target(TargetUinput::Mouse);

const MS: u64 = 1_000;

#[test]
fn simple_key_remap() {
    // [(KEY,30,1)] -> KEY 48
    let mut h = EngineHarness::new(preset(vec![key_mapping(&[KEY_A], KEY_B)]));
    h.feed(key_ev(0, KEY_A, 1));
    h.feed(key_ev(10 * MS, KEY_A, 0));
    let out = h.outputs();
    assert_eq!(key_edges(&out, KBD), vec![(KEY_B, 1), (KEY_B, 0)]);
    // Nothing was forwarded; the key was consumed.
    assert_eq!(key_edges(&out, Route::Forward), vec![]);
}

#[test]
fn key_repeat_mirrors_through() {
    let mut h = EngineHarness::new(preset(vec![key_mapping(&[KEY_A], KEY_B)]));
    h.feed(key_ev(0, KEY_A, 1));
    h.feed(key_ev(30 * MS, KEY_A, 2));
    h.feed(key_ev(60 * MS, KEY_A, 2));
    h.feed(key_ev(90 * MS, KEY_A, 0));
    let out = h.outputs();
    assert_eq!(
        key_edges(&out, KBD),
        vec![(KEY_B, 1), (KEY_B, 2), (KEY_B, 2), (KEY_B, 0)]
    );
}

#[test]
fn combination_with_release_keys() {
    // [(KEY,42),(KEY,30)] -> KEY 48, release_combination_keys = true.
    let mut h = EngineHarness::new(preset(vec![key_mapping(&[KEY_LEFTSHIFT, KEY_A], KEY_B)]));

    // Shift alone is not a trigger: forwarded.
    h.feed(key_ev(0, KEY_LEFTSHIFT, 1));
    assert_eq!(
        key_edges(&h.outputs(), Route::Forward),
        vec![(KEY_LEFTSHIFT, 1)]
    );

    // Completing the combination releases shift on the forwarded device
    // first, then presses the output.
    h.feed(key_ev(10 * MS, KEY_A, 1));
    let out = h.outputs();
    assert_eq!(
        key_edges(&out, Route::Forward),
        vec![(KEY_LEFTSHIFT, 0)]
    );
    assert_eq!(key_edges(&out, KBD), vec![(KEY_B, 1)]);

    // Trigger release releases the output.
    h.feed(key_ev(20 * MS, KEY_A, 0));
    assert_eq!(key_edges(&h.outputs(), KBD), vec![(KEY_B, 0)]);

    // Shift's real release was already synthesized: nothing at all.
    h.feed(key_ev(30 * MS, KEY_LEFTSHIFT, 0));
    assert!(h.outputs().is_empty());
}

#[test]
fn longest_match_wins_and_shorter_reactivates() {
    let mut h = EngineHarness::new(preset(vec![
        key_mapping(&[KEY_A], 20),
        key_mapping(&[KEY_A, KEY_S], 21),
    ]));

    h.feed(key_ev(0, KEY_A, 1));
    assert_eq!(key_edges(&h.outputs(), KBD), vec![(20, 1)]);

    // The pair takes over: the singleton's output is released first.
    h.feed(key_ev(10 * MS, KEY_S, 1));
    assert_eq!(key_edges(&h.outputs(), KBD), vec![(20, 0), (21, 1)]);

    // Releasing one key of the pair releases it and re-activates [A].
    h.feed(key_ev(20 * MS, KEY_S, 0));
    assert_eq!(key_edges(&h.outputs(), KBD), vec![(21, 0), (20, 1)]);

    h.feed(key_ev(30 * MS, KEY_A, 0));
    assert_eq!(key_edges(&h.outputs(), KBD), vec![(20, 0)]);
}

#[test]
fn macro_tap_vs_hold() {
    // if_tap(key(a), key(b), timeout=300)
    let mapping = macro_mapping(&[KEY_S], "if_tap(key(a),key(b),300)", TargetUinput::Keyboard);

    // Released at 100 ms: the tap branch plays A.
    let mut h = EngineHarness::new(preset(vec![mapping.clone()]));
    h.feed(key_ev(0, KEY_S, 1));
    h.feed(key_ev(100 * MS, KEY_S, 0));
    h.run_until(600 * MS);
    assert_eq!(key_edges(&h.outputs(), KBD), vec![(KEY_A, 1), (KEY_A, 0)]);

    // Released at 500 ms: the hold branch plays B (at the 300 ms mark).
    let mut h = EngineHarness::new(preset(vec![mapping]));
    h.feed(key_ev(0, KEY_S, 1));
    h.run_until(400 * MS);
    h.feed(key_ev(500 * MS, KEY_S, 0));
    h.run_until(900 * MS);
    assert_eq!(key_edges(&h.outputs(), KBD), vec![(KEY_B, 1), (KEY_B, 0)]);
}

#[test]
fn shared_variable_across_injections() {
    let vars = Arc::new(VarStore::new());

    // Device X: foo=1 while held, foo=0 after release.
    let x_preset = preset(vec![macro_mapping(
        &[KEY_A],
        "set(foo,1).hold(wait(5)).set(foo,0)",
        TargetUinput::Keyboard,
    )]);
    // Device Y: branch on $foo.
    let y_preset = preset(vec![macro_mapping(
        &[KEY_S],
        "if_eq($foo,1,hold_keys(a),hold_keys(BTN_MIDDLE))",
        TargetUinput::KeyboardMouse,
    )]);

    let mut x = EngineHarness::with_vars(x_preset, Arc::clone(&vars));
    let mut y = EngineHarness::with_vars(y_preset, Arc::clone(&vars));

    // Press X, then Y: Y sees foo == 1 and holds A.
    x.feed(key_ev(0, KEY_A, 1));
    y.feed(key_ev(10 * MS, KEY_S, 1));
    y.feed(key_ev(40 * MS, KEY_S, 0));
    y.run_until(50 * MS);
    assert_eq!(
        key_edges(&y.outputs(), KBD_MOUSE),
        vec![(KEY_A, 1), (KEY_A, 0)]
    );

    // Release X; its hold loop finishes the in-flight wait, then clears.
    x.feed(key_ev(60 * MS, KEY_A, 0));
    x.run_until(120 * MS);
    assert_eq!(vars.get("foo"), Some(remapd::vars::VarValue::Int(0)));

    // Y alone now holds BTN_MIDDLE.
    y.feed(key_ev(200 * MS, KEY_S, 1));
    y.feed(key_ev(240 * MS, KEY_S, 0));
    y.run_until(250 * MS);
    assert_eq!(
        key_edges(&y.outputs(), KBD_MOUSE),
        vec![(BTN_MIDDLE, 1), (BTN_MIDDLE, 0)]
    );
}

#[test]
fn abs_joystick_to_mouse_rel() {
    // ABS_X -> REL_X, gain 1, deadzone 0.1, expo 0, 60 Hz.
    let mut mapping = Mapping::new(
        InputCombination::new(vec![InputConfig {
            ty: EV_ABS,
            code: 0,
            origin_hash: None,
            analog_threshold: None,
        }]),
        TargetUinput::Mouse,
    );
    mapping.output_type = Some(EV_REL);
    mapping.output_code = Some(0);
    mapping.deadzone = 0.1;
    mapping.gain = 1.0;
    mapping.expo = 0.0;
    mapping.rel_rate = 60;

    let mut ranges = AbsRanges::new();
    ranges.insert(ORIGIN, 0, (-32768, 32767));
    let mut h = EngineHarness::with_ranges(preset(vec![mapping]), ranges);

    // Hold the stick at +0.5 for one second.
    h.feed(abs_ev(0, 0, 16384));
    h.run_until(1_000 * MS);

    let out = h.outputs();
    let ticks: Vec<i32> = out
        .iter()
        .filter(|(r, ev)| *r == MOUSE && ev.ty == EV_REL && ev.code == 0)
        .map(|(_, ev)| ev.value)
        .collect();
    let total: i32 = ticks.iter().sum();
    assert!(ticks.iter().all(|&v| v > 0));
    // Speed is shape(0.5) per tick at 60 Hz: (0.5-0.1)/0.9 * 60 = 26.7/s.
    let expected = ((0.5 - 0.1) / 0.9) * 60.0;
    let error = (f64::from(total) - expected).abs() / expected;
    assert!(
        error < 0.05,
        "sum {total} deviates more than 5% from {expected:.1}"
    );

    // Back inside the deadzone: ticking stops.
    h.feed(abs_ev(1_000 * MS, 0, 0));
    h.run_until(2_000 * MS);
    assert!(h
        .outputs()
        .iter()
        .all(|(_, ev)| !(ev.ty == EV_REL && ev.code == 0)));
}

#[test]
fn analog_threshold_to_key_with_hysteresis() {
    // (ABS,0, threshold=50%) -> KEY 30.
    let mut mapping = Mapping::new(
        InputCombination::new(vec![InputConfig {
            ty: EV_ABS,
            code: 0,
            origin_hash: None,
            analog_threshold: Some(50),
        }]),
        TargetUinput::Keyboard,
    );
    mapping.output_type = Some(EV_KEY);
    mapping.output_code = Some(KEY_A);

    let mut ranges = AbsRanges::new();
    ranges.insert(ORIGIN, 0, (-100, 100));
    let mut h = EngineHarness::with_ranges(preset(vec![mapping]), ranges);

    h.feed(abs_ev(0, 0, 60));
    assert_eq!(key_edges(&h.outputs(), KBD), vec![(KEY_A, 1)]);

    // 45% is inside the hysteresis band: no release, no flicker.
    h.feed(abs_ev(10 * MS, 0, 45));
    assert!(h.outputs().is_empty());
    h.feed(abs_ev(20 * MS, 0, 48));
    assert!(h.outputs().is_empty());

    // 30% is below 75% of the threshold: release.
    h.feed(abs_ev(30 * MS, 0, 30));
    assert_eq!(key_edges(&h.outputs(), KBD), vec![(KEY_A, 0)]);
}

#[test]
fn disabled_output_swallows_the_key() {
    let mut mapping = Mapping::new(combo(&[KEY_A]), TargetUinput::Keyboard);
    mapping.output_symbol = Some("disable".into());
    let mut h = EngineHarness::new(preset(vec![mapping, key_mapping(&[KEY_S], KEY_B)]));

    h.feed(key_ev(0, KEY_A, 1));
    h.feed(key_ev(10 * MS, KEY_A, 0));
    assert!(h.outputs().is_empty());

    // Other mappings unaffected.
    h.feed(key_ev(20 * MS, KEY_S, 1));
    h.feed(key_ev(30 * MS, KEY_S, 0));
    assert_eq!(key_edges(&h.outputs(), KBD), vec![(KEY_B, 1), (KEY_B, 0)]);
}

#[test]
fn unmapped_events_forward_in_order() {
    let mut h = EngineHarness::new(preset(vec![key_mapping(&[KEY_A], KEY_B)]));
    h.feed(key_ev(0, KEY_S, 1));
    h.feed(rel_ev(5 * MS, 0, 3));
    h.feed(key_ev(10 * MS, KEY_S, 0));
    let forwarded: Vec<(u16, u16, i32)> = h
        .outputs()
        .iter()
        .filter(|(r, _)| *r == Route::Forward)
        .map(|(_, ev)| (ev.ty, ev.code, ev.value))
        .collect();
    assert_eq!(
        forwarded,
        vec![
            (EV_KEY, KEY_S, 1),
            (EV_REL, 0, 3),
            (EV_KEY, KEY_S, 0),
        ]
    );
}

#[test]
fn drain_balances_all_edges() {
    // A held macro with owed key-ups plus a held key mapping.
    let mut h = EngineHarness::new(preset(vec![
        macro_mapping(&[KEY_A], "hold_keys(Control_L,c)", TargetUinput::Keyboard),
        key_mapping(&[KEY_S], KEY_B),
    ]));
    h.feed(key_ev(0, KEY_A, 1));
    h.feed(key_ev(5 * MS, KEY_S, 1));

    // Stop mid-hold: every press must get its release.
    h.drain(50 * MS, 200 * MS);
    let out = h.outputs();
    let mut down = std::collections::HashMap::new();
    for (_, ev) in out.iter().filter(|(_, ev)| ev.ty == EV_KEY) {
        *down.entry(ev.code).or_insert(0i32) += match ev.value {
            1 => 1,
            0 => -1,
            _ => 0,
        };
    }
    assert!(
        down.values().all(|&balance| balance == 0),
        "unbalanced edges after drain: {down:?}"
    );
}

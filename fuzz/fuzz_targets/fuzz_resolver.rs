// fuzz/fuzz_targets/fuzz_resolver.rs
#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use remapd::event::{Event, TaggedEvent, EV_KEY};
use remapd::injection::resolver::{Action, ComboEntry, Resolver};
use remapd::preset::InputConfig;

const MAX_EVENTS: usize = 512;

#[derive(Arbitrary, Debug)]
struct Step {
    key: u8,
    press: bool,
}

// A fixed little preset with overlapping combinations; the fuzzer drives
// arbitrary key traffic through it and the press/release balance per
// entry must hold at every step.
fuzz_target!(|steps: Vec<Step>| {
    let keys = [30u16, 31, 42, 48];
    let combos: [&[u16]; 4] = [&[30], &[30, 31], &[42, 30], &[42, 30, 48]];
    let entries: Vec<ComboEntry> = combos
        .iter()
        .enumerate()
        .map(|(idx, codes)| {
            let configs: Vec<InputConfig> =
                codes.iter().map(|&c| InputConfig::key(c)).collect();
            ComboEntry::new(idx, &configs, true, 50, |_| (-32768, 32767))
        })
        .collect();
    let mut resolver = Resolver::new(entries);

    let mut pressed = [0i64; 4];
    let mut t = 0u64;
    for step in steps.into_iter().take(MAX_EVENTS) {
        t += 1_000;
        let code = keys[step.key as usize % keys.len()];
        let ev = TaggedEvent::new(Event::new(EV_KEY, code, i32::from(step.press)), 1, t);
        let (_, actions) = resolver.on_event(&ev);
        for action in actions {
            match action {
                Action::Press { entry } => pressed[entry] += 1,
                Action::Release { entry } => pressed[entry] -= 1,
                _ => {}
            }
            for (entry, &count) in pressed.iter().enumerate() {
                assert!(
                    (0..=1).contains(&count),
                    "entry {entry} balance {count} out of range"
                );
            }
        }
    }
    // Draining must close every open press.
    for action in resolver.release_all() {
        if let Action::Release { entry } = action {
            pressed[entry] -= 1;
        }
    }
    assert!(pressed.iter().all(|&c| c == 0), "unbalanced after drain");
});

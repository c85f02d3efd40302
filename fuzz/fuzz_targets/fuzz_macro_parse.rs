// fuzz/fuzz_targets/fuzz_macro_parse.rs
#![no_main]

use libfuzzer_sys::fuzz_target;
use remapd::keys::SymbolTable;
use remapd::macros::parse;

// Cap the input so pathological nesting doesn't turn into minutes-long
// cases.
const MAX_LEN: usize = 4096;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_LEN {
        return;
    }
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let symbols = SymbolTable::with_defaults();
    // Parsing must never panic; when it succeeds, the canonical print
    // must re-parse to the same program.
    if let Ok(program) = parse(text, &symbols) {
        let printed = program.print();
        let reparsed = parse(&printed, &symbols)
            .expect("canonical print must re-parse");
        assert_eq!(program.nodes, reparsed.nodes);
        assert_eq!(program.root, reparsed.root);
    }
});

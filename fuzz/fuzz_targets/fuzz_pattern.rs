//! Fuzz target: `Pattern::new` + `Pattern::find`
//!
//! The first input byte splits the data into a pattern source and a
//! haystack. Compilation may fail, but must never panic; a compiled
//! pattern must report spans that stay inside the haystack and never
//! match empty.
//!
//! cargo fuzz run fuzz_pattern

#![no_main]

use libfuzzer_sys::fuzz_target;
use motorlink::mux::{Matcher, Pattern};

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let split = (split as usize).min(rest.len());
    let (source, haystack) = rest.split_at(split);
    let Ok(source) = core::str::from_utf8(source) else {
        return;
    };
    let Ok(pattern) = Pattern::new(source) else {
        return;
    };

    if let Some(m) = pattern.find(haystack) {
        assert!(m.end <= haystack.len(), "match ends past the haystack");
        assert!(m.end >= pattern.min_len(), "match shorter than the pattern allows");
        if let Some(capture) = m.capture {
            assert!(capture.start <= capture.end && capture.end <= m.end);
        }
    }
});

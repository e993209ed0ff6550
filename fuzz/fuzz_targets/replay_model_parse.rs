#![no_main]

use libfuzzer_sys::fuzz_target;
use shrinkwatch::detect::fuzz_parse_replay;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_parse_replay(data);
});

#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Malformed input must come back as an error, never a panic.
    let _ = scanline_png::decode(data);
    let _ = scanline_png::decode_header(data);
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use tempora_core::VectorFormat;

fuzz_target!(|data: &[u8]| {
    let _ = VectorFormat::Npy.decode(data);
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use tempora_core::Forest;

fuzz_target!(|data: &[u8]| {
    if let Ok(forest) = Forest::load_from_reader(data) {
        if forest.dim() > 4096 {
            return;
        }
        let query = vec![0.5f32; forest.dim()];
        let _ = forest.nns_by_vector(&query, 5, Some(64));
    }
});

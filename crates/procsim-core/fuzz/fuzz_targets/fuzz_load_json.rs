#![no_main]
use libfuzzer_sys::fuzz_target;
use procsim_core::compile::compile;
use procsim_core::loader;
use procsim_core::test_utils::LiteralEvaluator;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a JSON model, then compiled.
    // Must not panic -- returning Err is fine.
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(model) = loader::from_json_str(text) {
        let _ = compile(&model, &LiteralEvaluator);
    }
});

#![no_main]
use libfuzzer_sys::fuzz_target;
use procsim_core::compile::compile;
use procsim_core::config::RunConfig;
use procsim_core::loader;
use procsim_core::test_utils::LiteralEvaluator;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let _ = RunConfig::from_toml_str(text);
    if let Ok(model) = loader::from_toml_str(text) {
        let _ = compile(&model, &LiteralEvaluator);
    }
});

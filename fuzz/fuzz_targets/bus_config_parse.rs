#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_services::{parse_bus_config, BUS_CONFIG_SCHEMA_VERSION};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    if let Ok(config) = parse_bus_config(&raw) {
        assert_eq!(config.schema_version, BUS_CONFIG_SCHEMA_VERSION);
        assert!(!config.name.trim().is_empty());
        assert!(!config.summary().is_empty());
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_services::{split_args, SplitOptions};

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    let options = SplitOptions::default();
    if let Ok(args) = split_args(&input, &options) {
        let separators = input.chars().filter(|ch| *ch == options.separator).count();
        assert!(args.len() <= separators + 1);
        let produced: usize = args.iter().map(|arg| arg.chars().count()).sum();
        assert!(produced <= input.chars().count());
    }
});

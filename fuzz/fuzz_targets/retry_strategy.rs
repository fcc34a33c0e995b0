#![no_main]

use std::time::Duration;

use herald_retry::{RetryStrategyConfig, RetryStrategyType, calculate_delay};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (u32, u8, u64, u64)| {
    let (attempt, strategy_type, base_ms, max_ms) = data;

    let attempt = attempt % 100 + 1;
    let strategy = match strategy_type % 4 {
        0 => RetryStrategyType::Immediate,
        1 => RetryStrategyType::Exponential,
        2 => RetryStrategyType::Linear,
        _ => RetryStrategyType::Constant,
    };
    let base_delay = Duration::from_millis(base_ms % 10_000 + 1);
    let max_delay = Duration::from_millis(max_ms % 300_000 + 100);

    let config = RetryStrategyConfig {
        strategy,
        max_attempts: 100,
        base_delay,
        max_delay,
        jitter: 0.0,
    };
    let delay = calculate_delay(&config, attempt);

    assert!(delay <= max_delay);
    match strategy {
        RetryStrategyType::Immediate => assert_eq!(delay, Duration::ZERO),
        RetryStrategyType::Constant => assert_eq!(delay, base_delay.min(max_delay)),
        _ => assert!(delay >= base_delay.min(max_delay)),
    }
});

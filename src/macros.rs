// src/macros.rs

/// Logs under the target `flowmon::<component>`, so the dispatcher's
/// `[ts][LEVEL][target][pid][tid]` prefix carries the component tag.
/// Usage:
/// ```rust
/// use log::Level;
/// flowmon::flowmon_log!(Level::Info, "scheduler", "Pass complete");
/// flowmon::flowmon_log!(Level::Warn, "parse", "dropped line: {}", "junk");
/// ```
/// Logs like:
/// [2026-04-25T16:32:10+02:00][INFO ][flowmon::scheduler][pid=4568][tid=ThreadId(2)] Pass complete
#[macro_export]
macro_rules! flowmon_log {
    ($level:expr, $component:literal, $fmt:literal $(, $($arg:tt)+)?) => {
        log::log!(
            target: concat!("flowmon::", $component),
            $level,
            $fmt
            $(, $($arg)+)?
        );
    };
}

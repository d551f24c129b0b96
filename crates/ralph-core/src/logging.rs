//! Log filter selection shared by the hub and the monitor.

pub const LOG_LEVEL_ENV: &str = "RALPH_LOG_LEVEL";

/// Filter directive for this process. `debug` wins over the environment;
/// otherwise `RUST_LOG`, then `RALPH_LOG_LEVEL`, then `default`.
pub fn log_filter_directive(debug: bool, default: &str) -> String {
    resolve_filter_directive(
        debug,
        std::env::var("RUST_LOG").ok(),
        std::env::var(LOG_LEVEL_ENV).ok(),
        default,
    )
}

fn resolve_filter_directive(
    debug: bool,
    rust_log: Option<String>,
    level: Option<String>,
    default: &str,
) -> String {
    if debug {
        return "debug".to_string();
    }
    rust_log
        .into_iter()
        .chain(level)
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_overrides_environment() {
        let directive =
            resolve_filter_directive(true, Some("warn".into()), Some("error".into()), "info");
        assert_eq!(directive, "debug");
    }

    #[test]
    fn environment_then_default() {
        assert_eq!(
            resolve_filter_directive(false, Some("ralph_hub=trace".into()), Some("error".into()), "info"),
            "ralph_hub=trace"
        );
        assert_eq!(
            resolve_filter_directive(false, Some(" ".into()), Some("error".into()), "info"),
            "error"
        );
        assert_eq!(resolve_filter_directive(false, None, None, "warn"), "warn");
    }
}

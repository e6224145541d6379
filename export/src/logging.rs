//! Logging configuration for the export layer
//!
//! Thin wrappers over `log` + `env_logger`. The export layer logs registry
//! activity at `debug`/`trace`; drivers call [`init_from_env`] once and
//! control verbosity with `RUST_LOG` (e.g. `RUST_LOG=export=debug`).

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging with a specific level. Only initializes once;
/// subsequent calls are no-ops.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {}:{} - {}",
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .init();
    });
}

/// Initialize logging with sensible defaults (Warn level).
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Initialize logging from the `RUST_LOG` environment variable, defaulting
/// to Warn when unset.
pub fn init_from_env() {
    INIT.call_once(|| {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    });
}

/// Initialize logging for tests; safe to call from every test.
pub fn init_test() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_test();
        init_test();
    }
}

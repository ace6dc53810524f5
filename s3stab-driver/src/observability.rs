//! Logging setup for the driver binary.

use std::env;

use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::Config;

/// Installs the global tracing subscriber, writing to stderr.
///
/// With `verbose`, the configured level is raised to at least `DEBUG`.
pub fn init_tracing(config: &Config, verbose: bool) {
    let (level, env_filter) = parse_rust_log(config.logging.level);
    let level = if verbose {
        level.max(LevelFilter::DEBUG)
    } else {
        level
    };

    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(env_filter)
        .init();
}

/// Returns the effective level and the per-crate filter.
///
/// A `RUST_LOG` holding a plain level overrides `default`. Anything else is used as a literal
/// filter directive.
pub fn parse_rust_log(default: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<Level>() {
            Ok(level) => LevelFilter::from(level),
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => default,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        aws_smithy_runtime=WARN,\
        aws_config=WARN,\
        lettre=WARN,\
        s3stab_driver=TRACE,\
        s3stab_plan=TRACE,\
        ",
    );

    (level, env_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_level_overrides_default() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RUST_LOG", "warn");
            let (level, _) = parse_rust_log(LevelFilter::INFO);
            assert_eq!(level, LevelFilter::WARN);

            jail.set_env("RUST_LOG", "s3stab_driver=debug");
            let (level, _) = parse_rust_log(LevelFilter::INFO);
            assert_eq!(level, LevelFilter::TRACE);
            Ok(())
        });
    }
}

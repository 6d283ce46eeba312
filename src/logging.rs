use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_ENV: &str = "RECONDUCTOR_LOG";

/// Console level from `-v` count when neither `RUST_LOG` nor
/// `RECONDUCTOR_LOG` is set.
pub fn console_directive(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_ENV))
        .unwrap_or_else(|_| format!("{}={level}", env!("CARGO_CRATE_NAME")))
}

/// Console layer on stderr, plus a full-detail file layer when `log_file`
/// is set.
pub fn init(verbosity: u8, log_file: Option<&Path>) -> Result<(), String> {
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(console_directive(verbosity)));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("failed to create log directory {}: {e}", parent.display()))?;
            }
            let file = std::fs::File::create(path)
                .map_err(|e| format!("failed to create log file {}: {e}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_target(false)
                    .with_ansi(false)
                    .with_filter(EnvFilter::new(format!(
                        "{}=debug",
                        env!("CARGO_CRATE_NAME")
                    ))),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| format!("failed to initialize logging: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        if std::env::var("RUST_LOG").is_ok() || std::env::var(LOG_ENV).is_ok() {
            return;
        }
        assert_eq!(console_directive(0), "reconductor=warn");
        assert_eq!(console_directive(1), "reconductor=info");
        assert_eq!(console_directive(5), "reconductor=debug");
    }
}

use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

use conveyor_core::panic_message;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, filter::EnvFilter, fmt};

const ENV_DEBUG: &str = "CONVEYOR_DEBUG";

/// Routes panics into the log. Location fields are attached when known, the backtrace
/// only when one was captured (`RUST_BACKTRACE`).
fn report_panic(panic_info: &PanicHookInfo<'_>) {
    let message = panic_message(panic_info.payload());
    let backtrace = Backtrace::capture();

    match (panic_info.location(), backtrace.status()) {
        (_, BacktraceStatus::Captured) => {
            tracing::error!(%backtrace, "panicked: {panic_info}");
        }
        (Some(location), _) => {
            tracing::error!(
                file = location.file(),
                line = location.line(),
                column = location.column(),
                "panicked: {message}"
            );
        }
        (None, _) => tracing::error!("panicked: {message}"),
    }
}

fn debug_mode() -> bool {
    std::env::var(ENV_DEBUG).is_ok_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default level, which is
/// `debug` with `CONVEYOR_DEBUG=true` and `info` otherwise. Debug mode logs plain
/// text, everything else is flattened JSON.
pub(super) fn register() {
    let debug_mode = debug_mode();
    let default_level = if debug_mode { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let layer = if debug_mode {
        fmt::layer().boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .init();

    std::panic::set_hook(Box::new(report_panic));
}

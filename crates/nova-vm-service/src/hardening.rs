use std::sync::Arc;

use nova_config::{init_tracing, LogBuffer, NovaConfig};

/// Log lines replayed to stderr when the process panics.
const CRASH_LOG_LINES: usize = 50;

/// Initialize structured logging and install a panic hook for the service process.
///
/// Panics are recorded in the log before the default hook runs. When logs are not
/// already mirrored to stderr, the hook also replays the tail of the in-memory log
/// buffer there, so a crash leaves a trace of the requests that led to it.
pub fn init(config: &NovaConfig) {
    let buffer = init_tracing(&config.logging);
    let replay = !config.logging.stderr;
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_default();
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        tracing::error!(target: "nova.vm_service", %location, %message, "panic");
        if replay {
            eprintln!("{}", crash_report(&buffer, CRASH_LOG_LINES));
        }
        default_hook(info);
    }));
}

fn crash_report(buffer: &Arc<LogBuffer>, lines: usize) -> String {
    let mut report = String::from("nova-vm-service crashed; recent log lines:");
    for line in buffer.last_lines(lines) {
        report.push_str("\n  ");
        report.push_str(&line);
    }
    report
}

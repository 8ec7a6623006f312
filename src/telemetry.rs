use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

fn trace_file_path() -> Option<PathBuf> {
    env::var("VOICEBRIDGE_TRACE_LOG").ok().map(PathBuf::from)
}

/// Install the global tracing subscriber once.
///
/// Logs go to stderr so stdout stays reserved for the newline-JSON
/// lifecycle events; set `VOICEBRIDGE_TRACE_LOG` to divert them to a JSON
/// file instead.
pub fn init_tracing() {
    let _ = TRACING_INIT.get_or_init(|| {
        if let Some(path) = trace_file_path() {
            let file = match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => file,
                Err(_) => return,
            };
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_writer(file)
                .with_current_span(false)
                .with_span_list(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        } else {
            let subscriber = tracing_subscriber::fmt()
                .with_timer(UtcTime::rfc_3339())
                .with_writer(io::stderr)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    });
}

use tracing::Level;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::FmtSubscriber;

/// Installs a formatting subscriber for the whole process.
///
/// The library never calls this on its own, binaries call it once at startup.
///
/// # Errors
/// Returns an error when a global subscriber is already installed.
pub fn init(level: Level) -> Result<(), SetGlobalDefaultError> {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
}

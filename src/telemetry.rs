//! Optional tracing bootstrap for binaries and examples.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the default fmt subscriber at INFO. No-op if a subscriber is
/// already set (tests, embedders with their own setup).
pub fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

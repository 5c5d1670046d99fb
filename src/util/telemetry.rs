//! Process-wide tracing setup.

use tracing_subscriber::EnvFilter;

/// Install the default fmt subscriber, filtered through `RUST_LOG`.
///
/// Does nothing when a dispatcher is already set, so embedders keep their
/// own subscriber and the bootstrap can call this unconditionally.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

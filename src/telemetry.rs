use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Installs the global `fmt` subscriber. `RUST_LOG` overrides the default
/// `info` filter; daemon output is logged at `info` under target `syncthing`,
/// so `RUST_LOG=info,syncthing=warn` silences it.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

fn default_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn default_filter_shows_daemon_output() {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(default_filter())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "syncthing", Level::INFO));
            assert!(tracing::enabled!(target: "syncthing_manager::manager", Level::INFO));
            assert!(!tracing::enabled!(target: "syncthing_manager::poller", Level::DEBUG));
        });
    }
}

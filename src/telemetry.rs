use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs the fmt subscriber plus the Sentry layer.
///
/// Hold the returned guard for the life of the process; Sentry stays disabled
/// when no DSN is configured.
pub fn init(sentry_dsn: Option<&str>) -> sentry::ClientInitGuard {
    let guard = sentry::init((
        sentry_dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    ));

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry::integrations::tracing::layer())
        .init();

    guard
}

// ABOUTME: PostgreSQL connection setup for the central store
// ABOUTME: TLS via native-tls, self-signed policy set once at startup, retry with backoff

use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_postgres::Client;

use crate::utils::{retry_with_backoff, sanitize_url};

static ALLOW_SELF_SIGNED: OnceLock<bool> = OnceLock::new();

/// Set whether TLS connections accept self-signed certificates.
///
/// Only the first call has an effect; later calls are ignored.
pub fn init_tls_policy(allow_self_signed_certs: bool) {
    if ALLOW_SELF_SIGNED.set(allow_self_signed_certs).is_err() {
        tracing::debug!("TLS policy already initialized");
    }
    if allow_self_signed_certs {
        tracing::warn!("Accepting self-signed TLS certificates (insecure)");
    }
}

fn allow_self_signed() -> bool {
    ALLOW_SELF_SIGNED.get().copied().unwrap_or(false)
}

/// Connect to PostgreSQL and spawn the connection task on the tokio runtime.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// let client = revsync::postgres::connect("postgresql://sync@localhost/central").await?;
/// # Ok(())
/// # }
/// ```
pub async fn connect(url: &str) -> Result<Client> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(allow_self_signed())
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(connector);

    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .with_context(|| format!("Failed to connect to {}", sanitize_url(url)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    tracing::debug!("Connected to {}", sanitize_url(url));
    Ok(client)
}

/// [`connect`] with exponential backoff, for flaky networks at startup.
pub async fn connect_with_retry(url: &str, max_retries: u32) -> Result<Client> {
    retry_with_backoff(|| connect(url), max_retries, Duration::from_secs(1))
        .await
        .with_context(|| {
            format!(
                "Failed to connect to {} after {} attempts",
                sanitize_url(url),
                max_retries + 1
            )
        })
}

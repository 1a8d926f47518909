//! Pooled SMTP transport layer

pub mod pool;

pub use pool::{PoolMetrics, PooledTransport, SmtpPool, TransportSpec};

use cadence_common::{Error, Result};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, Tokio1Executor};
use std::time::Duration;

/// SMTP connect bound
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// SMTP socket bound, applied to every transport
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(75);

/// Build a transport for a sender identity. `secure` selects implicit TLS;
/// otherwise the connection is plain (the relay decides on STARTTLS).
pub fn build_transport(
    spec: &TransportSpec,
    max_connections: u32,
) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let mut builder = if spec.secure {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&spec.host)
            .map_err(|e| Error::Smtp(format!("Failed to configure transport: {}", e)))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&spec.host)
    };

    builder = builder
        .port(spec.port)
        .timeout(Some(SOCKET_TIMEOUT))
        .pool_config(lettre::transport::smtp::PoolConfig::new().max_size(max_connections));

    if !spec.username.is_empty() {
        builder = builder.credentials(Credentials::new(
            spec.username.clone(),
            spec.password.clone(),
        ));
    }

    Ok(builder.build())
}

/// Open a connection and exchange a greeting, bounded by the connect
/// timeout. Used before an account is persisted and by explicit tests.
pub async fn verify_connection(spec: &TransportSpec) -> Result<()> {
    let transport = build_transport(spec, 1)?;

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, transport.test_connection())
        .await
        .map_err(|_| Error::Smtp("Connection test timed out".to_string()))?
        .map_err(|e| Error::Smtp(format!("Connection test failed: {}", e)))?;

    if !connected {
        return Err(Error::Smtp("Server rejected the connection".to_string()));
    }
    Ok(())
}

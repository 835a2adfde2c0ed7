//! Proxy connection setup: TCP connect, keepalive, optional TLS, CONNECT.

use std::sync::Arc;
use std::time::Duration;

use sbx_protocol::{ConnectStatusError, MAX_RESPONSE_HEAD, find_header_end, parse_status};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::client::TlsStream;
use tracing::debug;

use super::KEEPALIVE_IDLE;
use crate::error::{Error, Result};

/// Connects to the proxy within `connect_timeout` and enables keepalive.
pub async fn connect_proxy(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
	let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await {
		Ok(connected) => connected?,
		Err(_) => {
			return Err(Error::Io(std::io::Error::new(
				std::io::ErrorKind::TimedOut,
				format!("connecting to proxy {host}:{port} timed out after {connect_timeout:?}"),
			)));
		}
	};
	let _ = stream.set_nodelay(true);
	enable_keepalive(&stream);
	Ok(stream)
}

/// Turns on TCP keepalive with a 30s idle threshold. Failures are ignored.
pub fn enable_keepalive(stream: &TcpStream) {
	let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_IDLE);
	if let Err(err) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
		debug!(target = "sbx.tunnel", error = %err, "TCP keepalive unsupported; continuing without it");
	}
}

/// TLS client trusting the webpki root set.
pub fn tls_connector() -> TlsConnector {
	let mut roots = RootCertStore::empty();
	roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
	let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
	TlsConnector::from(Arc::new(config))
}

/// Wraps `stream` in TLS using `host` as the server name.
pub async fn wrap_tls(connector: &TlsConnector, host: &str, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
	let server_name = ServerName::try_from(host.to_string()).map_err(|err| Error::Tls(format!("invalid proxy server name {host:?}: {err}")))?;
	connector
		.connect(server_name, stream)
		.await
		.map_err(|err| Error::Tls(format!("handshake with proxy {host} failed: {err}")))
}

/// Sends a pre-encoded CONNECT `request` and waits for a `200` response.
///
/// Returns any bytes the proxy sent after the response head; they belong to
/// the tunneled stream and must reach the client before anything else.
pub async fn handshake<S>(stream: &mut S, request: &[u8]) -> Result<Vec<u8>>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	stream.write_all(request).await?;
	stream.flush().await?;

	let mut head = Vec::with_capacity(1024);
	let mut chunk = [0u8; 4096];
	loop {
		let n = stream.read(&mut chunk).await?;
		if n == 0 {
			return Err(Error::TunnelProtocol("proxy closed the connection before responding to CONNECT".to_string()));
		}
		head.extend_from_slice(&chunk[..n]);

		if let Some(end) = find_header_end(&head) {
			parse_status(&head[..end]).map_err(|err| Error::TunnelProtocol(err.to_string()))?;
			return Ok(head.split_off(end));
		}
		if head.len() > MAX_RESPONSE_HEAD {
			return Err(Error::TunnelProtocol(ConnectStatusError::HeadTooLarge.to_string()));
		}
	}
}

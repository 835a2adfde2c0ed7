use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use sbx_protocol::ConnectRequest;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::handshake::{connect_proxy, handshake, tls_connector, wrap_tls};
use super::{ProxyCredential, RELAY_CHUNK_SIZE, TunnelEndpoint};
use crate::error::{Error, Result};

/// Bytes moved by one finished tunnel connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
	/// Client to destination.
	pub sent: u64,
	/// Destination to client, including bytes that arrived with the CONNECT response.
	pub received: u64,
}

/// Loopback listener that tunnels every accepted client through the proxy.
///
/// A relay runs at most once: `Idle -> Running -> Stopped`. Per-connection
/// failures are logged and contained; only binding can fail [`TunnelRelay::start`].
pub struct TunnelRelay {
	endpoint: TunnelEndpoint,
	credential: Option<ProxyCredential>,
	state: RelayState,
}

enum RelayState {
	Idle,
	Running(Running),
	Stopped,
}

struct Running {
	local_port: u16,
	accept_cancel: CancellationToken,
	conn_cancel: CancellationToken,
	accept_task: JoinHandle<()>,
	connections: TaskTracker,
}

/// Shared, read-only state for every connection of one relay.
struct ConnectionContext {
	endpoint: TunnelEndpoint,
	request: Vec<u8>,
	tls: Option<TlsConnector>,
}

impl TunnelRelay {
	pub fn new(endpoint: TunnelEndpoint, credential: Option<ProxyCredential>) -> Self {
		Self {
			endpoint,
			credential,
			state: RelayState::Idle,
		}
	}

	pub fn endpoint(&self) -> &TunnelEndpoint {
		&self.endpoint
	}

	/// Binds the loopback listener and starts accepting. Returns the bound port.
	pub async fn start(&mut self) -> Result<u16> {
		match &self.state {
			RelayState::Idle => {}
			RelayState::Running(running) => return Err(Error::TunnelAlreadyRunning(running.local_port)),
			RelayState::Stopped => return Err(Error::TunnelStopped),
		}

		let request = ConnectRequest {
			dest_host: &self.endpoint.dest_host,
			dest_port: self.endpoint.dest_port,
			credential: self.credential.as_ref().map(ProxyCredential::basic),
		}
		.encode();
		let tls = self.endpoint.use_tls_to_proxy.then(tls_connector);

		let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, self.endpoint.local_port));
		let listener = TcpListener::bind(addr).await.map_err(|source| Error::TunnelBind { addr, source })?;
		let local_port = listener.local_addr().map_err(|source| Error::TunnelBind { addr, source })?.port();

		let ctx = Arc::new(ConnectionContext {
			endpoint: self.endpoint.clone(),
			request,
			tls,
		});
		let accept_cancel = CancellationToken::new();
		let conn_cancel = CancellationToken::new();
		let connections = TaskTracker::new();
		let accept_task = tokio::spawn(accept_loop(
			listener,
			ctx,
			accept_cancel.clone(),
			conn_cancel.clone(),
			connections.clone(),
		));

		info!(
			target = "sbx.tunnel",
			local_port,
			proxy = %self.endpoint.proxy(),
			dest = %format!("{}:{}", self.endpoint.dest_host, self.endpoint.dest_port),
			tls = self.endpoint.use_tls_to_proxy,
			"tunnel listening"
		);
		self.state = RelayState::Running(Running {
			local_port,
			accept_cancel,
			conn_cancel,
			accept_task,
			connections,
		});
		Ok(local_port)
	}

	/// Closes the listener, then tears down open connections. Idempotent.
	///
	/// A stopped relay cannot be started again.
	pub async fn stop(&mut self) {
		let RelayState::Running(running) = std::mem::replace(&mut self.state, RelayState::Stopped) else {
			return;
		};

		running.accept_cancel.cancel();
		if let Err(err) = running.accept_task.await {
			if err.is_panic() {
				warn!(target = "sbx.tunnel", error = %err, "accept loop panicked");
			}
		}

		running.conn_cancel.cancel();
		running.connections.close();
		running.connections.wait().await;
		info!(target = "sbx.tunnel", local_port = running.local_port, "tunnel stopped");
	}

	pub fn local_port(&self) -> Option<u16> {
		match &self.state {
			RelayState::Running(running) => Some(running.local_port),
			_ => None,
		}
	}

	pub fn is_running(&self) -> bool {
		matches!(self.state, RelayState::Running(_))
	}

	/// Connections currently being served.
	pub fn active_connections(&self) -> usize {
		match &self.state {
			RelayState::Running(running) => running.connections.len(),
			_ => 0,
		}
	}
}

impl Drop for TunnelRelay {
	fn drop(&mut self) {
		if let RelayState::Running(running) = &self.state {
			running.accept_cancel.cancel();
			running.conn_cancel.cancel();
		}
	}
}

async fn accept_loop(
	listener: TcpListener,
	ctx: Arc<ConnectionContext>,
	accept_cancel: CancellationToken,
	conn_cancel: CancellationToken,
	connections: TaskTracker,
) {
	let mut next_id: u64 = 0;
	loop {
		let (client, peer) = tokio::select! {
			biased;
			_ = accept_cancel.cancelled() => break,
			accepted = listener.accept() => match accepted {
				Ok(accepted) => accepted,
				Err(err) => {
					warn!(target = "sbx.tunnel", error = %err, "accept failed");
					tokio::time::sleep(Duration::from_millis(50)).await;
					continue;
				}
			},
		};

		next_id += 1;
		let conn = next_id;
		let ctx = Arc::clone(&ctx);
		let cancel = conn_cancel.clone();
		connections.spawn(async move {
			debug!(target = "sbx.tunnel", conn, %peer, "client connected");
			tokio::select! {
				biased;
				_ = cancel.cancelled() => debug!(target = "sbx.tunnel", conn, "connection cancelled"),
				served = serve_connection(client, &ctx) => match served {
					Ok(transfer) => debug!(target = "sbx.tunnel", conn, sent = transfer.sent, received = transfer.received, "connection closed"),
					Err(err) => warn!(target = "sbx.tunnel", conn, error = %err, "tunnel connection failed"),
				},
			}
		});
	}
	debug!(target = "sbx.tunnel", accepted = next_id, "listener closed");
}

async fn serve_connection(client: TcpStream, ctx: &ConnectionContext) -> Result<Transfer> {
	let endpoint = &ctx.endpoint;
	match &ctx.tls {
		Some(connector) => {
			let (upstream, leftover) = within_connect_timeout(endpoint, async {
				let tcp = connect_proxy(&endpoint.proxy_host, endpoint.proxy_port, endpoint.connect_timeout).await?;
				let mut upstream = wrap_tls(connector, &endpoint.proxy_host, tcp).await?;
				let leftover = handshake(&mut upstream, &ctx.request).await?;
				Ok::<_, Error>((upstream, leftover))
			})
			.await?;
			pipe(client, upstream, leftover).await
		}
		None => {
			let (upstream, leftover) = within_connect_timeout(endpoint, async {
				let mut upstream = connect_proxy(&endpoint.proxy_host, endpoint.proxy_port, endpoint.connect_timeout).await?;
				let leftover = handshake(&mut upstream, &ctx.request).await?;
				Ok::<_, Error>((upstream, leftover))
			})
			.await?;
			pipe(client, upstream, leftover).await
		}
	}
}

/// Bounds everything before the byte pump: TCP connect, TLS and the CONNECT exchange.
async fn within_connect_timeout<T>(endpoint: &TunnelEndpoint, setup: impl Future<Output = Result<T>>) -> Result<T> {
	match tokio::time::timeout(endpoint.connect_timeout, setup).await {
		Ok(established) => established,
		Err(_) => Err(Error::TunnelProtocol(format!(
			"proxy {}:{} did not establish the tunnel within {:?}",
			endpoint.proxy_host, endpoint.proxy_port, endpoint.connect_timeout
		))),
	}
}

/// Pumps bytes both ways until either side reaches EOF, then closes both.
async fn pipe<S>(client: TcpStream, upstream: S, leftover: Vec<u8>) -> Result<Transfer>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let (mut client_read, mut client_write) = client.into_split();
	let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);
	let mut transfer = Transfer::default();

	if !leftover.is_empty() {
		client_write.write_all(&leftover).await.map_err(Error::Relay)?;
		transfer.received += leftover.len() as u64;
	}

	let pumped = tokio::select! {
		up = copy_chunks(&mut client_read, &mut upstream_write, &mut transfer.sent) => up,
		down = copy_chunks(&mut upstream_read, &mut client_write, &mut transfer.received) => down,
	};

	let _ = upstream_write.shutdown().await;
	let _ = client_write.shutdown().await;
	pumped.map(|()| transfer).map_err(Error::Relay)
}

async fn copy_chunks<R, W>(reader: &mut R, writer: &mut W, total: &mut u64) -> std::io::Result<()>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	let mut buf = vec![0u8; RELAY_CHUNK_SIZE];
	loop {
		let n = reader.read(&mut buf).await?;
		if n == 0 {
			return Ok(());
		}
		writer.write_all(&buf[..n]).await?;
		writer.flush().await?;
		*total += n as u64;
	}
}

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use sbx::protocol::find_header_end;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// CONNECT proxy that forwards every authorized tunnel to one destination.
pub struct FakeProxy {
	pub addr: SocketAddr,
	requests: Arc<Mutex<Vec<String>>>,
	authorize: Arc<AtomicBool>,
	task: JoinHandle<()>,
}

impl FakeProxy {
	pub async fn spawn(dest: SocketAddr) -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let requests = Arc::new(Mutex::new(Vec::new()));
		let authorize = Arc::new(AtomicBool::new(true));

		let task = tokio::spawn({
			let requests = Arc::clone(&requests);
			let authorize = Arc::clone(&authorize);
			async move {
				loop {
					let Ok((stream, _)) = listener.accept().await else {
						return;
					};
					tokio::spawn(handle_connect(stream, dest, Arc::clone(&requests), Arc::clone(&authorize)));
				}
			}
		});

		Self {
			addr,
			requests,
			authorize,
			task,
		}
	}

	pub fn port(&self) -> u16 {
		self.addr.port()
	}

	/// Answer subsequent CONNECTs with `407` instead of tunneling.
	pub fn set_authorize(&self, authorize: bool) {
		self.authorize.store(authorize, Ordering::SeqCst);
	}

	/// Raw CONNECT request heads received so far.
	pub fn requests(&self) -> Vec<String> {
		self.requests.lock().clone()
	}
}

impl Drop for FakeProxy {
	fn drop(&mut self) {
		self.task.abort();
	}
}

async fn handle_connect(mut stream: TcpStream, dest: SocketAddr, requests: Arc<Mutex<Vec<String>>>, authorize: Arc<AtomicBool>) {
	let mut head = Vec::new();
	let mut buf = [0u8; 1024];
	while find_header_end(&head).is_none() {
		match stream.read(&mut buf).await {
			Ok(0) | Err(_) => return,
			Ok(n) => head.extend_from_slice(&buf[..n]),
		}
	}
	requests.lock().push(String::from_utf8_lossy(&head).into_owned());

	if !authorize.load(Ordering::SeqCst) {
		let _ = stream.write_all(b"HTTP/1.1 407 Unauthorized\r\n\r\n").await;
		return;
	}

	let Ok(mut upstream) = TcpStream::connect(dest).await else {
		let _ = stream.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
		return;
	};
	if stream.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await.is_err() {
		return;
	}
	let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
}

/// Proxy that accepts TCP connections and never answers.
pub struct SilentProxy {
	pub addr: SocketAddr,
	accepted: Arc<AtomicUsize>,
	task: JoinHandle<()>,
}

impl SilentProxy {
	pub async fn spawn() -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let accepted = Arc::new(AtomicUsize::new(0));

		let task = tokio::spawn({
			let accepted = Arc::clone(&accepted);
			async move {
				let mut held = Vec::new();
				while let Ok((stream, _)) = listener.accept().await {
					accepted.fetch_add(1, Ordering::SeqCst);
					held.push(stream);
				}
			}
		});

		Self { addr, accepted, task }
	}

	pub fn port(&self) -> u16 {
		self.addr.port()
	}

	pub fn accepted(&self) -> usize {
		self.accepted.load(Ordering::SeqCst)
	}
}

impl Drop for SilentProxy {
	fn drop(&mut self) {
		self.task.abort();
	}
}

/// Destination that echoes every byte back.
pub async fn spawn_echo() -> (SocketAddr, JoinHandle<()>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let task = tokio::spawn(async move {
		loop {
			let Ok((stream, _)) = listener.accept().await else {
				return;
			};
			tokio::spawn(async move {
				let (mut read, mut write) = stream.into_split();
				let _ = tokio::io::copy(&mut read, &mut write).await;
			});
		}
	});
	(addr, task)
}

/// Destination that writes `greeting` to each client and hangs up.
pub async fn spawn_greeter(greeting: &'static [u8]) -> (SocketAddr, JoinHandle<()>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let task = tokio::spawn(async move {
		loop {
			let Ok((mut stream, _)) = listener.accept().await else {
				return;
			};
			tokio::spawn(async move {
				let _ = stream.write_all(greeting).await;
				let _ = stream.shutdown().await;
			});
		}
	});
	(addr, task)
}

/// Writes `payload` through `stream` while reading the same number of bytes back.
pub async fn echo_round_trip(stream: TcpStream, payload: Vec<u8>) -> Vec<u8> {
	let (mut read, mut write) = stream.into_split();
	let expected = payload.len();
	let writer = tokio::spawn(async move {
		write.write_all(&payload).await.unwrap();
		write
	});

	let mut received = vec![0u8; expected];
	read.read_exact(&mut received).await.unwrap();
	drop(writer.await.unwrap());
	received
}

pub fn patterned(len: usize) -> Vec<u8> {
	(0..len).map(|i| (i % 251) as u8).collect()
}

/// Routes library logs to the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

// Copyright 2019 The Kestrel Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP server harness carrying a router: binds (optionally behind
//! TLS), serves until asked to stop, and keeps the runtime on its own
//! thread so the rest of the node stays synchronous.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures::channel::oneshot;
use hyper::server::conn::Http;
use hyper::service::{make_service_fn, service_fn};
use rustls::{Certificate, PrivateKey, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::router::Router;

/// Errors that can be returned by an API endpoint or the server
/// harness.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// Server or handler fault.
	#[fail(display = "Internal error: {}", _0)]
	Internal(String),
	/// Client passed malformed arguments.
	#[fail(display = "Bad arguments: {}", _0)]
	Argument(String),
	/// The requested entity does not exist.
	#[fail(display = "Not found: {}", _0)]
	NotFound(String),
	/// The request body could not be consumed.
	#[fail(display = "Request error: {}", _0)]
	RequestError(String),
}

/// TLS configuration for the API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TLSConfig {
	/// PEM certificate chain file.
	pub certificate: String,
	/// PEM private key file.
	pub private_key: String,
}

/// Assemble an optional TLS configuration out of the two optional
/// config fields.
pub fn tls_config(certificate: Option<String>, private_key: Option<String>) -> Option<TLSConfig> {
	match (certificate, private_key) {
		(Some(certificate), Some(private_key)) => Some(TLSConfig {
			certificate,
			private_key,
		}),
		_ => None,
	}
}

impl TLSConfig {
	fn load(&self) -> Result<ServerConfig, Error> {
		let certs = rustls_pemfile::certs(&mut BufReader::new(
			File::open(&self.certificate)
				.map_err(|e| Error::Internal(format!("failed to open certificate: {}", e)))?,
		))
		.map_err(|e| Error::Internal(format!("failed to parse certificate: {}", e)))?
		.into_iter()
		.map(Certificate)
		.collect();

		let mut keys = rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(
			File::open(&self.private_key)
				.map_err(|e| Error::Internal(format!("failed to open private key: {}", e)))?,
		))
		.map_err(|e| Error::Internal(format!("failed to parse private key: {}", e)))?;
		if keys.is_empty() {
			return Err(Error::Internal("no private key found".to_owned()));
		}

		ServerConfig::builder()
			.with_safe_defaults()
			.with_no_client_auth()
			.with_single_cert(certs, PrivateKey(keys.remove(0)))
			.map_err(|e| Error::Internal(format!("invalid certificate or key: {}", e)))
	}
}

/// A running API server, stoppable from the owning thread.
pub struct ApiServer {
	shutdown_sender: Option<oneshot::Sender<()>>,
	thread: Option<JoinHandle<()>>,
}

impl ApiServer {
	/// Bind the router to `addr` and start serving on a dedicated
	/// thread.
	pub fn start(
		addr: SocketAddr,
		router: Router,
		tls: Option<TLSConfig>,
	) -> Result<ApiServer, Error> {
		let (shutdown_sender, shutdown_receiver) = oneshot::channel::<()>();
		let tls_server_config = match &tls {
			Some(tls) => Some(Arc::new(tls.load()?)),
			None => None,
		};

		let thread = thread::Builder::new()
			.name("api_server".to_string())
			.spawn(move || {
				let runtime = match tokio::runtime::Builder::new_current_thread()
					.enable_all()
					.build()
				{
					Ok(runtime) => runtime,
					Err(e) => {
						error!("api: failed to build runtime: {}", e);
						return;
					}
				};
				let outcome = match tls_server_config {
					Some(tls) => runtime.block_on(serve_tls(addr, router, tls, shutdown_receiver)),
					None => runtime.block_on(serve_plain(addr, router, shutdown_receiver)),
				};
				if let Err(e) = outcome {
					error!("api: server terminated: {}", e);
				}
			})
			.map_err(|e| Error::Internal(format!("failed to spawn api thread: {}", e)))?;

		info!("api: listening on {}", addr);
		Ok(ApiServer {
			shutdown_sender: Some(shutdown_sender),
			thread: Some(thread),
		})
	}

	/// Stop the server and join its thread.
	pub fn stop(mut self) {
		if let Some(sender) = self.shutdown_sender.take() {
			let _ = sender.send(());
		}
		if let Some(thread) = self.thread.take() {
			let _ = thread.join();
		}
	}
}

async fn serve_plain(
	addr: SocketAddr,
	router: Router,
	shutdown: oneshot::Receiver<()>,
) -> Result<(), String> {
	let service = make_service_fn(move |_| {
		let router = router.clone();
		async move {
			Ok::<_, hyper::Error>(service_fn(move |req| {
				let router = router.clone();
				async move { router.handle(req).await }
			}))
		}
	});

	hyper::Server::try_bind(&addr)
		.map_err(|e| format!("bind failed: {}", e))?
		.serve(service)
		.with_graceful_shutdown(async {
			let _ = shutdown.await;
		})
		.await
		.map_err(|e| format!("{}", e))
}

async fn serve_tls(
	addr: SocketAddr,
	router: Router,
	tls: Arc<ServerConfig>,
	shutdown: oneshot::Receiver<()>,
) -> Result<(), String> {
	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.map_err(|e| format!("bind failed: {}", e))?;
	let acceptor = TlsAcceptor::from(tls);
	let mut shutdown = shutdown;

	loop {
		let accepted = tokio::select! {
			_ = &mut shutdown => break,
			accepted = listener.accept() => accepted,
		};
		let (stream, _) = match accepted {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!("api: accept failed: {}", e);
				continue;
			}
		};
		let acceptor = acceptor.clone();
		let router = router.clone();
		tokio::spawn(async move {
			let tls_stream = match acceptor.accept(stream).await {
				Ok(tls_stream) => tls_stream,
				Err(e) => {
					debug!("api: tls handshake failed: {}", e);
					return;
				}
			};
			let service = service_fn(move |req| {
				let router = router.clone();
				async move { router.handle(req).await }
			});
			if let Err(e) = Http::new().serve_connection(tls_stream, service).await {
				debug!("api: connection error: {}", e);
			}
		});
	}
	Ok(())
}

//! # HTTP Server
//!
//! HTTP/1 server built on Hyper and Tokio that feeds requests into an
//! [`Application`].
//!
//! ## Key Features
//!
//! - One task per connection, one chain per request
//! - Graceful shutdown on Ctrl-C with a drain timeout
//! - Body size limit enforced before dispatch (413)

use crate::application::Application;
use crate::error::{Error, Result};
use crate::exception::HttpException;
use crate::request::Request;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{error, info, warn};

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

/// Bind `config.address` and serve until Ctrl-C
///
/// # Errors
///
/// Returns `Error::BindError` when the socket cannot be bound, or an IO
/// error from the accept loop.
pub async fn serve(app: Arc<Application>, config: ServerConfig) -> Result<()> {
    let listener = bind(config.address)?;
    serve_listener(listener, app, config, shutdown_signal()).await
}

/// Bind a listening socket with `SO_REUSEADDR`
///
/// # Errors
///
/// Returns `Error::BindError` naming the address.
pub fn bind(address: SocketAddr) -> Result<TcpListener> {
    let bind_error = |source| Error::BindError {
        address: address.to_string(),
        source,
    };
    let socket = if address.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;
    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(address).map_err(bind_error)?;
    socket.listen(1024).map_err(bind_error)
}

/// Serve connections from `listener` until `shutdown` resolves
///
/// In-flight connections get `config.shutdown_timeout` to finish.
///
/// # Errors
///
/// Returns an IO error when accepting fails.
pub async fn serve_listener<S>(
    listener: TcpListener,
    app: Arc<Application>,
    config: ServerConfig,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Server listening on http://{}", addr);
    }

    let active = Arc::new(AtomicUsize::new(0));
    let max_body_size = config.max_body_size;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, remote_addr) = accept_result?;
                let io = TokioIo::new(stream);
                let app = Arc::clone(&app);
                let active = Arc::clone(&active);
                let keep_alive = config.keep_alive;

                active.fetch_add(1, Ordering::Relaxed);
                tokio::task::spawn(async move {
                    let service = service_fn(move |req| {
                        let app = Arc::clone(&app);
                        async move { handle_request(req, &app, remote_addr, max_body_size).await }
                    });
                    if let Err(err) = http1::Builder::new()
                        .keep_alive(keep_alive)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection: {:?}", err);
                    }
                    active.fetch_sub(1, Ordering::Relaxed);
                });
            }
            () = &mut shutdown => {
                info!("Shutdown signal received, stopping server...");
                break;
            }
        }
    }

    let drain = async {
        while active.load(Ordering::Relaxed) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        warn!(
            open = active.load(Ordering::Relaxed),
            "Shutdown timeout reached with connections still open"
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    app: &Application,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> std::result::Result<hyper::Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let version = req.version();

    let response = match Request::from_hyper_with_limit(req, max_body_size).await {
        Ok(mut request) => {
            request.set_header("x-client-ip", &remote_addr.ip().to_string());
            app.handle(request).await
        }
        Err(e) => {
            warn!("Rejected request {} {}: {}", method, path, e);
            let stub = Request::get(path.clone());
            app.exceptions().render(&stub, HttpException::from(e))
        }
    };

    info!(
        "    {} - \"{} {} {:?}\" {}",
        remote_addr, method, path, version, response.status
    );
    Ok(response.into_hyper())
}

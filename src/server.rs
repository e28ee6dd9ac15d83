//! Hyper host adapter and graceful shutdown.
//!
//! The engine itself never touches sockets. This module is the thin host that
//! accepts connections, collects each request body, runs the engine on the
//! blocking pool (handlers are synchronous and may stream from blocking
//! readers) and answers `404` for anything the engine does not handle.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. Stops accepting new connections.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`].

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::engine::Engine;
use crate::error::Error;
use crate::request::Request;
use crate::response::BufferedResponse;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use tessel::Server;
    /// let server = Server::bind(([0, 0, 0, 0], 3000));
    /// ```
    pub fn bind(addr: impl Into<SocketAddr>) -> Self {
        Self { addr: addr.into() }
    }

    /// Serves `engine` until SIGTERM or Ctrl-C, then drains in-flight
    /// connections.
    pub async fn serve(self, engine: Arc<Engine>) -> Result<(), Error> {
        self.serve_with_shutdown(engine, shutdown_signal()).await
    }

    /// Serves `engine` until `shutdown` resolves.
    pub async fn serve_with_shutdown(
        self,
        engine: Arc<Engine>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_listener(listener, engine, shutdown).await
    }
}

/// Serves `engine` on an already bound listener until `shutdown` resolves.
pub async fn serve_listener(
    listener: TcpListener,
    engine: Arc<Engine>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    info!(addr = %listener.local_addr()?, "tessel listening");

    let mut tasks = tokio::task::JoinSet::new();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // Check shutdown first so a signal stops accepting immediately,
            // even if more connections are queued.
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let engine = Arc::clone(&engine);
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    let svc = service_fn(move |req| {
                        let engine = Arc::clone(&engine);
                        async move { dispatch(engine, req, remote_addr).await }
                    });

                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            // Reap finished connection tasks so the set does not grow without
            // bound on long-running servers.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}

    info!("tessel stopped");
    Ok(())
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the engine. Every failure becomes a response, so
/// hyper never sees an error.
async fn dispatch(
    engine: Arc<Engine>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            return Ok(status_only(StatusCode::BAD_REQUEST));
        }
    };
    let req = Request::from_parts(parts, body);

    let outcome = tokio::task::spawn_blocking(move || {
        let mut res = BufferedResponse::new();
        let outcome = engine.run(&req, &mut res);
        (outcome, res, req)
    })
    .await;

    let response = match outcome {
        Ok((Ok(true), res, _)) => res.into_http(),
        Ok((Ok(false), _, req)) => {
            debug!(method = %req.method(), path = req.uri().path(), "no route");
            status_only(StatusCode::NOT_FOUND)
        }
        Ok((Err(e), res, _)) if e.is_handled() => {
            debug!(peer = %remote_addr, error = %e, "request failed");
            res.into_http()
        }
        Ok((Err(e), _, _)) => {
            warn!(peer = %remote_addr, error = %e, "request not handled");
            status_only(StatusCode::NOT_FOUND)
        }
        Err(e) => {
            error!(peer = %remote_addr, "dispatch task failed: {e}");
            status_only(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    Ok(response)
}

fn status_only(status: StatusCode) -> http::Response<Full<Bytes>> {
    let mut response = http::Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives: SIGTERM or
/// SIGINT on Unix, Ctrl-C elsewhere. A signal that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

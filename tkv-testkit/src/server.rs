//! # Store Server
//!
//! Accept RESP2 connections on an ephemeral localhost port and answer them
//! from a shared in-memory `Store`. Requests on one connection are executed
//! strictly in order, so a blocking pop holds back the commands queued
//! behind it, as it would on the real store.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::frame::{parse_request, Frame};
use crate::store::Store;

/// Background server bound to `127.0.0.1:0`. Stops accepting on drop.
pub struct StoreServer {
    addr: SocketAddr,
    store: Arc<Store>,
    accept: JoinHandle<()>,
}

impl StoreServer {
    /// Binds a fresh store and starts accepting connections.
    pub async fn spawn() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let store = Arc::new(Store::new());

        let shared = store.clone();
        let accept = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        break;
                    }
                };
                let store = shared.clone();
                tokio::spawn(async move {
                    if let Err(err) = serve_stream(stream, store).await {
                        debug!(%peer, error = %err, "connection ended");
                    }
                });
            }
        });

        debug!(%addr, "store server listening");
        Ok(StoreServer { addr, store, accept })
    }

    /// Address in `host:port` form.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Shared handle to the backing store, e.g. to serve it over a
    /// non-TCP stream with `serve_stream`.
    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }
}

impl Drop for StoreServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

/// Serves one client until it disconnects or sends malformed bytes.
pub async fn serve_stream<S>(mut stream: S, store: Arc<Store>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = Vec::with_capacity(1024);

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            return Ok(());
        }

        loop {
            match parse_request(&mut buffer) {
                Ok(Some(args)) => {
                    out.clear();
                    store.dispatch(&args).await.encode(&mut out);
                    stream.write_all(&out).await?;
                }
                Ok(None) => break,
                Err(_) => {
                    stream.write_all(&Frame::err("ERR protocol error").to_vec()).await?;
                    return Ok(());
                }
            }
        }
    }
}

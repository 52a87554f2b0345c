//! # Scripted Server
//!
//! A fake server whose replies come from a test-supplied handler. Every
//! request it reads is also forwarded to the test, so wire arguments can be
//! asserted exactly. Connections share the handler and the request index,
//! which counts requests in the order the server reads them.
//!
//! ```text
//! let mut server = ScriptedServer::spawn(|idx, args| Action::Reply(..)).await?;
//! ... drive the client against server.addr() ...
//! assert_eq!(server.next_command().await, Some(args));
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

use crate::frame::{parse_request, Args, Frame};

/// What the server does with one request.
#[derive(Debug, Clone)]
pub enum Action {
    /// Answer immediately.
    Reply(Frame),
    /// Answer after a pause; later requests wait behind it.
    Delayed(Duration, Frame),
    /// Write raw bytes, e.g. a malformed or split frame.
    Raw(Vec<u8>),
    /// Read the request and never answer it.
    Silent,
    /// Drop the connection without answering.
    Close,
}

/// Fake server listening on `127.0.0.1:0`.
pub struct ScriptedServer {
    addr: SocketAddr,
    commands: mpsc::UnboundedReceiver<Args>,
    task: JoinHandle<()>,
}

impl ScriptedServer {
    /// Starts listening. `handler` is called with the zero-based request
    /// index and the request arguments (command name first).
    pub async fn spawn<H>(handler: H) -> io::Result<Self>
    where
        H: FnMut(usize, &Args) -> Action + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (record, commands) = mpsc::unbounded_channel();
        let script = Arc::new(Mutex::new(Script { next: 0, handler }));

        let task = tokio::spawn(async move {
            // Dropping the set with this task aborts every session.
            let mut sessions = JoinSet::new();
            while let Ok((stream, peer)) = listener.accept().await {
                let (script, record) = (script.clone(), record.clone());
                sessions.spawn(async move {
                    if let Err(err) = serve(stream, script, record).await {
                        debug!(%peer, error = %err, "scripted connection ended");
                    }
                });
            }
        });

        Ok(ScriptedServer { addr, commands, task })
    }

    /// Address in `host:port` form.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Next request the server has read, waiting up to two seconds.
    pub async fn next_command(&mut self) -> Option<Args> {
        tokio::time::timeout(Duration::from_secs(2), self.commands.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next request if one has already been read.
    pub fn try_next_command(&mut self) -> Option<Args> {
        self.commands.try_recv().ok()
    }
}

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Script<H> {
    next: usize,
    handler: H,
}

impl<H: FnMut(usize, &Args) -> Action> Script<H> {
    fn answer(&mut self, args: &Args) -> Action {
        let index = self.next;
        self.next += 1;
        (self.handler)(index, args)
    }
}

async fn serve<H>(mut stream: TcpStream, script: Arc<Mutex<Script<H>>>, record: mpsc::UnboundedSender<Args>) -> io::Result<()>
where
    H: FnMut(usize, &Args) -> Action,
{
    let mut buffer = BytesMut::with_capacity(4 * 1024);

    loop {
        if stream.read_buf(&mut buffer).await? == 0 {
            return Ok(());
        }
        while let Some(args) = parse_request(&mut buffer)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed request"))?
        {
            let action = script.lock().answer(&args);
            let _ = record.send(args);

            match action {
                Action::Reply(frame) => stream.write_all(&frame.to_vec()).await?,
                Action::Delayed(pause, frame) => {
                    tokio::time::sleep(pause).await;
                    stream.write_all(&frame.to_vec()).await?;
                }
                Action::Raw(bytes) => stream.write_all(&bytes).await?,
                Action::Silent => {}
                Action::Close => return Ok(()),
            }
        }
    }
}

//! Host side of the bridge

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use super::codec::{read_frame, write_frame};
use super::protocol::{Handshake, HandshakeReply, Operation, ReplyFrame, Request, RequestFrame, Response};
use crate::error::{Error, Result, TransportError};
use crate::handles::DocumentRef;
use crate::{requests, responses};

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Connection {
    reader: BoxedReader,
    writer: BoxedWriter,
    /// Set while a call is in flight; still set if that call was dropped midway
    in_flight: bool,
}

/// Client stub for one worker connection
///
/// Calls are serialized: one request in flight, replies matched by id.
pub struct RpcClient {
    connection: Mutex<Connection>,
    next_id: AtomicU64,
    engine: String,
    /// Flips to `true` when the peer process is gone
    exited: Option<watch::Receiver<bool>>,
}

impl RpcClient {
    /// Connect to a worker and perform the handshake
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(TransportError::Io)?;
        stream.set_nodelay(true).map_err(TransportError::Io)?;
        Self::handshake(stream).await
    }

    pub async fn handshake<S>(stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::handshake_with(stream, Handshake::current()).await
    }

    /// Handshake with explicit parameters
    pub async fn handshake_with<S>(stream: S, handshake: Handshake) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let mut reader: BoxedReader = BufReader::new(Box::new(read));
        let mut writer: BoxedWriter = Box::new(write);

        write_frame(&mut writer, &handshake).await?;
        let reply: Option<HandshakeReply> = read_frame(&mut reader).await?;

        let engine = match reply {
            Some(HandshakeReply::Accepted { engine }) => engine,
            Some(HandshakeReply::Rejected { reason }) => {
                return Err(TransportError::Handshake(reason).into())
            }
            None => {
                return Err(TransportError::Handshake("connection closed during handshake".into()).into())
            }
        };

        tracing::debug!(engine = %engine, "RPC handshake accepted");
        Ok(Self {
            connection: Mutex::new(Connection {
                reader,
                writer,
                in_flight: false,
            }),
            next_id: AtomicU64::new(1),
            engine,
            exited: None,
        })
    }

    /// Fail calls with [`TransportError::Exited`] once `exited` turns `true`,
    /// including a call that is already waiting for its reply
    pub fn abort_on_exit(mut self, exited: watch::Receiver<bool>) -> Self {
        self.exited = Some(exited);
        self
    }

    fn peer_exited(&self) -> bool {
        self.exited.as_ref().map_or(false, |exited| *exited.borrow())
    }

    /// Engine backend reported by the worker
    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Send one request and wait for its reply
    pub async fn request(&self, call: Request) -> Result<Response> {
        let method = call.method();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.peer_exited() {
            return Err(TransportError::Exited.into());
        }
        let mut conn = self.connection.lock().await;

        if conn.in_flight {
            return Err(TransportError::Protocol(
                "connection out of sync after an abandoned call".into(),
            )
            .into());
        }
        conn.in_flight = true;

        let round_trip = async {
            write_frame(&mut conn.writer, &RequestFrame { id, call }).await?;
            read_frame::<_, ReplyFrame>(&mut conn.reader).await
        };
        let reply = match self.exited.clone() {
            Some(mut exited) => tokio::select! {
                reply = round_trip => reply,
                _ = exited.wait_for(|gone| *gone) => {
                    tracing::debug!(method, id, "Worker exited during call");
                    return Err(TransportError::Exited.into());
                }
            },
            None => round_trip.await,
        };
        let reply = reply?.ok_or_else(|| {
            TransportError::Protocol(format!("connection closed while waiting for {}", method))
        })?;
        conn.in_flight = false;

        if reply.id != id {
            return Err(TransportError::Protocol(format!(
                "reply id {} does not match request id {}",
                reply.id, id
            ))
            .into());
        }

        tracing::trace!(method, id, "RPC reply");
        reply.outcome.map_err(Error::from)
    }

    fn unexpected(method: &str, response: &Response) -> Error {
        TransportError::Protocol(format!("unexpected reply to {}: {:?}", method, response)).into()
    }

    /// Transport-level liveness check; never reaches the engine
    pub async fn control_ping(&self) -> Result<()> {
        match self.request(Request::ControlPing).await? {
            Response::ControlPing => Ok(()),
            other => Err(Self::unexpected("ControlPing", &other)),
        }
    }

    /// Logical liveness check through the instance
    pub async fn ping(&self) -> Result<String> {
        match self.request(Request::Ping).await? {
            Response::Ping(pong) => Ok(pong),
            other => Err(Self::unexpected("Ping", &other)),
        }
    }

    /// Close every document open on the worker
    pub async fn close(&self) -> Result<()> {
        match self.request(Request::Close).await? {
            Response::Close => Ok(()),
            other => Err(Self::unexpected("Close", &other)),
        }
    }

    /// Ask the worker process to exit
    pub async fn shutdown(&self) -> Result<()> {
        match self.request(Request::Shutdown).await? {
            Response::Shutdown => Ok(()),
            other => Err(Self::unexpected("Shutdown", &other)),
        }
    }

    pub async fn open_document(&self, request: requests::OpenDocument) -> Result<responses::OpenDocument> {
        match self.request(Request::OpenDocument(request)).await? {
            Response::OpenDocument(opened) => Ok(opened),
            other => Err(Self::unexpected("OpenDocument", &other)),
        }
    }

    pub async fn close_document(&self, document: DocumentRef) -> Result<()> {
        match self
            .request(Request::CloseDocument(requests::CloseDocument { document }))
            .await?
        {
            Response::CloseDocument(_) => Ok(()),
            other => Err(Self::unexpected("CloseDocument", &other)),
        }
    }

    /// Run a document operation
    pub async fn call<O: Operation>(&self, document: &DocumentRef, request: O) -> Result<O::Response> {
        let response = self.request(request.into_request(document.clone())).await?;
        match O::from_response(response) {
            Some(response) => Ok(response),
            None => Err(TransportError::Protocol(format!("unexpected reply to {}", O::METHOD)).into()),
        }
    }
}

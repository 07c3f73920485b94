//! Worker side of the bridge

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;

use super::codec::{read_frame, write_frame};
use super::for_each_operation;
use super::protocol::{Handshake, HandshakeReply, ReplyFrame, Request, RequestFrame, Response};
use crate::engine::Engine;
use crate::error::{Error, RemoteError, Result};
use crate::instance::Instance;
use crate::responses;

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The peer failed the handshake; nothing was dispatched
    Rejected,
    /// The peer closed or sent garbage before completing the handshake
    Abandoned,
    /// The peer went away
    Disconnected,
    /// The peer asked the worker to exit
    Shutdown,
}

/// Serve one connection until it closes, is rejected or asks for shutdown
pub async fn serve_connection<E, S>(instance: Arc<Instance<E>>, stream: S) -> Result<ServeOutcome>
where
    E: Engine + 'static,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);

    let handshake = match read_frame::<_, Handshake>(&mut reader).await {
        Ok(Some(handshake)) => handshake,
        Ok(None) => return Ok(ServeOutcome::Abandoned),
        Err(e) => {
            tracing::warn!("Dropping connection before handshake: {}", e);
            return Ok(ServeOutcome::Abandoned);
        }
    };
    if let Some(reason) = handshake.rejection() {
        tracing::warn!("Rejecting connection: {}", reason);
        if let Err(e) = write_frame(&mut writer, &HandshakeReply::Rejected { reason }).await {
            tracing::debug!("Failed to send handshake rejection: {}", e);
        }
        return Ok(ServeOutcome::Rejected);
    }
    let accepted = HandshakeReply::Accepted {
        engine: E::NAME.to_string(),
    };
    if let Err(e) = write_frame(&mut writer, &accepted).await {
        tracing::debug!("Peer left during handshake: {}", e);
        return Ok(ServeOutcome::Abandoned);
    }

    loop {
        let Some(RequestFrame { id, call }) = read_frame(&mut reader).await? else {
            return Ok(ServeOutcome::Disconnected);
        };
        let method = call.method();
        tracing::trace!(method, id, "RPC request");

        let (outcome, stop) = match call {
            Request::ControlPing => (Ok(Response::ControlPing), false),
            Request::Shutdown => {
                if !instance.is_closed() {
                    if let Err(e) = instance.close() {
                        tracing::warn!("Error closing instance on shutdown: {}", e);
                    }
                }
                (Ok(Response::Shutdown), true)
            }
            call => (dispatch_blocking(Arc::clone(&instance), call).await, false),
        };

        if let Err(e) = &outcome {
            tracing::debug!(method, "Request failed: {}", e);
        }
        let reply = ReplyFrame {
            id,
            outcome: outcome.map_err(|e| RemoteError::from(&e)),
        };
        write_frame(&mut writer, &reply).await?;

        if stop {
            return Ok(ServeOutcome::Shutdown);
        }
    }
}

/// Accept connections until an accepted peer disconnects or asks for shutdown
///
/// Connections that never complete the handshake do not end the loop.
pub async fn serve<E: Engine + 'static>(listener: TcpListener, instance: Arc<Instance<E>>) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(crate::error::TransportError::Io)?;
        tracing::debug!(%peer, "Accepted connection");

        match serve_connection(Arc::clone(&instance), stream).await? {
            ServeOutcome::Rejected | ServeOutcome::Abandoned => continue,
            outcome => {
                tracing::info!(?outcome, "Connection finished");
                break;
            }
        }
    }

    if !instance.is_closed() {
        instance.close()?;
    }
    Ok(())
}

/// Run a call on the blocking pool; a panic becomes an error reply
async fn dispatch_blocking<E: Engine + 'static>(instance: Arc<Instance<E>>, call: Request) -> Result<Response> {
    let method = call.method();
    match tokio::task::spawn_blocking(move || dispatch(&instance, call)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(method, "Native call panicked: {}", message);
            Err(Error::Engine(format!("{} panicked: {}", method, message)))
        }
        Err(e) => Err(Error::Engine(format!("{} was cancelled: {}", method, e))),
    }
}

fn dispatch<E: Engine>(instance: &Instance<E>, call: Request) -> Result<Response> {
    match call {
        Request::Ping => instance.ping().map(Response::Ping),
        Request::Close => instance.reset().map(|_| Response::Close),
        Request::OpenDocument(request) => instance.open(request).map(Response::OpenDocument),
        Request::CloseDocument(request) => instance
            .close_document(&request.document)
            .map(|_| Response::CloseDocument(responses::CloseDocument {})),
        call => dispatch_operation(instance, call),
    }
}

macro_rules! define_dispatch {
    ($($name:ident => $method:ident,)+) => {
        fn dispatch_operation<E: Engine>(instance: &Instance<E>, call: Request) -> Result<Response> {
            match call {
                $(
                    Request::$name(scoped) => instance
                        .$method(&scoped.document, scoped.request)
                        .map(Response::$name),
                )+
                other => Err(Error::InvalidState(format!(
                    "{} cannot be dispatched to the instance",
                    other.method()
                ))),
            }
        }
    };
}

for_each_operation!(define_dispatch);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::{MemoryDocument, MemoryEngine};
    use crate::error::{NativeError, TransportError};
    use crate::requests::{self, OpenSource};
    use crate::rpc::RpcClient;

    async fn start() -> (RpcClient, tokio::task::JoinHandle<Result<ServeOutcome>>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let instance = Arc::new(Instance::<MemoryEngine>::new());
        let task = tokio::spawn(serve_connection(instance, server));
        (RpcClient::handshake(client).await.unwrap(), task)
    }

    fn sample() -> Vec<u8> {
        MemoryDocument::new()
            .with_page(200.0, 100.0, "alpha beta")
            .to_bytes()
    }

    #[tokio::test]
    async fn test_ping_and_control_ping() {
        let (client, _task) = start().await;
        assert_eq!(client.engine(), "memory");
        client.control_ping().await.unwrap();
        assert_eq!(client.ping().await.unwrap(), "Pong");
    }

    #[tokio::test]
    async fn test_document_operations_over_the_wire() {
        let (client, _task) = start().await;

        let document = client
            .open_document(requests::OpenDocument {
                source: OpenSource::Bytes(sample()),
                password: None,
            })
            .await
            .unwrap()
            .document;

        let count = client
            .call(&document, requests::GetPageCount {})
            .await
            .unwrap();
        assert_eq!(count.page_count, 1);

        let size = client
            .call(&document, requests::GetPageSize { page: 0.into() })
            .await
            .unwrap();
        assert_eq!((size.width, size.height), (200.0, 100.0));

        client.close_document(document.clone()).await.unwrap();
        let err = client
            .call(&document, requests::GetPageCount {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandleNotFound(_)));
    }

    #[tokio::test]
    async fn test_native_errors_keep_their_class() {
        let (client, _task) = start().await;

        let err = client
            .open_document(requests::OpenDocument {
                source: OpenSource::Bytes(b"%PDF-garbage".to_vec()),
                password: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NativeOpen(NativeError::Format)));
    }

    #[tokio::test]
    async fn test_wrong_cookie_is_rejected_before_dispatch() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let instance = Arc::new(Instance::<MemoryEngine>::new());
        let task = tokio::spawn(serve_connection(instance.clone(), server));

        let mut handshake = Handshake::current();
        handshake.magic_cookie = "wrong".into();
        let err = RpcClient::handshake_with(client, handshake).await.err().unwrap();
        assert!(matches!(err, Error::Transport(TransportError::Handshake(_))));

        assert_eq!(task.await.unwrap().unwrap(), ServeOutcome::Rejected);
        assert_eq!(instance.document_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_protocol_version_is_rejected() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let instance = Arc::new(Instance::<MemoryEngine>::new());
        let task = tokio::spawn(serve_connection(instance, server));

        let mut handshake = Handshake::current();
        handshake.protocol_version += 1;
        assert!(RpcClient::handshake_with(client, handshake).await.is_err());
        assert_eq!(task.await.unwrap().unwrap(), ServeOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_stray_connections_do_not_stop_the_listener() {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpStream;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let instance = Arc::new(Instance::<MemoryEngine>::new());
        let server = tokio::spawn(serve(listener, instance.clone()));

        // Closes without a word
        drop(TcpStream::connect(addr).await.unwrap());

        let mut junk = TcpStream::connect(addr).await.unwrap();
        junk.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        drop(junk);

        let mut half = TcpStream::connect(addr).await.unwrap();
        half.write_all(b"{\"protocol_version\"").await.unwrap();
        drop(half);

        let client = RpcClient::connect(addr).await.unwrap();
        assert_eq!(client.ping().await.unwrap(), "Pong");
        assert!(!server.is_finished());

        client.shutdown().await.unwrap();
        server.await.unwrap().unwrap();
        assert!(instance.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_closes_instance() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let instance = Arc::new(Instance::<MemoryEngine>::new());
        let task = tokio::spawn(serve_connection(instance.clone(), server));
        let client = RpcClient::handshake(client).await.unwrap();

        client
            .open_document(requests::OpenDocument {
                source: OpenSource::Bytes(sample()),
                password: None,
            })
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(task.await.unwrap().unwrap(), ServeOutcome::Shutdown);
        assert!(instance.is_closed());
        assert_eq!(instance.document_count(), 0);
    }

    #[tokio::test]
    async fn test_close_releases_documents_but_keeps_worker_usable() {
        let (client, _task) = start().await;
        let document = client
            .open_document(requests::OpenDocument {
                source: OpenSource::Bytes(sample()),
                password: None,
            })
            .await
            .unwrap()
            .document;

        client.close().await.unwrap();
        let err = client
            .call(&document, requests::GetPageCount {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandleNotFound(_)));
        assert_eq!(client.ping().await.unwrap(), "Pong");
    }
}

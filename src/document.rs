//! Document facade
//!
//! [`DocumentPool::open`] borrows a worker, opens the document on it and hands
//! back a [`Document`] bound to that worker until it is closed.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

use crate::config::PoolConfig;
use crate::error::{Error, NativeError, Result};
use crate::handles::DocumentRef;
use crate::pool::{ObjectPool, PoolStats, Pooled};
use crate::requests::{self, OpenSource};
use crate::responses;
use crate::rpc::{for_each_operation, Operation};
use crate::worker::{ProcessHandle, Worker, WorkerFactory};

type Lease = Pooled<WorkerFactory>;

/// Where a document comes from
pub enum DocumentSource {
    Bytes(Vec<u8>),
    /// Opened by the worker itself
    Path(PathBuf),
    /// Read to the end on the caller side before anything is sent
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            DocumentSource::Path(path) => write!(f, "Path({})", path.display()),
            DocumentSource::Reader(_) => f.write_str("Reader"),
        }
    }
}

impl From<Vec<u8>> for DocumentSource {
    fn from(bytes: Vec<u8>) -> Self {
        DocumentSource::Bytes(bytes)
    }
}

impl From<PathBuf> for DocumentSource {
    fn from(path: PathBuf) -> Self {
        DocumentSource::Path(path)
    }
}

impl DocumentSource {
    async fn into_open_source(self) -> Result<OpenSource> {
        match self {
            DocumentSource::Bytes(bytes) => Ok(OpenSource::Bytes(bytes)),
            DocumentSource::Path(path) => Ok(OpenSource::Path(path)),
            DocumentSource::Reader(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes).await.map_err(|e| {
                    tracing::warn!("Failed to read document source: {}", e);
                    Error::NativeOpen(NativeError::File)
                })?;
                Ok(OpenSource::Bytes(bytes))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub password: Option<String>,
    /// Overrides the pool's borrow timeout
    pub borrow_timeout: Option<Duration>,
}

impl OpenOptions {
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout = Some(timeout);
        self
    }
}

/// Pool of worker processes that documents are opened on
#[derive(Clone)]
pub struct DocumentPool {
    pool: ObjectPool<WorkerFactory>,
    borrow_timeout: Duration,
}

impl DocumentPool {
    /// Validate the configuration, start `min_idle` workers and the maintenance task
    pub async fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let pool = ObjectPool::new(WorkerFactory::new(&config), config.object_pool_config());
        pool.ensure_min_idle().await?;
        pool.start_maintenance();

        tracing::info!(
            min_idle = config.min_idle,
            max_idle = config.max_idle,
            max_total = config.max_total,
            "Document pool started"
        );
        Ok(Self {
            pool,
            borrow_timeout: config.borrow_timeout,
        })
    }

    /// Open a document on a borrowed worker
    pub async fn open(&self, source: impl Into<DocumentSource>, options: OpenOptions) -> Result<Document> {
        let source = source.into().into_open_source().await?;
        let timeout = options.borrow_timeout.unwrap_or(self.borrow_timeout);
        let lease = self.pool.borrow(timeout).await?;
        self.open_on(lease, source, options.password).await
    }

    /// Like [`Self::open`]; the wait for a worker ends early when `cancel` completes
    pub async fn open_with_cancel<C>(
        &self,
        source: impl Into<DocumentSource>,
        options: OpenOptions,
        cancel: C,
    ) -> Result<Document>
    where
        C: Future<Output = ()>,
    {
        let source = source.into().into_open_source().await?;
        let timeout = options.borrow_timeout.unwrap_or(self.borrow_timeout);
        let lease = self.pool.borrow_with_cancel(timeout, cancel).await?;
        self.open_on(lease, source, options.password).await
    }

    async fn open_on(&self, lease: Lease, source: OpenSource, password: Option<String>) -> Result<Document> {
        let opened = lease
            .client()
            .open_document(requests::OpenDocument { source, password })
            .await;

        match opened {
            Ok(opened) => {
                tracing::debug!(pid = ?lease.pid(), document = %opened.document, "Document opened");
                Ok(Document {
                    pool: self.pool.clone(),
                    process: lease.process().clone(),
                    lease: Mutex::new(Some(lease)),
                    closed: AtomicBool::new(false),
                    document: opened.document,
                })
            }
            Err(e) => {
                self.pool.give_back(lease).await;
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop idle workers and refuse further opens
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Document pool closed");
    }
}

/// An open document bound to one worker
///
/// Every call is forwarded to that worker. [`Document::close`] gives the
/// worker back; dropping the document does the same in a background task.
pub struct Document {
    pool: ObjectPool<WorkerFactory>,
    /// Held outside `lease`, which stays locked for the length of a call
    process: ProcessHandle,
    lease: Mutex<Option<Lease>>,
    closed: AtomicBool,
    document: DocumentRef,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("document", &self.document)
            .finish()
    }
}

impl Document {
    pub fn reference(&self) -> &DocumentRef {
        &self.document
    }

    /// OS process id of the bound worker
    pub fn worker_pid(&self) -> Option<u32> {
        self.process.pid()
    }

    /// Forward any document operation to the bound worker
    pub async fn call<O: Operation>(&self, request: O) -> Result<O::Response> {
        let lease = self.lease.lock().await;
        let worker = Self::bound(&lease)?;
        worker.client().call(&self.document, request).await
    }

    fn bound(lease: &Option<Lease>) -> Result<&Worker> {
        lease
            .as_deref()
            .ok_or_else(|| Error::InvalidState("document is closed".into()))
    }

    /// Close the document and return its worker to the pool
    ///
    /// The worker goes back even when the remote close fails; that error is
    /// still reported.
    pub async fn close(&self) -> Result<()> {
        let Some(lease) = self.lease.lock().await.take() else {
            return Err(Error::InvalidState("document is already closed".into()));
        };
        self.closed.store(true, Ordering::SeqCst);

        let closed = lease.client().close().await;
        if let Err(e) = &closed {
            tracing::warn!(document = %self.document, "Error closing document: {}", e);
        }
        self.pool.give_back(lease).await;
        closed
    }

    /// Force-terminate the bound worker; the pool discards it on return
    ///
    /// Does not wait for a call in progress. That call fails with
    /// [`TransportError::Exited`](crate::error::TransportError::Exited).
    pub async fn kill(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("document is closed".into()));
        }
        tracing::warn!(document = %self.document, pid = ?self.process.pid(), "Killing worker");
        self.process.kill().await;
        Ok(())
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        let Some(lease) = self.lease.get_mut().take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let pool = self.pool.clone();
                runtime.spawn(async move {
                    if let Err(e) = lease.client().close().await {
                        tracing::debug!("Error closing dropped document: {}", e);
                    }
                    pool.give_back(lease).await;
                });
            }
            Err(_) => {
                tracing::warn!(document = %self.document, "Document dropped outside a runtime, discarding its worker");
                drop(lease);
            }
        }
    }
}

macro_rules! document_methods {
    ($($name:ident => $method:ident,)+) => {
        impl Document {
            $(
                pub async fn $method(&self, request: requests::$name) -> Result<responses::$name> {
                    self.call(request).await
                }
            )+
        }
    };
}

for_each_operation!(document_methods);

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_is_drained_on_the_caller_side() {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(&b"%MEMDOC-1\n{}"[..]);
        match DocumentSource::Reader(reader).into_open_source().await.unwrap() {
            OpenSource::Bytes(bytes) => assert_eq!(bytes, b"%MEMDOC-1\n{}"),
            other => panic!("expected bytes, got {:?}", other),
        }
    }

    #[test]
    fn test_open_options() {
        let options = OpenOptions::default()
            .password("secret")
            .borrow_timeout(Duration::from_millis(10));
        assert_eq!(options.password.as_deref(), Some("secret"));
        assert_eq!(options.borrow_timeout, Some(Duration::from_millis(10)));
    }

    #[cfg(unix)]
    mod with_worker {
        use super::*;
        use std::sync::Arc;

        use tokio::io::BufReader;
        use tokio::net::TcpListener;

        use crate::engine::memory::MemoryDocument;
        use crate::error::TransportError;
        use crate::rpc::codec::{read_frame, write_frame};
        use crate::rpc::protocol::{HandshakeReply, ReplyFrame, RequestFrame};
        use crate::rpc::{Request, Response};
        use crate::worker::tests::{announcing, fake_worker_command};

        /// Answers health checks and opens, never replies to anything else
        async fn stalling_worker() -> std::net::SocketAddr {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                let (read, mut writer) = tokio::io::split(stream);
                let mut reader = BufReader::new(read);

                let _: Option<crate::rpc::protocol::Handshake> = read_frame(&mut reader).await.unwrap();
                let accepted = HandshakeReply::Accepted {
                    engine: "stalling".into(),
                };
                write_frame(&mut writer, &accepted).await.unwrap();

                while let Ok(Some(RequestFrame { id, call })) = read_frame(&mut reader).await {
                    let response = match call {
                        Request::ControlPing => Response::ControlPing,
                        Request::Ping => Response::Ping("Pong".into()),
                        Request::Close => Response::Close,
                        Request::OpenDocument(_) => Response::OpenDocument(responses::OpenDocument {
                            document: DocumentRef::new("stalled".into()),
                        }),
                        _ => std::future::pending().await,
                    };
                    let reply = ReplyFrame {
                        id,
                        outcome: Ok(response),
                    };
                    if write_frame(&mut writer, &reply).await.is_err() {
                        break;
                    }
                }
            });
            addr
        }

        async fn pool() -> DocumentPool {
            DocumentPool::new(PoolConfig {
                command: fake_worker_command().await,
                close_timeout: Duration::from_millis(200),
                borrow_timeout: Duration::from_secs(5),
                maintenance_interval: Duration::ZERO,
                ..Default::default()
            })
            .await
            .unwrap()
        }

        #[tokio::test]
        async fn test_open_call_close() {
            let pool = pool().await;
            assert_eq!(pool.stats().idle, 1);

            let bytes = MemoryDocument::new()
                .with_page(100.0, 50.0, "one")
                .with_page(100.0, 50.0, "two")
                .to_bytes();
            let document = pool.open(bytes, OpenOptions::default()).await.unwrap();
            assert_eq!(pool.stats().active, 1);

            let count = document.get_page_count(requests::GetPageCount {}).await.unwrap();
            assert_eq!(count.page_count, 2);

            document.close().await.unwrap();
            assert_eq!(pool.stats().idle, 1);
            assert_eq!(pool.stats().active, 0);

            // Second close does not touch the pool
            assert!(matches!(document.close().await, Err(Error::InvalidState(_))));
            assert!(matches!(
                document.get_page_count(requests::GetPageCount {}).await,
                Err(Error::InvalidState(_))
            ));
            assert_eq!(pool.stats().idle, 1);
        }

        #[tokio::test]
        async fn test_kill_interrupts_a_hung_call() {
            let pool = DocumentPool::new(PoolConfig {
                command: announcing(stalling_worker().await),
                close_timeout: Duration::from_millis(200),
                borrow_timeout: Duration::from_secs(5),
                maintenance_interval: Duration::ZERO,
                ..Default::default()
            })
            .await
            .unwrap();
            let document = Arc::new(pool.open(b"any".to_vec(), OpenOptions::default()).await.unwrap());

            let hung = {
                let document = document.clone();
                tokio::spawn(async move { document.get_page_count(requests::GetPageCount {}).await })
            };
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(!hung.is_finished());

            tokio::time::timeout(Duration::from_secs(2), document.kill())
                .await
                .unwrap()
                .unwrap();
            let result = tokio::time::timeout(Duration::from_secs(2), hung)
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(result, Err(Error::Transport(TransportError::Exited))));

            // The dead worker is discarded on return
            assert!(document.close().await.is_err());
            assert_eq!(pool.stats().destroyed, 1);
            assert_eq!(pool.stats().active, 0);
            assert!(matches!(document.kill().await, Err(Error::InvalidState(_))));
        }

        #[tokio::test]
        async fn test_failed_open_returns_the_worker() {
            let pool = pool().await;
            let err = pool
                .open(b"not a document".to_vec(), OpenOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::NativeOpen(NativeError::Format)));
            assert_eq!(pool.stats().idle, 1);
            assert_eq!(pool.stats().destroyed, 0);
        }
    }
}

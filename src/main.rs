//! pdf-worker
//!
//! Hosts one engine instance behind the RPC server. Started by the pool with
//! the magic cookie in its environment; prints its address on stdout and
//! logs to stderr.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pdf_worker_pool::config::{EngineKind, WorkerSettings};
use pdf_worker_pool::engine::memory::MemoryEngine;
use pdf_worker_pool::engine::Engine;
use pdf_worker_pool::rpc::protocol::{announce_line, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE};
use pdf_worker_pool::rpc::server::serve;
use pdf_worker_pool::Instance;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var(MAGIC_COOKIE_KEY).ok().as_deref() != Some(MAGIC_COOKIE_VALUE) {
        eprintln!(
            "This binary is a worker process for pdf-worker-pool and is not meant to be run directly.\n\
             It is started by a DocumentPool, which passes the expected {} value.",
            MAGIC_COOKIE_KEY
        );
        std::process::exit(1);
    }

    // stdout carries the announce line, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_worker_pool=info,pdf_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();

    let settings = WorkerSettings::from_args(std::env::args().skip(1))?;
    match settings.engine {
        EngineKind::Memory => run::<MemoryEngine>().await,
        #[cfg(feature = "mupdf")]
        EngineKind::Mupdf => run::<pdf_worker_pool::engine::mupdf::MupdfEngine>().await,
        #[cfg(not(feature = "mupdf"))]
        EngineKind::Mupdf => anyhow::bail!("this worker was built without the mupdf feature"),
    }
}

async fn run<E: Engine + 'static>() -> anyhow::Result<()> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    let instance = Arc::new(Instance::<E>::new());

    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", announce_line(addr))?;
        stdout.flush()?;
    }
    tracing::info!(%addr, engine = E::NAME, pid = std::process::id(), "Worker listening");

    serve(listener, instance).await?;

    tracing::info!("Worker exiting");
    Ok(())
}

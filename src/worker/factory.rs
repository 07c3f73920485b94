use std::time::Duration;

use async_trait::async_trait;

use super::{Worker, WorkerState};
use crate::config::{LogCallback, PoolConfig, WorkerCommand};
use crate::error::Result;
use crate::pool::PooledObjectFactory;

/// Creates, health-checks and disposes of worker processes for the pool
pub struct WorkerFactory {
    command: WorkerCommand,
    close_timeout: Duration,
    log_callback: Option<LogCallback>,
}

impl WorkerFactory {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            command: config.command.clone(),
            close_timeout: config.close_timeout,
            log_callback: config.log_callback.clone(),
        }
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    fn report(&self, worker: &Worker, message: &str) {
        tracing::warn!(pid = ?worker.pid(), "{}", message);
        if let Some(callback) = &self.log_callback {
            callback(message);
        }
    }

    /// Exit check, then transport ping, then a ping through the instance
    async fn check(&self, worker: &mut Worker) -> std::result::Result<(), String> {
        if worker.exited() {
            return Err("Worker exited".to_string());
        }

        let deadline = self.close_timeout;
        match tokio::time::timeout(deadline, worker.client().control_ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(format!("Error on RPC ping: {}", e)),
            Err(_) => return Err(format!("Error on RPC ping: no reply within {:?}", deadline)),
        }

        match tokio::time::timeout(deadline, worker.client().ping()).await {
            Ok(Ok(pong)) if pong == "Pong" => Ok(()),
            Ok(Ok(other)) => Err(format!("Error on worker ping: unexpected reply {:?}", other)),
            Ok(Err(e)) => Err(format!("Error on worker ping: {}", e)),
            Err(_) => Err(format!("Error on worker ping: no reply within {:?}", deadline)),
        }
    }
}

#[async_trait]
impl PooledObjectFactory for WorkerFactory {
    type Object = Worker;

    async fn make(&self) -> Result<Worker> {
        let mut worker = Worker::spawn(&self.command).await?;
        worker.set_state(WorkerState::Validating);
        Ok(worker)
    }

    async fn validate(&self, worker: &mut Worker) -> bool {
        match self.check(worker).await {
            Ok(()) => true,
            Err(message) => {
                self.report(worker, &message);
                if worker.state() != WorkerState::Exited {
                    worker.set_state(WorkerState::Invalid);
                }
                false
            }
        }
    }

    async fn activate(&self, worker: &mut Worker) {
        worker.set_state(WorkerState::Borrowed);
    }

    async fn passivate(&self, worker: &mut Worker) {
        worker.set_state(WorkerState::Idle);
    }

    async fn destroy(&self, worker: Worker) {
        tracing::debug!(pid = ?worker.pid(), state = ?worker.state(), "Destroying worker");
        worker.close(self.close_timeout).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use tokio::net::TcpListener;

    use crate::engine::memory::MemoryEngine;
    use crate::instance::Instance;
    use crate::rpc::server::serve;
    use crate::worker::tests::{announcing, fake_worker_command};

    async fn factory() -> (WorkerFactory, Arc<Mutex<Vec<String>>>) {
        factory_for(fake_worker_command().await)
    }

    fn factory_for(command: WorkerCommand) -> (WorkerFactory, Arc<Mutex<Vec<String>>>) {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = messages.clone();
        let config = PoolConfig {
            command,
            close_timeout: Duration::from_millis(500),
            ..Default::default()
        }
        .with_log_callback(move |message| sink.lock().unwrap().push(message.to_string()));
        (WorkerFactory::new(&config), messages)
    }

    #[tokio::test]
    async fn test_healthy_worker_validates() {
        let (factory, messages) = factory().await;
        let mut worker = factory.make().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Validating);

        assert!(factory.validate(&mut worker).await);
        factory.activate(&mut worker).await;
        assert_eq!(worker.state(), WorkerState::Borrowed);
        assert!(messages.lock().unwrap().is_empty());

        factory.destroy(worker).await;
    }

    #[tokio::test]
    async fn test_exited_worker_fails_validation() {
        let (factory, messages) = factory().await;
        let mut worker = factory.make().await.unwrap();

        worker.kill().await.unwrap();
        assert!(!factory.validate(&mut worker).await);
        assert_eq!(worker.state(), WorkerState::Exited);
        assert_eq!(messages.lock().unwrap().as_slice(), ["Worker exited"]);
    }

    #[tokio::test]
    async fn test_lost_connection_fails_rpc_ping() {
        let (factory, messages) = factory().await;
        let mut worker = factory.make().await.unwrap();

        // The server goes away but the process keeps running
        worker.client().shutdown().await.unwrap();
        assert!(!factory.validate(&mut worker).await);
        assert_eq!(worker.state(), WorkerState::Invalid);
        assert!(messages.lock().unwrap()[0].starts_with("Error on RPC ping"));

        factory.destroy(worker).await;
    }

    #[tokio::test]
    async fn test_closed_instance_fails_worker_ping() {
        // Transport answers, the instance behind it does not
        let instance = Arc::new(Instance::<MemoryEngine>::new());
        instance.close().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, instance));

        let (factory, messages) = factory_for(announcing(addr));
        let mut worker = factory.make().await.unwrap();
        assert!(!factory.validate(&mut worker).await);
        assert_eq!(worker.state(), WorkerState::Invalid);
        assert!(messages.lock().unwrap()[0].starts_with("Error on worker ping"));

        factory.destroy(worker).await;
    }
}

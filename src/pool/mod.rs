//! Generic object pool
//!
//! Bounded, health-checked pool of expensive objects (worker processes).
//!
//! # Accounting
//!
//! ```text
//! total = idle + borrowed + being created + being destroyed  ≤ max_total
//! ```
//!
//! Every object outside the idle list is owned together with a [`Slot`].
//! Dropping the slot gives its unit of `total` back and wakes blocked
//! borrowers, so a borrow future dropped halfway through creation or
//! validation never leaks capacity.
//!
//! # Borrow
//!
//! ```text
//! borrow() ─┬─ idle? ──▶ validate ──ok──▶ activate ──▶ Pooled
//!           │               └─fail──▶ destroy, loop
//!           ├─ room? ──▶ make ──▶ validate ──ok──▶ activate ──▶ Pooled
//!           │                        └─fail──▶ destroy, Transport error
//!           └─ full  ──▶ wait for a return (deadline / cancel)
//! ```

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{CapacityError, Error, Result, TransportError};

/// Lifecycle hooks for pooled objects
#[async_trait]
pub trait PooledObjectFactory: Send + Sync + 'static {
    type Object: Send + 'static;

    async fn make(&self) -> Result<Self::Object>;

    /// Health check; `false` discards the object
    async fn validate(&self, object: &mut Self::Object) -> bool;

    /// Called before an object is handed to a borrower
    async fn activate(&self, _object: &mut Self::Object) {}

    /// Called before an object goes back to the idle list
    async fn passivate(&self, _object: &mut Self::Object) {}

    async fn destroy(&self, object: Self::Object);
}

/// Sizing and validation policy
#[derive(Debug, Clone)]
pub struct ObjectPoolConfig {
    pub min_idle: usize,
    pub max_idle: usize,
    pub max_total: usize,
    pub test_on_create: bool,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    /// Period of the idle top-up/trim task; `None` disables it
    pub maintenance_interval: Option<Duration>,
}

impl Default for ObjectPoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_idle: 1,
            max_total: 1,
            test_on_create: true,
            test_on_borrow: true,
            test_on_return: true,
            maintenance_interval: Some(Duration::from_secs(1)),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Objects ever created
    pub created: u64,
    /// Objects ever destroyed
    pub destroyed: u64,
    /// Live objects that are not idle
    pub active: usize,
    pub idle: usize,
    pub max_total: usize,
}

struct PoolState<T> {
    /// LIFO: the most recently returned object is borrowed first
    idle: Vec<T>,
    total: usize,
    closed: bool,
    created: u64,
    destroyed: u64,
}

struct Inner<F: PooledObjectFactory> {
    factory: F,
    config: ObjectPoolConfig,
    state: Mutex<PoolState<F::Object>>,
    notify: Notify,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl<F: PooledObjectFactory> Drop for Inner<F> {
    fn drop(&mut self) {
        if let Some(task) = self.maintenance.get_mut().take() {
            task.abort();
        }
    }
}

/// One unit of `total`, released on drop unless the object went back to idle
struct Slot<F: PooledObjectFactory> {
    inner: Arc<Inner<F>>,
    armed: bool,
}

impl<F: PooledObjectFactory> Slot<F> {
    /// Claim a new unit of capacity; the caller has checked `total < max_total`
    fn reserve(inner: &Arc<Inner<F>>, state: &mut PoolState<F::Object>) -> Self {
        state.total += 1;
        Self {
            inner: Arc::clone(inner),
            armed: true,
        }
    }

    /// Take over the unit of an object leaving the idle list
    fn adopt(inner: &Arc<Inner<F>>) -> Self {
        Self {
            inner: Arc::clone(inner),
            armed: true,
        }
    }

    /// The object is idle again and keeps its unit
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<F: PooledObjectFactory> Drop for Slot<F> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().total -= 1;
            self.inner.notify.notify_waiters();
        }
    }
}

/// A borrowed object
///
/// Give it back with [`ObjectPool::give_back`]. Dropping it instead frees its
/// capacity but skips the factory's `destroy` hook.
pub struct Pooled<F: PooledObjectFactory> {
    object: F::Object,
    slot: Slot<F>,
}

impl<F: PooledObjectFactory> Deref for Pooled<F> {
    type Target = F::Object;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl<F: PooledObjectFactory> DerefMut for Pooled<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.object
    }
}

enum Step<F: PooledObjectFactory> {
    Idle(F::Object, Slot<F>),
    Create(Slot<F>),
    Wait,
}

/// Bounded pool of objects made by `F`
pub struct ObjectPool<F: PooledObjectFactory> {
    inner: Arc<Inner<F>>,
}

impl<F: PooledObjectFactory> Clone for ObjectPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: PooledObjectFactory> ObjectPool<F> {
    pub fn new(factory: F, config: ObjectPoolConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    total: 0,
                    closed: false,
                    created: 0,
                    destroyed: 0,
                }),
                notify: Notify::new(),
                maintenance: Mutex::new(None),
            }),
        }
    }

    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    pub fn config(&self) -> &ObjectPoolConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            created: state.created,
            destroyed: state.destroyed,
            active: state.total - state.idle.len(),
            idle: state.idle.len(),
            max_total: self.inner.config.max_total,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Borrow an object, waiting at most `timeout` for one to become available
    pub async fn borrow(&self, timeout: Duration) -> Result<Pooled<F>> {
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, self.borrow_loop()).await {
            Ok(result) => result,
            Err(_) => Err(CapacityError::Timeout(timeout).into()),
        }
    }

    /// Like [`Self::borrow`], abandoned with `Capacity(Cancelled)` if `cancel` completes first
    pub async fn borrow_with_cancel<C>(&self, timeout: Duration, cancel: C) -> Result<Pooled<F>>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => Err(CapacityError::Cancelled.into()),
            result = self.borrow(timeout) => result,
        }
    }

    async fn borrow_loop(&self) -> Result<Pooled<F>> {
        let factory = &self.inner.factory;
        let config = &self.inner.config;

        loop {
            // Register for wakeups before looking, so a return between the
            // check and the await is not missed.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(Error::PoolClosed);
                }
                if let Some(object) = state.idle.pop() {
                    Step::Idle(object, Slot::adopt(&self.inner))
                } else if state.total < config.max_total {
                    Step::Create(Slot::reserve(&self.inner, &mut state))
                } else {
                    Step::Wait
                }
            };

            match step {
                Step::Idle(mut object, slot) => {
                    if config.test_on_borrow && !factory.validate(&mut object).await {
                        tracing::debug!("Idle object failed validation on borrow, discarding");
                        self.discard(object, slot).await;
                        continue;
                    }
                    factory.activate(&mut object).await;
                    return Ok(Pooled { object, slot });
                }
                Step::Create(slot) => {
                    let mut object = factory.make().await?;
                    self.inner.state.lock().created += 1;

                    if config.test_on_create && !factory.validate(&mut object).await {
                        self.discard(object, slot).await;
                        return Err(TransportError::PingFailed(
                            "newly created object failed validation".into(),
                        )
                        .into());
                    }
                    factory.activate(&mut object).await;
                    return Ok(Pooled { object, slot });
                }
                Step::Wait => notified.await,
            }
        }
    }

    /// Return a borrowed object
    ///
    /// It goes back to the idle list if it still validates and there is room
    /// under `max_idle`; otherwise it is destroyed.
    pub async fn give_back(&self, pooled: Pooled<F>) {
        let Pooled { mut object, slot } = pooled;
        let factory = &self.inner.factory;

        if self.is_closed() {
            self.discard(object, slot).await;
            return;
        }

        if self.inner.config.test_on_return && !factory.validate(&mut object).await {
            tracing::debug!("Returned object failed validation, discarding");
            self.discard(object, slot).await;
            return;
        }
        factory.passivate(&mut object).await;

        let rejected = {
            let mut state = self.inner.state.lock();
            if !state.closed && state.idle.len() < self.inner.config.max_idle {
                state.idle.push(object);
                None
            } else {
                Some(object)
            }
        };

        match rejected {
            None => {
                slot.disarm();
                self.inner.notify.notify_waiters();
            }
            Some(object) => self.discard(object, slot).await,
        }
    }

    /// Destroy an object, then release its capacity
    async fn discard(&self, object: F::Object, slot: Slot<F>) {
        self.inner.factory.destroy(object).await;
        self.inner.state.lock().destroyed += 1;
        drop(slot);
    }

    /// Create idle objects until `min_idle` is reached or `max_total` is hit
    pub async fn ensure_min_idle(&self) -> Result<()> {
        let config = &self.inner.config;
        loop {
            let slot = {
                let mut state = self.inner.state.lock();
                if state.closed
                    || state.idle.len() >= config.min_idle
                    || state.total >= config.max_total
                {
                    return Ok(());
                }
                Slot::reserve(&self.inner, &mut state)
            };

            let mut object = self.inner.factory.make().await?;
            self.inner.state.lock().created += 1;
            if config.test_on_create && !self.inner.factory.validate(&mut object).await {
                self.discard(object, slot).await;
                return Err(TransportError::PingFailed(
                    "newly created object failed validation".into(),
                )
                .into());
            }
            self.inner.factory.passivate(&mut object).await;

            let rejected = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    Some(object)
                } else {
                    state.idle.push(object);
                    None
                }
            };
            match rejected {
                None => {
                    slot.disarm();
                    self.inner.notify.notify_waiters();
                }
                Some(object) => {
                    self.discard(object, slot).await;
                    return Ok(());
                }
            }
        }
    }

    /// Destroy the oldest idle objects above `max_idle`
    pub async fn trim_idle(&self) {
        loop {
            let object = {
                let mut state = self.inner.state.lock();
                if state.idle.len() <= self.inner.config.max_idle {
                    return;
                }
                state.idle.remove(0)
            };
            let slot = Slot::adopt(&self.inner);
            self.discard(object, slot).await;
        }
    }

    /// One maintenance pass
    pub async fn maintain(&self) {
        self.trim_idle().await;
        if let Err(e) = self.ensure_min_idle().await {
            tracing::warn!("Failed to keep minimum idle objects: {}", e);
        }
    }

    /// Start the periodic maintenance task, if configured
    ///
    /// The task holds a weak reference and ends with the pool.
    pub fn start_maintenance(&self) {
        let Some(period) = self.inner.config.maintenance_interval else {
            return;
        };
        let weak: Weak<Inner<F>> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let pool = ObjectPool { inner };
                if pool.is_closed() {
                    break;
                }
                pool.maintain().await;
            }
        });

        if let Some(previous) = self.inner.maintenance.lock().replace(task) {
            previous.abort();
        }
    }

    /// Destroy idle objects and refuse further borrows
    ///
    /// Borrowed objects are destroyed when they come back.
    pub async fn close(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        if let Some(task) = self.inner.maintenance.lock().take() {
            task.abort();
        }
        self.inner.notify.notify_waiters();

        for object in idle {
            let slot = Slot::adopt(&self.inner);
            self.discard(object, slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Counted {
        id: usize,
        healthy: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct CountingFactory {
        made: AtomicUsize,
        destroyed: AtomicUsize,
        make_delay: Option<Duration>,
        broken_on_create: AtomicBool,
    }

    #[async_trait]
    impl PooledObjectFactory for Arc<CountingFactory> {
        type Object = Counted;

        async fn make(&self) -> Result<Counted> {
            if let Some(delay) = self.make_delay {
                tokio::time::sleep(delay).await;
            }
            let id = self.made.fetch_add(1, Ordering::SeqCst);
            let healthy = !self.broken_on_create.load(Ordering::SeqCst);
            Ok(Counted {
                id,
                healthy: Arc::new(AtomicBool::new(healthy)),
            })
        }

        async fn validate(&self, object: &mut Counted) -> bool {
            object.healthy.load(Ordering::SeqCst)
        }

        async fn destroy(&self, _object: Counted) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(factory: &Arc<CountingFactory>, min_idle: usize, max_idle: usize, max_total: usize) -> ObjectPool<Arc<CountingFactory>> {
        ObjectPool::new(
            Arc::clone(factory),
            ObjectPoolConfig {
                min_idle,
                max_idle,
                max_total,
                maintenance_interval: None,
                ..Default::default()
            },
        )
    }

    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_borrowed_never_exceeds_max_total() {
        let factory = Arc::new(CountingFactory::default());
        let pool = pool(&factory, 0, 3, 3);
        let borrowed = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..20).map(|_| {
            let pool = pool.clone();
            let borrowed = borrowed.clone();
            let peak = peak.clone();
            async move {
                let object = pool.borrow(LONG).await.unwrap();
                let now = borrowed.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                borrowed.fetch_sub(1, Ordering::SeqCst);
                pool.give_back(object).await;
            }
        });
        futures::future::join_all(tasks).await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(factory.made.load(Ordering::SeqCst) <= 3);
        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert!(stats.idle <= 3);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let factory = Arc::new(CountingFactory::default());
        let pool = pool(&factory, 0, 1, 1);
        let _held = pool.borrow(LONG).await.unwrap();

        let err = pool.borrow(Duration::from_millis(50)).await.err().unwrap();
        assert!(matches!(err, Error::Capacity(CapacityError::Timeout(_))));
        assert_eq!(pool.stats().active, 1);
    }

    #[tokio::test]
    async fn test_blocked_borrow_resumes_on_return() {
        let factory = Arc::new(CountingFactory::default());
        let pool = pool(&factory, 0, 1, 1);
        let held = pool.borrow(LONG).await.unwrap();
        let first_id = held.id;

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow(LONG).await.map(|p| p.id) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.give_back(held).await;
        assert_eq!(waiter.await.unwrap().unwrap(), first_id);
        assert_eq!(factory.made.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_return_is_destroyed() {
        let factory = Arc::new(CountingFactory::default());
        let pool = pool(&factory, 0, 1, 1);

        let object = pool.borrow(LONG).await.unwrap();
        object.healthy.store(false, Ordering::SeqCst);
        pool.give_back(object).await;

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.destroyed, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_idle_is_replaced_on_borrow() {
        let factory = Arc::new(CountingFactory::default());
        let pool = pool(&factory, 0, 1, 1);

        let object = pool.borrow(LONG).await.unwrap();
        let health = object.healthy.clone();
        pool.give_back(object).await;
        assert_eq!(pool.stats().idle, 1);

        // Breaks while idle
        health.store(false, Ordering::SeqCst);

        let replacement = pool.borrow(LONG).await.unwrap();
        assert_eq!(replacement.id, 1);
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_create_validation_is_transport_error() {
        let factory = Arc::new(CountingFactory::default());
        factory.broken_on_create.store(true, Ordering::SeqCst);
        let pool = pool(&factory, 0, 1, 1);

        let err = pool.borrow(LONG).await.err().unwrap();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(factory.made.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn test_return_above_max_idle_is_destroyed() {
        let factory = Arc::new(CountingFactory::default());
        let pool = pool(&factory, 0, 1, 3);

        let a = pool.borrow(LONG).await.unwrap();
        let b = pool.borrow(LONG).await.unwrap();
        let c = pool.borrow(LONG).await.unwrap();
        pool.give_back(a).await;
        pool.give_back(b).await;
        pool.give_back(c).await;

        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.destroyed, 2);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_cancelled_borrow() {
        let factory = Arc::new(CountingFactory::default());
        let pool = pool(&factory, 0, 1, 1);
        let _held = pool.borrow(LONG).await.unwrap();

        let err = pool
            .borrow_with_cancel(LONG, async {})
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Capacity(CapacityError::Cancelled)));
        assert_eq!(pool.stats().active, 1);
    }

    #[tokio::test]
    async fn test_dropped_creation_releases_capacity() {
        let factory = Arc::new(CountingFactory {
            make_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let pool = pool(&factory, 0, 1, 1);

        let err = pool.borrow(Duration::from_millis(20)).await.err().unwrap();
        assert!(matches!(err, Error::Capacity(CapacityError::Timeout(_))));
        assert_eq!(pool.stats().active, 0);

        // Capacity is available again
        assert!(pool.borrow(LONG).await.is_ok());
    }

    #[tokio::test]
    async fn test_min_idle_and_trim() {
        let factory = Arc::new(CountingFactory::default());
        let pool = pool(&factory, 2, 2, 4);

        pool.ensure_min_idle().await.unwrap();
        assert_eq!(pool.stats().idle, 2);

        let a = pool.borrow(LONG).await.unwrap();
        let b = pool.borrow(LONG).await.unwrap();
        pool.maintain().await;
        assert_eq!(pool.stats().idle, 2);
        assert_eq!(pool.stats().active, 2);
        drop((a, b));
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn test_maintenance_task_tops_up() {
        let factory = Arc::new(CountingFactory::default());
        let pool = ObjectPool::new(
            Arc::clone(&factory),
            ObjectPoolConfig {
                min_idle: 2,
                max_idle: 2,
                max_total: 2,
                maintenance_interval: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        );
        pool.start_maintenance();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.stats().idle, 2);
    }

    #[tokio::test]
    async fn test_close_rejects_borrowers() {
        let factory = Arc::new(CountingFactory::default());
        let pool = pool(&factory, 0, 1, 1);
        let held = pool.borrow(LONG).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.borrow(LONG).await.err() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.close().await;
        assert!(matches!(waiter.await.unwrap(), Some(Error::PoolClosed)));

        pool.give_back(held).await;
        assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
        assert!(matches!(pool.borrow(LONG).await.err(), Some(Error::PoolClosed)));
    }
}

//! Channel pool with round-robin dispatch.
//!
//! A pool is either empty (disconnected) or holds every channel of the current
//! connection; [`ConnectionPool::install`] swaps the whole set at once so
//! callers never observe a partially filled pool.

use crate::error::PoolError;

use models::Target;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::{Request, Response};
use log::{debug, trace};
use tonic::body::Body;
use tonic::transport::Channel;
use tower::{BoxError, Service, ServiceExt};

#[derive(Debug)]
pub struct PooledChannel {
    id: usize,
    channel: Channel,
    ready: AtomicBool,
}

impl PooledChannel {
    fn new(id: usize, channel: Channel) -> Self {
        Self {
            id,
            channel,
            ready: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether the last call through this channel reached the transport.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        let was_ready = self.ready.swap(ready, Ordering::AcqRel);
        if was_ready != ready {
            debug!(
                "Pooled channel {} is now {}",
                self.id,
                if ready { "ready" } else { "not ready" }
            );
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    channels: Vec<Arc<PooledChannel>>,
    next: usize,
    target: Option<Target>,
}

#[derive(Debug, Default)]
pub struct ConnectionPool {
    inner: Mutex<PoolInner>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pool contents. Returns the new size.
    pub fn install(&self, target: Target, channels: Vec<Channel>) -> usize {
        let mut inner = self.lock();
        inner.channels = channels
            .into_iter()
            .enumerate()
            .map(|(id, channel)| Arc::new(PooledChannel::new(id, channel)))
            .collect();
        inner.next = 0;
        inner.target = if inner.channels.is_empty() {
            None
        } else {
            Some(target)
        };
        inner.channels.len()
    }

    /// Drop every channel. Returns how many were held.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.channels.len();
        inner.channels.clear();
        inner.next = 0;
        inner.target = None;
        count
    }

    /// Next ready channel in rotation, or any channel when none is ready.
    pub fn pick(&self) -> Option<Arc<PooledChannel>> {
        let mut inner = self.lock();
        let count = inner.channels.len();
        if count == 0 {
            return None;
        }

        let start = inner.next % count;
        let index = (0..count)
            .map(|offset| (start + offset) % count)
            .find(|&index| inner.channels[index].is_ready())
            .unwrap_or(start);

        inner.next = (index + 1) % count;
        trace!("Picked pooled channel {index} of {count}");
        Some(Arc::clone(&inner.channels[index]))
    }

    pub fn len(&self) -> usize {
        self.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().channels.is_empty()
    }

    pub fn target(&self) -> Option<Target> {
        self.lock().target.clone()
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tower service that sends each request over the next pooled channel.
#[derive(Debug, Clone)]
pub struct PoolDispatch {
    pool: Arc<ConnectionPool>,
}

impl PoolDispatch {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }
}

impl Service<Request<Body>> for PoolDispatch {
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is awaited per channel inside `call`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let picked = self.pool.pick();

        Box::pin(async move {
            let pooled = picked.ok_or_else(|| Box::new(PoolError::empty()) as BoxError)?;
            let mut channel = pooled.channel();

            let ready = match channel.ready().await {
                Ok(ready) => ready,
                Err(e) => {
                    pooled.set_ready(false);
                    return Err(e.into());
                }
            };

            let result = ready.call(request).await;
            pooled.set_ready(result.is_ok());
            result.map_err(Into::into)
        })
    }
}

//! A pool of producers sharing one dispatch channel.
//!
//! [`ProducerPool`] owns one [`Producer`] per endpoint and exactly as many
//! [`Put`] handles. Handles live in a bounded supply channel that acts as a
//! token ring:
//!
//! - A caller of [`ProducerPool::put`] takes a handle out of the supply,
//!   waiting if every handle is borrowed. This caps the number of in-flight
//!   submissions at the number of producers and pushes back on callers
//!   beyond that.
//! - The handle sends the job on the shared dispatch channel, where the first
//!   idle producer claims it.
//! - The handle goes back into the supply when the call finishes, fails, or
//!   is dropped.
//!
//! [`ProducerPool::stop`] runs once; further calls return immediately. A
//! request still sitting in the dispatch channel once every producer is gone
//! is answered with [`Error::PoolStopped`].


use crate::{
    Error, Options, Producer, Put, PutParams, Result,
    request::{DispatchReceiver, DispatchSender, dispatch_channel},
};
use bytes::Bytes;
use core::ops::Deref;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};

/// Spreads `put` requests over a fixed set of broker connections.
pub struct ProducerPool {
    producers: Mutex<Vec<Producer>>,
    dispatch: DispatchSender,
    unclaimed: DispatchReceiver,
    put_tokens: async_channel::Sender<Put>,
    put_supply: async_channel::Receiver<Put>,
    size: usize,
    stopped: AtomicBool,
}

impl ProducerPool {
    /// Connects one producer per endpoint and starts them.
    ///
    /// Endpoints are dialled in order. Listing the same address twice opens
    /// two connections to it.
    ///
    /// # Errors
    ///
    /// - [`Error::NoEndpoints`] if `endpoints` is empty.
    /// - The first [`Error::Connect`] encountered. Producers connected before
    ///   the failure were never started; they are dropped and their
    ///   connections closed.
    pub async fn new<I, S>(endpoints: I, options: Options) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = options.sanitize();
        let endpoints: Vec<String> = endpoints.into_iter().map(Into::into).collect();
        if endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }

        let size = endpoints.len();
        let (dispatch, dispatch_rx) = dispatch_channel();
        let (put_tokens, put_supply) = async_channel::bounded(size);
        let mut producers = Vec::with_capacity(size);

        for endpoint in endpoints {
            let producer = Producer::connect(endpoint, dispatch_rx.clone(), options).await?;
            producers.push(producer);

            if put_tokens
                .try_send(Put::new(dispatch.clone()))
                .is_err()
            {
                return Err(Error::ChannelError {
                    context: "put supply rejected a handle".to_string(),
                });
            }
        }

        for producer in &mut producers {
            producer.start();
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Producer pool started with {size} connections");

        Ok(Self {
            producers: Mutex::new(producers),
            dispatch,
            unclaimed: dispatch_rx,
            put_tokens,
            put_supply,
            size,
            stopped: AtomicBool::new(false),
        })
    }

    /// Inserts a job into `tube` and returns the id the broker assigned.
    ///
    /// Waits for a free request handle when `size()` submissions are already
    /// in flight. No ordering is guaranteed between concurrent calls.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future gives the handle back at once, even if a
    /// producer has already claimed the job. The producer still completes
    /// that exchange and discards the id, so the job may be inserted, and the
    /// next caller's request waits in the dispatch channel until a producer
    /// frees up. The pool never loses capacity to abandoned calls, at the
    /// price of briefly admitting one request more than there are idle
    /// connections.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolStopped`] if [`ProducerPool::stop`] has been called,
    ///   including while this call was waiting for a handle or a producer.
    /// - Whatever the serving producer reports, unchanged. See [`Put::request`].
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(tube = tube)))]
    pub async fn put(&self, tube: &str, body: impl Into<Bytes>, params: PutParams) -> Result<u64> {
        if self.is_stopped() {
            return Err(Error::PoolStopped);
        }

        let put = self.acquire().await?;
        match put.request(tube, body.into(), params).await {
            Err(Error::ChannelError { .. } | Error::RequestCancelled) if self.is_stopped() => {
                Err(Error::PoolStopped)
            }
            result => result,
        }
    }

    /// Stops every producer and discards them.
    ///
    /// Only the first call does any work. Requests already claimed by a
    /// producer are completed unless the producer outlives
    /// [`Options::stop_timeout`]. Callers still waiting for a handle, or whose
    /// request was never claimed, receive [`Error::PoolStopped`].
    pub async fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            #[cfg(feature = "tracing")]
            tracing::debug!("Producer pool already stopped");
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Stopping producer pool");

        self.put_tokens.close();
        self.dispatch.close();

        let producers = core::mem::take(&mut *self.producers.lock());
        futures::future::join_all(producers.into_iter().map(Producer::stop)).await;

        // Producers that were aborted leave their queued requests behind.
        while let Ok(request) = self.unclaimed.try_recv() {
            let _ = request.response.send(Err(Error::PoolStopped));
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Producer pool stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Number of connections the pool was built with.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Producers still owned by the pool. Zero once stopped.
    pub fn producer_count(&self) -> usize {
        self.producers.lock().len()
    }

    /// Request handles not currently borrowed by a `put` call.
    pub fn idle_handles(&self) -> usize {
        self.put_supply.len()
    }

    async fn acquire(&self) -> Result<PutGuard<'_>> {
        let put = self
            .put_supply
            .recv()
            .await
            .map_err(|_| Error::PoolStopped)?;

        Ok(PutGuard {
            put,
            supply: &self.put_tokens,
        })
    }
}

impl core::fmt::Debug for ProducerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProducerPool")
            .field("size", &self.size)
            .field("idle_handles", &self.idle_handles())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// A borrowed [`Put`] that returns itself to the supply on drop.
struct PutGuard<'a> {
    put: Put,
    supply: &'a async_channel::Sender<Put>,
}

impl Deref for PutGuard<'_> {
    type Target = Put;

    fn deref(&self) -> &Put {
        &self.put
    }
}

impl Drop for PutGuard<'_> {
    fn drop(&mut self) {
        // A handle is only a dispatch sender, so the supply gets a copy and
        // the borrowed one is dropped with the guard. The supply has room for
        // every handle; this only fails once the pool is stopped.
        let _ = self.supply.try_send(self.put.clone());
    }
}

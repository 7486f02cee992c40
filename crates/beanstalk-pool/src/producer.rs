//! Connection workers servicing the shared dispatch channel.
//!
//! A [`Producer`] owns one broker connection. Once started, its servicing
//! loop pulls [`PutRequest`]s from the dispatch channel it shares with every
//! other producer of the pool, performs the `put` exchange and answers the
//! request. Idle producers compete for the next request, so work flows to
//! whichever connection is free.
//!
//! A producer drops its connection after a connection-level error and dials
//! the broker again when the next request arrives.

use crate::{
    Options, Result,
    conn::Connection,
    request::{DispatchReceiver, PutRequest},
};
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

/// One broker connection and the task that services it.
pub struct Producer {
    endpoint: String,
    dispatch: DispatchReceiver,
    options: Options,
    conn: Option<Connection>,
    shutdown_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Producer {
    /// Connects to `endpoint` and binds the producer to `dispatch`.
    ///
    /// The producer does not consume requests until [`Producer::start`] is
    /// called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`](crate::Error::Connect) if the broker cannot be reached within
    /// [`Options::connect_timeout`].
    pub async fn connect(
        endpoint: impl Into<String>,
        dispatch: DispatchReceiver,
        options: Options,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        let options = options.sanitize();
        let conn = Connection::connect(&endpoint, options).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!("Connected to {endpoint}");

        Ok(Self {
            endpoint,
            dispatch,
            options,
            conn: Some(conn),
            shutdown_token: CancellationToken::new(),
            task: None,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub const fn is_started(&self) -> bool {
        self.task.is_some()
    }

    /// Spawns the servicing loop on the current Tokio runtime.
    ///
    /// Calling `start` on a producer that is already running does nothing.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        self.task = Some(tokio::spawn(worker_loop(
            self.endpoint.clone(),
            self.conn.take(),
            self.dispatch.clone(),
            self.options,
            self.shutdown_token.clone(),
        )));
    }

    /// Stops servicing and releases the connection.
    ///
    /// A request already being executed is allowed to finish. If the loop does
    /// not exit within [`Options::stop_timeout`] it is aborted. Shutdown
    /// problems are logged, never returned.
    pub async fn stop(mut self) {
        self.shutdown_token.cancel();

        let Some(mut task) = self.task.take() else {
            // Never started: the connection is still ours to close.
            if let Some(conn) = self.conn.take() {
                conn.close().await;
            }
            return;
        };

        match timeout(self.options.stop_timeout, &mut task).await {
            Ok(Ok(())) => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Producer {} stopped", self.endpoint);
            }
            Ok(Err(_e)) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Producer {} task failed: {_e}", self.endpoint);
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Producer {} did not stop within {:?}, aborting",
                    self.endpoint,
                    self.options.stop_timeout
                );
                task.abort();
            }
        }
    }
}

/// Servicing loop of a started [`Producer`].
///
/// Runs until the dispatch channel is closed and drained, or the producer's
/// shutdown token is cancelled while it waits for work. A request that has
/// been received is always answered.
async fn worker_loop(
    endpoint: String,
    mut conn: Option<Connection>,
    dispatch: DispatchReceiver,
    options: Options,
    shutdown_token: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Producer {endpoint} started");

    loop {
        let request = tokio::select! {
            biased;
            request = dispatch.recv() => match request {
                Ok(request) => request,
                Err(_) => break,
            },
            () = shutdown_token.cancelled() => break,
        };

        let PutRequest {
            tube,
            body,
            params,
            response,
        } = request;

        let result = match conn.as_mut() {
            Some(c) => c.put(&tube, &body, &params).await,
            None => match Connection::connect(&endpoint, options).await {
                Ok(c) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!("Reconnected to {endpoint}");
                    conn.insert(c).put(&tube, &body, &params).await
                }
                Err(e) => Err(e),
            },
        };

        if let Err(e) = &result {
            if e.is_connection_error() {
                #[cfg(feature = "tracing")]
                tracing::warn!("Dropping connection to {endpoint}: {e}");
                conn = None;
            }
        }

        if response.send(result).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Submitter for tube {tube:?} went away before the reply");
        }
    }

    if let Some(conn) = conn {
        conn.close().await;
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Producer {endpoint} stopped");
}

impl core::fmt::Debug for Producer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Producer")
            .field("endpoint", &self.endpoint)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

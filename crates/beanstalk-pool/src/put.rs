use crate::{
    Error, PutParams, Result, proto,
    request::{DispatchSender, PutRequest},
};
use bytes::Bytes;
use tokio::sync::oneshot;

/// A reusable request handle.
///
/// A `Put` is not bound to any connection: each call to [`Put::request`]
/// hands the job to the shared dispatch channel, where the first idle
/// producer picks it up. The handle keeps no per-call state, so the same
/// handle can serve any number of sequential submissions.
///
/// Timeouts belong to the producer's connection; a `Put` waits for as long
/// as the producer takes to answer.
#[derive(Debug, Clone)]
pub struct Put {
    dispatch: DispatchSender,
}

impl Put {
    pub const fn new(dispatch: DispatchSender) -> Self {
        Self { dispatch }
    }

    /// Submits one job and waits for the broker-assigned id.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `tube` is not a valid tube name; no
    ///   producer is involved in that case.
    /// - [`Error::ChannelError`] if the dispatch channel is closed.
    /// - [`Error::RequestCancelled`] if the producer dropped the request.
    /// - Any error the producer reports for the exchange, unchanged.
    pub async fn request(&self, tube: &str, body: Bytes, params: PutParams) -> Result<u64> {
        proto::validate_tube(tube)?;

        let (response, rx) = oneshot::channel();
        let request = PutRequest {
            tube: tube.to_string(),
            body,
            params,
            response,
        };

        if self.dispatch.send(request).await.is_err() {
            return Err(Error::ChannelError {
                context: "dispatch channel closed".to_string(),
            });
        }

        rx.await.map_err(|_| Error::RequestCancelled)?
    }
}

//! Messages travelling over the shared dispatch channel.

use crate::{PutParams, Result};
use bytes::Bytes;
use tokio::sync::oneshot;

/// One job submission on its way to whichever [`Producer`](crate::Producer)
/// claims it first.
///
/// The producer answers through `response`; if the submitter has given up,
/// the answer is dropped.
#[derive(Debug)]
pub struct PutRequest {
    pub(crate) tube: String,
    pub(crate) body: Bytes,
    pub(crate) params: PutParams,
    pub(crate) response: oneshot::Sender<Result<u64>>,
}

pub type DispatchSender = async_channel::Sender<PutRequest>;
pub type DispatchReceiver = async_channel::Receiver<PutRequest>;

/// Creates the channel shared by all request handles and producers of a pool.
///
/// Capacity is one: a request is handed off to an idle producer rather than
/// queued behind a busy one.
pub fn dispatch_channel() -> (DispatchSender, DispatchReceiver) {
    async_channel::bounded(1)
}

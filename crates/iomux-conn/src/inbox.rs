use bytes::Bytes;
use tokio::sync::mpsc;

use crate::options::InboxPolicy;

/// Outcome of handing a payload to an inbox without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    Full,
    Closed,
}

/// Producer side, held by the connection table and fed by the demux loop.
#[derive(Debug, Clone)]
pub(crate) enum InboxSender {
    Unbounded(mpsc::UnboundedSender<Bytes>),
    Bounded(mpsc::Sender<Bytes>),
}

/// Consumer side, owned by the virtual connection.
#[derive(Debug)]
pub(crate) enum InboxReceiver {
    Unbounded(mpsc::UnboundedReceiver<Bytes>),
    Bounded(mpsc::Receiver<Bytes>),
}

pub(crate) fn channel(policy: InboxPolicy) -> (InboxSender, InboxReceiver) {
    match policy {
        InboxPolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (InboxSender::Unbounded(tx), InboxReceiver::Unbounded(rx))
        }
        InboxPolicy::Bounded(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (InboxSender::Bounded(tx), InboxReceiver::Bounded(rx))
        }
    }
}

impl InboxSender {
    pub(crate) fn deliver(&self, chunk: Bytes) -> Delivery {
        match self {
            InboxSender::Unbounded(tx) => match tx.send(chunk) {
                Ok(()) => Delivery::Queued,
                Err(_) => Delivery::Closed,
            },
            InboxSender::Bounded(tx) => match tx.try_send(chunk) {
                Ok(()) => Delivery::Queued,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
        }
    }
}

impl InboxReceiver {
    pub(crate) async fn recv(&mut self) -> Option<Bytes> {
        match self {
            InboxReceiver::Unbounded(rx) => rx.recv().await,
            InboxReceiver::Bounded(rx) => rx.recv().await,
        }
    }
}

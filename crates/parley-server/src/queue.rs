//! FIFO of outbound messages between a session's producers and its emit loop.

use parley_types::OutboundMessage;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// The emit loop has gone away; the message was discarded.
#[derive(Debug, Error)]
#[error("outbound queue is closed")]
pub struct QueueClosed;

/// Result of waiting on the queue for one poll interval.
#[derive(Debug, PartialEq, Eq)]
pub enum Recv {
    Message(OutboundMessage),
    TimedOut,
    /// Every sender is gone and the queue is drained.
    Closed,
}

#[derive(Debug, Clone)]
enum Tx {
    Bounded(mpsc::Sender<OutboundMessage>),
    Unbounded(mpsc::UnboundedSender<OutboundMessage>),
}

#[derive(Debug)]
enum Rx {
    Bounded(mpsc::Receiver<OutboundMessage>),
    Unbounded(mpsc::UnboundedReceiver<OutboundMessage>),
}

/// Producer half. Cloning shares the same queue.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: Tx,
}

/// Consumer half, owned by the session's emit loop.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: Rx,
}

/// Creates a queue; `None` means unbounded.
pub fn outbound_queue(capacity: Option<usize>) -> (OutboundSender, OutboundReceiver) {
    match capacity {
        Some(cap) => {
            let (tx, rx) = mpsc::channel(cap.max(1));
            (
                OutboundSender { tx: Tx::Bounded(tx) },
                OutboundReceiver { rx: Rx::Bounded(rx) },
            )
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                OutboundSender {
                    tx: Tx::Unbounded(tx),
                },
                OutboundReceiver {
                    rx: Rx::Unbounded(rx),
                },
            )
        }
    }
}

impl OutboundSender {
    /// Enqueues `message`, waiting for room when the queue is bounded and full.
    pub async fn push(&self, message: OutboundMessage) -> Result<(), QueueClosed> {
        match &self.tx {
            Tx::Bounded(tx) => tx.send(message).await.map_err(|_| QueueClosed),
            Tx::Unbounded(tx) => tx.send(message).map_err(|_| QueueClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Tx::Bounded(tx) => tx.is_closed(),
            Tx::Unbounded(tx) => tx.is_closed(),
        }
    }
}

impl OutboundReceiver {
    /// Waits up to `timeout` for the next message.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Recv {
        let next = async {
            match &mut self.rx {
                Rx::Bounded(rx) => rx.recv().await,
                Rx::Unbounded(rx) => rx.recv().await,
            }
        };
        match tokio::time::timeout(timeout, next).await {
            Ok(Some(message)) => Recv::Message(message),
            Ok(None) => Recv::Closed,
            Err(_) => Recv::TimedOut,
        }
    }

    /// Stops accepting messages; anything still queued is dropped with the receiver.
    pub fn close(&mut self) {
        match &mut self.rx {
            Rx::Bounded(rx) => rx.close(),
            Rx::Unbounded(rx) => rx.close(),
        }
    }
}

//! Single-consumer job queues with an explicit stop marker.
//!
//! Many fetch tasks push into the same queue, so the queue is never closed by
//! dropping senders. The pipeline sends [`Message::Stop`] once every producer
//! has finished, and from then on every push is rejected.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::refresh::PipelineError;

/// What travels over a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T> {
    Item(T),
    Stop,
}

/// Producer side of a queue. Cheap to clone; all clones share the stopped flag.
///
/// Pushes and the stop marker are sent while holding that flag's lock, so no
/// item can ever land behind `Stop`.
#[derive(Debug)]
pub struct QueueSender<T> {
    name: &'static str,
    tx: mpsc::UnboundedSender<Message<T>>,
    stopped: Arc<Mutex<bool>>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

/// Consumer side of a queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::UnboundedReceiver<Message<T>>,
}

pub fn queue<T>(name: &'static str) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        QueueSender {
            name,
            tx,
            stopped: Arc::new(Mutex::new(false)),
        },
        QueueReceiver { rx },
    )
}

impl<T> QueueSender<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.stopped.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue an item. Fails once the queue has been stopped or its consumer is gone.
    pub fn push(&self, item: T) -> Result<(), PipelineError> {
        let stopped = self.lock();
        if *stopped {
            return Err(PipelineError::QueueStopped { queue: self.name });
        }
        self.tx
            .send(Message::Item(item))
            .map_err(|_| PipelineError::ConsumerGone { queue: self.name })
    }

    /// Send the stop marker. Only the first call has any effect.
    pub fn stop(&self) -> Result<(), PipelineError> {
        let mut stopped = self.lock();
        if *stopped {
            return Ok(());
        }
        *stopped = true;
        self.tx
            .send(Message::Stop)
            .map_err(|_| PipelineError::ConsumerGone { queue: self.name })
    }

    pub fn is_stopped(&self) -> bool {
        *self.lock()
    }
}

impl<T> QueueReceiver<T> {
    /// Wait for the next message. A queue whose senders all vanished reads as `Stop`.
    pub async fn recv(&mut self) -> Message<T> {
        self.rx.recv().await.unwrap_or(Message::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_items_arrive_in_order_then_stop() {
        let (tx, mut rx) = queue::<u32>("numbers");
        tx.push(1).unwrap();
        tx.clone().push(2).unwrap();
        tx.stop().unwrap();

        assert_eq!(rx.recv().await, Message::Item(1));
        assert_eq!(rx.recv().await, Message::Item(2));
        assert_eq!(rx.recv().await, Message::Stop);
    }

    #[tokio::test]
    async fn test_push_after_stop_is_rejected() {
        let (tx, _rx) = queue::<u32>("numbers");
        let producer = tx.clone();
        tx.stop().unwrap();

        assert!(producer.is_stopped());
        assert!(matches!(
            producer.push(3),
            Err(PipelineError::QueueStopped { queue: "numbers" })
        ));
    }

    #[tokio::test]
    async fn test_push_without_consumer_is_rejected() {
        let (tx, rx) = queue::<u32>("numbers");
        drop(rx);
        assert!(matches!(
            tx.push(1),
            Err(PipelineError::ConsumerGone { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_is_sent_once() {
        let (tx, mut rx) = queue::<u32>("numbers");
        tx.stop().unwrap();
        tx.stop().unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Message::Stop);
        assert!(matches!(
            rx.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_no_item_lands_behind_stop() {
        let (tx, mut rx) = queue::<u64>("numbers");
        let accepted: u64 = std::thread::scope(|scope| {
            let producers: Vec<_> = (0..4)
                .map(|_| {
                    let tx = tx.clone();
                    scope.spawn(move || {
                        let mut accepted = 0u64;
                        while tx.push(1).is_ok() {
                            accepted += 1;
                        }
                        accepted
                    })
                })
                .collect();
            std::thread::sleep(std::time::Duration::from_millis(20));
            tx.stop().unwrap();
            producers.into_iter().map(|p| p.join().unwrap()).sum()
        });

        let mut received = 0u64;
        loop {
            match rx.rx.try_recv() {
                Ok(Message::Item(n)) => received += n,
                Ok(Message::Stop) => break,
                Err(e) => panic!("queue ended without a stop marker: {e}"),
            }
        }
        assert_eq!(received, accepted);
        assert!(rx.rx.try_recv().is_err());
    }
}

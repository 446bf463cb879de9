use super::{Delivery, JobQueue, QueueConsumer, QueueError};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// In-process queue. Not durable; used for single-node setups and tests.
pub struct MemoryQueue<J> {
    tx: UnboundedSender<J>,
    rx: Mutex<Option<UnboundedReceiver<J>>>,
}

impl<J> MemoryQueue<J> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl<J> Default for MemoryQueue<J> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<J> JobQueue<J> for MemoryQueue<J>
where
    J: Send + 'static,
{
    async fn enqueue(&self, job: J) -> Result<(), QueueError> {
        self.tx.send(job).map_err(|_| QueueError::Closed)
    }

    async fn enqueue_delayed(&self, job: J, delay: Duration) -> Result<(), QueueError> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).is_err() {
                tracing::warn!("Delayed job dropped, queue is closed");
            }
        });
        Ok(())
    }

    async fn consumer(&self) -> Result<Box<dyn QueueConsumer<J>>, QueueError> {
        let rx = self
            .rx
            .lock()
            .map_err(|_| QueueError::Closed)?
            .take()
            .ok_or(QueueError::ConsumerTaken)?;
        Ok(Box::new(MemoryConsumer { rx }))
    }
}

struct MemoryConsumer<J> {
    rx: UnboundedReceiver<J>,
}

#[async_trait]
impl<J> QueueConsumer<J> for MemoryConsumer<J>
where
    J: Send + 'static,
{
    async fn next(&mut self) -> Option<Result<Delivery<J>, QueueError>> {
        self.rx.recv().await.map(|job| Ok(Delivery::new(job)))
    }
}

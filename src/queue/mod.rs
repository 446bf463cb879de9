//! Durable job queues carrying log lines and DNS checks between producers and workers.
//!
//! Payloads cross a process boundary here, so everything a worker needs (including
//! pipeline context values) must be inside the job itself.

use async_trait::async_trait;
use std::time::Duration;

mod amqp;
mod memory;

pub use amqp::AmqpQueue;
pub use memory::MemoryQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("publish error: {0}")]
    Publish(String),
    #[error("consume error: {0}")]
    Consume(String),
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("consumer already taken")]
    ConsumerTaken,
    #[error("queue closed")]
    Closed,
}

enum Acknowledger {
    Noop,
    Amqp(lapin::acker::Acker),
}

/// A job handed to a worker. Ack once handled; unacked AMQP jobs are redelivered.
pub struct Delivery<J> {
    pub job: J,
    acker: Acknowledger,
}

impl<J> Delivery<J> {
    pub fn new(job: J) -> Self {
        Self {
            job,
            acker: Acknowledger::Noop,
        }
    }

    fn amqp(job: J, acker: lapin::acker::Acker) -> Self {
        Self {
            job,
            acker: Acknowledger::Amqp(acker),
        }
    }

    pub async fn ack(self) -> Result<(), QueueError> {
        match self.acker {
            Acknowledger::Noop => Ok(()),
            Acknowledger::Amqp(acker) => acker
                .ack(lapin::options::BasicAckOptions::default())
                .await
                .map(|_| ())
                .map_err(|err| QueueError::Consume(format!("ack failed {:?}", err))),
        }
    }
}

#[async_trait]
pub trait JobQueue<J>: Send + Sync
where
    J: Send + 'static,
{
    async fn enqueue(&self, job: J) -> Result<(), QueueError>;

    /// Make `job` visible to consumers only after `delay` has elapsed.
    async fn enqueue_delayed(&self, job: J, delay: Duration) -> Result<(), QueueError>;

    /// Attach a consumer. Jobs are delivered in FIFO order.
    async fn consumer(&self) -> Result<Box<dyn QueueConsumer<J>>, QueueError>;
}

#[async_trait]
pub trait QueueConsumer<J>: Send
where
    J: Send,
{
    /// `None` once the queue is gone.
    async fn next(&mut self) -> Option<Result<Delivery<J>, QueueError>>;
}

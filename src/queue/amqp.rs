use super::{Delivery, JobQueue, QueueConsumer, QueueError};
use async_trait::async_trait;
use deadpool_lapin::{Config, CreatePoolError, Object, Pool, Runtime};
use futures_util::StreamExt;
use lapin::options::*;
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Consumer};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::OnceCell;

const PERSISTENT: u8 = 2;

/// RabbitMQ backed queue.
///
/// Jobs go to a durable queue on the default exchange as persistent messages.
/// Delayed jobs are parked in `<queue>.delay` with a per-message TTL and dead-lettered
/// back into the work queue once it expires.
pub struct AmqpQueue<J> {
    pool: Pool,
    queue: String,
    declared: OnceCell<()>,
    _job: PhantomData<fn() -> J>,
}

impl<J> std::fmt::Debug for AmqpQueue<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpQueue").field("queue", &self.queue).finish()
    }
}

impl<J> AmqpQueue<J> {
    pub fn try_new(url: String, queue: impl Into<String>) -> Result<Self, QueueError> {
        let mut cfg = Config::default();
        cfg.url = Some(url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|err| {
            tracing::error!("{:?}", err);

            match err {
                CreatePoolError::Config(_) => QueueError::Connection("config error".to_string()),
                CreatePoolError::Build(_) => QueueError::Connection("build error".to_string()),
            }
        })?;

        Ok(Self {
            pool,
            queue: queue.into(),
            declared: OnceCell::new(),
            _job: PhantomData,
        })
    }

    fn delay_queue(&self) -> String {
        format!("{}.delay", self.queue)
    }

    async fn get_connection(&self) -> Result<Object, QueueError> {
        self.pool.get().await.map_err(|err| {
            let msg = format!("getting connection from pool {:?}", err);
            tracing::error!(msg);
            QueueError::Connection(msg)
        })
    }

    async fn create_channel(&self) -> Result<Channel, QueueError> {
        let channel = self
            .get_connection()
            .await?
            .create_channel()
            .await
            .map_err(|err| {
                let msg = format!("creating RabbitMQ channel {:?}", err);
                tracing::error!(msg);
                QueueError::Connection(msg)
            })?;

        self.declared
            .get_or_try_init(|| self.declare(&channel))
            .await?;

        Ok(channel)
    }

    async fn declare(&self, channel: &Channel) -> Result<(), QueueError> {
        let durable = QueueDeclareOptions {
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: false,
            nowait: false,
        };

        channel
            .queue_declare(&self.queue, durable, FieldTable::default())
            .await
            .map_err(|err| QueueError::Connection(format!("declaring {} {:?}", self.queue, err)))?;

        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString("".into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.queue.clone().into()),
        );
        channel
            .queue_declare(&self.delay_queue(), durable, args)
            .await
            .map_err(|err| {
                QueueError::Connection(format!("declaring {} {:?}", self.delay_queue(), err))
            })?;

        tracing::debug!(queue = %self.queue, "Declared durable queues");
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
        properties: BasicProperties,
    ) -> Result<(), QueueError> {
        self.create_channel()
            .await?
            .basic_publish(
                "",
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties.with_delivery_mode(PERSISTENT),
            )
            .await
            .map_err(|err| {
                tracing::error!("publishing message {:?}", err);
                QueueError::Publish(format!("publishing message {:?}", err))
            })?
            .await
            .map(|_| ())
            .map_err(|err| {
                let msg = format!("confirming the publication {:?}", err);
                tracing::error!(msg);
                QueueError::Publish(msg)
            })
    }
}

#[async_trait]
impl<J> JobQueue<J> for AmqpQueue<J>
where
    J: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn enqueue(&self, job: J) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&job)?;
        self.publish(&self.queue, payload, BasicProperties::default())
            .await
    }

    async fn enqueue_delayed(&self, job: J, delay: Duration) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&job)?;
        let expiration = ShortString::from(delay.as_millis().to_string());
        self.publish(
            &self.delay_queue(),
            payload,
            BasicProperties::default().with_expiration(expiration),
        )
        .await
    }

    async fn consumer(&self) -> Result<Box<dyn QueueConsumer<J>>, QueueError> {
        let channel = self.create_channel().await?;

        // one unacked job at a time keeps delivery FIFO for a single worker
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|err| QueueError::Consume(format!("basic qos {:?}", err)))?;

        let tag = format!("dockhand-{}", uuid::Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &self.queue,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| QueueError::Consume(format!("basic consume {:?}", err)))?;

        tracing::info!(queue = %self.queue, consumer_tag = %tag, "Consuming queue");

        Ok(Box::new(AmqpConsumer {
            consumer,
            _channel: channel,
            _job: PhantomData,
        }))
    }
}

struct AmqpConsumer<J> {
    consumer: Consumer,
    _channel: Channel,
    _job: PhantomData<fn() -> J>,
}

#[async_trait]
impl<J> QueueConsumer<J> for AmqpConsumer<J>
where
    J: DeserializeOwned + Send + 'static,
{
    async fn next(&mut self) -> Option<Result<Delivery<J>, QueueError>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(err) => return Some(Err(QueueError::Consume(format!("{:?}", err)))),
        };

        match serde_json::from_slice::<J>(&delivery.data) {
            Ok(job) => Some(Ok(Delivery::amqp(job, delivery.acker))),
            Err(err) => {
                // a payload that never parses would otherwise be redelivered forever
                if let Err(reject_err) = delivery
                    .acker
                    .reject(BasicRejectOptions { requeue: false })
                    .await
                {
                    tracing::error!("rejecting malformed job {:?}", reject_err);
                }
                Some(Err(QueueError::Payload(err)))
            }
        }
    }
}

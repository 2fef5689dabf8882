use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{StreamExt, future::BoxFuture};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    message::Delivery,
    options::{
        BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};

use crate::infra::{app_state::AppState, config::AmqpConfig};

pub type ConsumerHandler = fn(Delivery, Arc<AppState>) -> BoxFuture<'static, Result<()>>;

/// Opens a channel and makes sure the topic exchange exists.
pub async fn connect(config: &AmqpConfig) -> Result<Channel> {
    let connection = Connection::connect(&config.url, ConnectionProperties::default())
        .await
        .context("Failed to connect to AMQP broker")?;
    let channel = connection
        .create_channel()
        .await
        .context("Failed to open AMQP channel")?;

    channel
        .exchange_declare(
            config.exchange.as_str().into(),
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .with_context(|| format!("Failed to declare exchange {}", config.exchange))?;

    Ok(channel)
}

pub async fn publish(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    payload: &[u8],
) -> Result<()> {
    channel
        .basic_publish(
            exchange.into(),
            routing_key.into(),
            BasicPublishOptions::default(),
            payload,
            BasicProperties::default().with_content_type("application/json".into()),
        )
        .await?
        .await?;
    Ok(())
}

/// Consumes every routing key in `bindings` on a queue private to this
/// instance, so each running server sees every event. Runs until the
/// channel closes.
pub async fn consume(
    channel: Channel,
    exchange: String,
    consumer_name: &str,
    bindings: Vec<(&'static str, ConsumerHandler)>,
    state: Arc<AppState>,
) -> Result<()> {
    let queue = channel
        .queue_declare(
            "".into(),
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare consumer queue")?;
    let queue_name = queue.name().as_str().to_string();

    for (routing_key, _) in &bindings {
        channel
            .queue_bind(
                queue_name.as_str().into(),
                exchange.as_str().into(),
                (*routing_key).into(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to bind {}", routing_key))?;
    }

    let mut consumer = channel
        .basic_consume(
            queue_name.as_str().into(),
            consumer_name.into(),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    tracing::info!(
        "Consuming {} routing keys on queue {}",
        bindings.len(),
        queue_name
    );

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::error!("Consumer stream error: {:?}", err);
                continue;
            }
        };

        let routing_key = delivery.routing_key.as_str().to_string();
        let Some((_, handler)) = bindings.iter().find(|(key, _)| *key == routing_key) else {
            tracing::warn!("No handler for routing key {}", routing_key);
            let _ = delivery
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await;
            continue;
        };

        let handler = *handler;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handler(delivery, state).await {
                tracing::error!("Handler for {} failed: {:?}", routing_key, err);
            }
        });
    }

    Ok(())
}

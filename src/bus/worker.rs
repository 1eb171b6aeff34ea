//! Long-lived consumer of one fan-out exchange.

use crate::auth::SharedAuthStore;
use crate::bus::{Envelope, Reply};
use crate::config::AmqpConfig;
use crate::error::Error;
use crate::model::Command;
use crate::store::Executor;
use crate::validate;
use futures::{FutureExt, StreamExt};
use lapin::message::Delivery;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Consume requests until the connection dies. Every delivery is handled
/// on its own task; the consumer itself never blocks on a request.
pub async fn run(
    config: AmqpConfig,
    auth: SharedAuthStore,
    executor: Arc<Executor>,
) -> Result<(), Error> {
    let connection =
        Connection::connect(&config.normalized_url(), ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;
    channel
        .exchange_declare(
            &config.exchange,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    let queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            queue.name().as_str(),
            &config.exchange,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;
    let mut consumer = channel
        .basic_consume(
            queue.name().as_str(),
            "",
            BasicConsumeOptions {
                no_ack: true,
                ..BasicConsumeOptions::default()
            },
            FieldTable::default(),
        )
        .await?;
    tracing::info!(exchange = %config.exchange, queue = %queue.name(), "consuming requests");

    while let Some(delivery) = consumer.next().await {
        let delivery = delivery?;
        let channel = channel.clone();
        let auth = auth.clone();
        let executor = executor.clone();
        tokio::spawn(process_delivery(channel, delivery, auth, executor));
    }
    Ok(())
}

async fn process_delivery(
    channel: Channel,
    delivery: Delivery,
    auth: SharedAuthStore,
    executor: Arc<Executor>,
) {
    let reply_to = delivery.properties.reply_to().clone();
    let correlation_id = delivery.properties.correlation_id().clone();
    // A panic in a handler must not take the worker down, and the caller
    // still deserves an answer.
    let outcome = AssertUnwindSafe(handle_request(&delivery.data, &auth, &executor))
        .catch_unwind()
        .await;
    let reply = match outcome {
        Ok(Ok(reply)) => reply,
        Ok(Err(err)) => {
            tracing::debug!("request failed: {err}");
            Reply::error(&err)
        }
        Err(_) => {
            tracing::error!("request handler panicked");
            Reply::error(&Error::Internal)
        }
    };
    publish_reply(&channel, reply_to, correlation_id, &reply).await;
}

async fn handle_request(
    body: &[u8],
    auth: &SharedAuthStore,
    executor: &Executor,
) -> Result<Reply, Error> {
    let mut envelope = Envelope::decode(body)?;
    auth.authenticate(&envelope).await?;
    let priority = auth.authorize(&envelope).await?;
    if let Some(header) = envelope.auth.as_mut() {
        header.priority = priority;
    }
    if let Some(domain) = &envelope.domain {
        validate::check_request(domain, &mut envelope.records).await?;
    }
    tracing::trace!(command = %envelope.command, "got request");

    if envelope.command.is_read() {
        let merged = executor.execute_read(&envelope).await?;
        return Ok(Reply::entities(merged));
    }
    match envelope.command {
        Command::CreateDomain
        | Command::CreateRecord
        | Command::DeleteRecord
        | Command::ReplaceRecord => Ok(Reply::rows(executor.execute_write(&envelope).await?)),
        Command::ReplaceOwner => {
            if envelope.new_token.is_empty() {
                return Err(Error::Sql("new token is empty".to_string()));
            }
            if !auth.contains(&envelope.new_token).await {
                return Err(Error::Sql(
                    "new token doesn't exist in our database".to_string(),
                ));
            }
            Ok(Reply::rows(executor.execute_write(&envelope).await?))
        }
        _ => Err(Error::NotImplemented),
    }
}

/// Publish a reply to the caller's queue. Requests without a reply
/// channel are answered nowhere; publish failures are logged and the
/// message stays acked.
async fn publish_reply(
    channel: &Channel,
    reply_to: Option<ShortString>,
    correlation_id: Option<ShortString>,
    reply: &Reply,
) {
    let (Some(reply_to), Some(correlation_id)) = (reply_to, correlation_id) else {
        tracing::debug!("request carries no reply channel, dropping reply");
        return;
    };
    let body = match reply.encode() {
        Ok(body) => body,
        Err(err) => {
            tracing::error!("reply serialization failed: {err}");
            return;
        }
    };
    let properties = BasicProperties::default()
        .with_content_type("application/json".into())
        .with_correlation_id(correlation_id.clone());
    match channel
        .basic_publish(
            "",
            reply_to.as_str(),
            BasicPublishOptions::default(),
            &body,
            properties,
        )
        .await
    {
        Ok(_) => {
            tracing::trace!(
                reply_to = %reply_to,
                correlation_id = %correlation_id,
                bytes = body.len(),
                "sent reply"
            );
        }
        Err(err) => {
            tracing::warn!(
                reply_to = %reply_to,
                correlation_id = %correlation_id,
                "error sending reply: {err}"
            );
        }
    }
}

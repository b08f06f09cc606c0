use std::future::Future;

use aws_sdk_sns::Client as SnsClient;
use aws_sdk_sns::operation::publish::builders::PublishFluentBuilder;
use aws_sdk_sns::types::MessageAttributeValue as SnsAttribute;
use aws_sdk_sqs::Client as SqsClient;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::operation::send_message::builders::SendMessageFluentBuilder;
use aws_sdk_sqs::types::MessageAttributeValue as SqsAttribute;
use tracing::instrument;

use crate::error::BrokerError;

const SNS_PREFIX: &str = "SNS::";
const EVENT_KEY_ATTRIBUTE: &str = "eventKey";

/// One serialized event on its way to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundMessage<'a> {
    /// Ordering key; the message group on FIFO channels.
    pub key: &'a str,
    /// Stable per outbox row, so FIFO channels drop a re-send of the same row.
    pub deduplication_id: &'a str,
    pub body: &'a str,
}

/// Delivers one serialized event to a channel, keyed for ordering affinity.
pub trait MessageBroker: Send + Sync {
    fn send(
        &self,
        channel_address: &str,
        message: OutboundMessage<'_>,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// Where a channel address points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel<'a> {
    Sns { topic_arn: &'a str },
    Sqs { queue_url: &'a str },
}

impl<'a> Channel<'a> {
    pub fn parse(channel_address: &'a str) -> Self {
        match channel_address.strip_prefix(SNS_PREFIX) {
            Some(topic_arn) => Channel::Sns { topic_arn },
            None => Channel::Sqs {
                queue_url: channel_address,
            },
        }
    }

    /// FIFO queues and topics order per message group; the event key is the group.
    pub fn is_fifo(&self) -> bool {
        match self {
            Channel::Sns { topic_arn } => topic_arn.ends_with(".fifo"),
            Channel::Sqs { queue_url } => queue_url.ends_with(".fifo"),
        }
    }
}

/// Publishes to SNS topics and SQS queues, chosen per channel address.
#[derive(Debug, Clone)]
pub struct AwsBroker {
    sqs_client: SqsClient,
    sns_client: SnsClient,
}

impl AwsBroker {
    pub fn new(sqs_client: SqsClient, sns_client: SnsClient) -> Self {
        Self {
            sqs_client,
            sns_client,
        }
    }
}

impl MessageBroker for AwsBroker {
    async fn send(&self, channel_address: &str, message: OutboundMessage<'_>) -> Result<(), BrokerError> {
        let channel = Channel::parse(channel_address);
        match channel {
            Channel::Sns { topic_arn } => {
                send_message_to_sns(&self.sns_client, topic_arn, message, channel.is_fifo()).await
            }
            Channel::Sqs { queue_url } => {
                send_message_to_sqs(&self.sqs_client, queue_url, message, channel.is_fifo()).await
            }
        }
    }
}

#[instrument(skip(sqs_client, message), fields(key = message.key))]
pub async fn send_message_to_sqs(
    sqs_client: &SqsClient,
    queue_url: &str,
    message: OutboundMessage<'_>,
    fifo: bool,
) -> Result<(), BrokerError> {
    sqs_request(sqs_client, queue_url, message, fifo)?
        .send()
        .await
        .map_err(|e| BrokerError::Sqs(DisplayErrorContext(&e).to_string()))?;

    Ok(())
}

fn sqs_request(
    sqs_client: &SqsClient,
    queue_url: &str,
    message: OutboundMessage<'_>,
    fifo: bool,
) -> Result<SendMessageFluentBuilder, BrokerError> {
    let key_attribute = SqsAttribute::builder()
        .data_type("String")
        .string_value(message.key)
        .build()
        .map_err(|e| BrokerError::Build(e.to_string()))?;

    let request = sqs_client
        .send_message()
        .queue_url(queue_url)
        .message_body(message.body)
        .message_attributes(EVENT_KEY_ATTRIBUTE, key_attribute);
    if !fifo {
        return Ok(request);
    }
    Ok(request
        .message_group_id(message.key)
        .message_deduplication_id(message.deduplication_id))
}

#[instrument(skip(sns_client, message), fields(key = message.key))]
pub async fn send_message_to_sns(
    sns_client: &SnsClient,
    topic_arn: &str,
    message: OutboundMessage<'_>,
    fifo: bool,
) -> Result<(), BrokerError> {
    sns_request(sns_client, topic_arn, message, fifo)?
        .send()
        .await
        .map_err(|e| BrokerError::Sns(aws_sdk_sns::error::DisplayErrorContext(&e).to_string()))?;

    Ok(())
}

fn sns_request(
    sns_client: &SnsClient,
    topic_arn: &str,
    message: OutboundMessage<'_>,
    fifo: bool,
) -> Result<PublishFluentBuilder, BrokerError> {
    let key_attribute = SnsAttribute::builder()
        .data_type("String")
        .string_value(message.key)
        .build()
        .map_err(|e| BrokerError::Build(e.to_string()))?;

    let request = sns_client
        .publish()
        .topic_arn(topic_arn)
        .message(message.body)
        .message_attributes(EVENT_KEY_ATTRIBUTE, key_attribute);
    if !fifo {
        return Ok(request);
    }
    Ok(request
        .message_group_id(message.key)
        .message_deduplication_id(message.deduplication_id))
}

/// One message pulled from the worker's queue.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// Long-polls the queue for up to `max_messages` messages.
pub async fn receive_messages(
    sqs_client: &SqsClient,
    queue_url: &str,
    max_messages: i32,
    wait_time_seconds: i32,
) -> Result<Vec<ReceivedMessage>, BrokerError> {
    let output = sqs_client
        .receive_message()
        .queue_url(queue_url)
        .max_number_of_messages(max_messages)
        .wait_time_seconds(wait_time_seconds)
        .send()
        .await
        .map_err(|e| BrokerError::Receive(DisplayErrorContext(&e).to_string()))?;

    let messages = output
        .messages()
        .iter()
        .filter_map(|m| {
            Some(ReceivedMessage {
                body: m.body()?.to_string(),
                receipt_handle: m.receipt_handle()?.to_string(),
            })
        })
        .collect();

    Ok(messages)
}

/// Acknowledges a message so the queue stops redelivering it.
pub async fn delete_message(
    sqs_client: &SqsClient,
    queue_url: &str,
    receipt_handle: &str,
) -> Result<(), BrokerError> {
    sqs_client
        .delete_message()
        .queue_url(queue_url)
        .receipt_handle(receipt_handle)
        .send()
        .await
        .map_err(|e| BrokerError::Receive(DisplayErrorContext(&e).to_string()))?;

    Ok(())
}

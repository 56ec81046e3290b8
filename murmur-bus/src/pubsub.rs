//! Google Cloud Pub/Sub publisher over the REST API.
//!
//! Each [`MessageBus::publish`] call is one `topics.publish` request carrying
//! a single message. Transport retries (network errors, 429, 5xx) are the
//! shared HTTP client's; a reply without a message id counts as a failure.
use crate::token::TokenSource;
use crate::{BusError, MessageBus, MessageId, OutboundMessage};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use murmur_http::{Auth, HttpClient, RequestOpts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const PUBSUB_API_BASE: &str = "https://pubsub.googleapis.com/";
const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";

/// Endpoint of a local emulator when `PUBSUB_EMULATOR_HOST` is set.
pub fn emulator_endpoint() -> Option<String> {
    std::env::var(EMULATOR_HOST_ENV)
        .ok()
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .map(|host| format!("http://{host}/"))
}

#[derive(Serialize)]
struct PublishRequest {
    messages: [WireMessage; 1],
}

#[derive(Serialize)]
struct WireMessage {
    data: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    message_ids: Vec<String>,
}

pub struct PubSubTopic {
    http: HttpClient,
    topic_name: String,
    publish_path: String,
    tokens: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for PubSubTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubTopic")
            .field("topic_name", &self.topic_name)
            .field("publish_path", &self.publish_path)
            .finish_non_exhaustive()
    }
}

impl PubSubTopic {
    /// Publisher for `projects/{project_id}/topics/{topic_id}` at `endpoint`.
    ///
    /// ```
    /// use murmur_bus::MessageBus;
    /// use murmur_bus::pubsub::{PubSubTopic, PUBSUB_API_BASE};
    /// use murmur_bus::token::NoToken;
    /// use std::sync::Arc;
    ///
    /// let topic = PubSubTopic::new("my-project", "tweets", PUBSUB_API_BASE, Arc::new(NoToken)).unwrap();
    /// assert_eq!(topic.destination(), "projects/my-project/topics/tweets");
    /// assert!(PubSubTopic::new("", "tweets", PUBSUB_API_BASE, Arc::new(NoToken)).is_err());
    /// ```
    pub fn new(
        project_id: &str,
        topic_id: &str,
        endpoint: &str,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, BusError> {
        validate_segment("project id", project_id)?;
        validate_segment("topic id", topic_id)?;

        let endpoint = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{endpoint}/")
        };
        let topic_name = format!("projects/{project_id}/topics/{topic_id}");
        Ok(Self {
            http: HttpClient::new(&endpoint)?,
            publish_path: format!("v1/{topic_name}:publish"),
            topic_name,
            tokens,
        })
    }

    /// Override the transport retry budget.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.http = self.http.with_retries(retries);
        self
    }
}

fn validate_segment(what: &str, value: &str) -> Result<(), BusError> {
    if value.trim().is_empty() {
        return Err(BusError::InvalidTopic(format!("{what} is empty")));
    }
    if value.contains('/') || value.chars().any(char::is_whitespace) {
        return Err(BusError::InvalidTopic(format!(
            "{what} `{value}` must not contain '/' or whitespace"
        )));
    }
    Ok(())
}

#[async_trait]
impl MessageBus for PubSubTopic {
    async fn publish(&self, message: OutboundMessage) -> Result<MessageId, BusError> {
        let token = self.tokens.token().await?;
        let body = PublishRequest {
            messages: [WireMessage {
                data: STANDARD.encode(&message.data),
                attributes: message.attributes,
            }],
        };
        let opts = RequestOpts {
            auth: token.as_deref().map(Auth::Bearer),
            ..Default::default()
        };

        let resp: PublishResponse = self.http.post_json(&self.publish_path, &body, opts).await?;
        let message_id = resp.message_ids.into_iter().next().ok_or(BusError::MissingAck)?;
        tracing::debug!(topic = %self.topic_name, %message_id, "pubsub.published");
        Ok(message_id)
    }

    fn destination(&self) -> &str {
        &self.topic_name
    }
}

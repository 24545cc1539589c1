//! Google Cloud Pub/Sub over the REST v1 API.
//!
//! One `PubSubClient` serves both the inbound subscription and the optional
//! outbound topic, sharing a single HTTP connection pool.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize, de::DeserializeOwned, de::IgnoredAny};
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};

use crate::base::{
    config::Config,
    types::{CHANNEL_ATTRIBUTE, Envelope, OutboundMessage, Res, Void},
};

use super::{BusPublisher, BusSubscriber, GenericBusPublisher, GenericBusSubscriber, PermanentBusError};

const METADATA_TOKEN_URL: &str = "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Permission needed to pull from and acknowledge on the subscription.
const SUBSCRIBE_PERMISSION: &str = "pubsub.subscriptions.consume";

/// Permission needed to publish to the outbound topic.
const PUBLISH_PERMISSION: &str = "pubsub.topics.publish";

/// Upper bound on a single request, long enough for a pull to wait for messages.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// Extra constructors applied by the Pub/Sub implementation.

impl BusSubscriber {
    pub fn pubsub(client: Arc<PubSubClient>) -> Self {
        Self::new(client)
    }
}

impl BusPublisher {
    pub fn pubsub(client: Arc<PubSubClient>) -> Self {
        Self::new(client)
    }
}

// Wire types.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PullResponse {
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ReceivedMessage {
    ack_id: String,
    message: PubsubMessage,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PubsubMessage {
    /// Base64-encoded payload.
    data: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    attributes: HashMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    message_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PublishResponse {
    message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TestIamPermissionsRequest<'a> {
    permissions: [&'a str; 1],
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TestIamPermissionsResponse {
    permissions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

// Structs.

/// Where bearer tokens come from.
enum TokenSource {
    /// Emulator: no authentication.
    None,
    /// A token supplied through configuration.
    Static(String),
    /// The GCE metadata server, cached until shortly before expiry.
    Metadata(Mutex<Option<(String, Instant)>>),
}

/// Pub/Sub REST client.
pub struct PubSubClient {
    http: reqwest::Client,
    base_url: String,
    subscription: String,
    topic: Option<String>,
    tokens: TokenSource,
}

impl PubSubClient {
    /// Create a client for the configured subscription and, when republishing, topic.
    pub fn new(config: &Config) -> Res<Self> {
        let (base_url, tokens) = match &config.pubsub_emulator_host {
            Some(host) => (format!("http://{host}/v1"), TokenSource::None),
            None => {
                let tokens = match &config.pubsub_access_token {
                    Some(token) => TokenSource::Static(token.clone()),
                    None => TokenSource::Metadata(Mutex::new(None)),
                };
                (format!("{}/v1", config.pubsub_endpoint.trim_end_matches('/')), tokens)
            }
        };

        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            subscription: format!("projects/{}/subscriptions/{}", config.project_id, config.subscription_id),
            topic: config.topic_id.as_ref().map(|topic| format!("projects/{}/topics/{}", config.topic_project(), topic)),
            tokens,
        })
    }

    async fn token(&self) -> Res<Option<String>> {
        match &self.tokens {
            TokenSource::None => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::Metadata(cache) => {
                let mut cache = cache.lock().await;

                if let Some((token, refresh_at)) = cache.as_ref()
                    && Instant::now() < *refresh_at
                {
                    return Ok(Some(token.clone()));
                }

                debug!("Fetching Pub/Sub access token from the metadata server ...");

                let token: MetadataToken = self
                    .http
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .context("Failed to reach the metadata server")?
                    .error_for_status()?
                    .json()
                    .await?;

                let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
                *cache = Some((token.access_token.clone(), Instant::now() + lifetime));

                Ok(Some(token.access_token))
            }
        }
    }

    /// Check that the subscription (and, when `publishing`, the outbound topic) exists and is usable.
    ///
    /// Also resolves credentials, so an unreachable metadata server fails here rather than on the first pull.
    #[instrument(skip(self))]
    pub async fn verify(&self, publishing: bool) -> Void {
        self.verify_resource(&self.subscription, SUBSCRIBE_PERMISSION).await?;

        if publishing {
            let topic = self.topic.as_ref().ok_or(anyhow!("No outbound topic configured"))?;
            self.verify_resource(topic, PUBLISH_PERMISSION).await?;
        }

        Ok(())
    }

    async fn verify_resource(&self, resource: &str, permission: &str) -> Void {
        // The emulator has no IAM, so existence is all there is to check.
        if matches!(self.tokens, TokenSource::None) {
            let _: IgnoredAny = self.send(resource, self.http.get(format!("{}/{}", self.base_url, resource))).await?;
            return Ok(());
        }

        let request = TestIamPermissionsRequest { permissions: [permission] };
        let response: TestIamPermissionsResponse = self.post(&format!("{resource}:testIamPermissions"), &request).await?;

        require_permission(&response, resource, permission)?;
        debug!("Verified `{}` on {}", permission, resource);

        Ok(())
    }

    async fn post<B, R>(&self, resource: &str, body: &B) -> Res<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send(resource, self.http.post(format!("{}/{}", self.base_url, resource)).json(body)).await
    }

    async fn send<R>(&self, resource: &str, mut request: reqwest::RequestBuilder) -> Res<R>
    where
        R: DeserializeOwned,
    {
        if let Some(token) = self.token().await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.with_context(|| format!("Request to {resource} failed"))?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(resource, status, &text));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl GenericBusSubscriber for PubSubClient {
    #[instrument(skip(self))]
    async fn pull(&self, max_messages: usize) -> Res<Vec<Envelope>> {
        let response: PullResponse = self.post(&format!("{}:pull", self.subscription), &PullRequest { max_messages }).await?;

        let envelopes = response
            .received_messages
            .into_iter()
            .filter_map(|received| match into_envelope(received) {
                Ok(envelope) => Some(envelope),
                Err(err) => {
                    error!("Dropping undecodable delivery, it will be redelivered: {:#}", err);
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!("Pulled {} envelopes", envelopes.len());

        Ok(envelopes)
    }

    async fn acknowledge(&self, ack_id: &str) -> Void {
        let _: IgnoredAny = self.post(&format!("{}:acknowledge", self.subscription), &AcknowledgeRequest { ack_ids: [ack_id] }).await?;

        Ok(())
    }
}

#[async_trait]
impl GenericBusPublisher for PubSubClient {
    #[instrument(skip_all)]
    async fn publish(&self, message: &OutboundMessage) -> Res<String> {
        let topic = self.topic.as_ref().ok_or(anyhow!("No outbound topic configured"))?;

        let request = PublishRequest {
            messages: vec![publish_message(message)],
        };

        let response: PublishResponse = self.post(&format!("{topic}:publish"), &request).await?;

        response.message_ids.into_iter().next().ok_or(anyhow!("Publish to {topic} returned no message id"))
    }
}

// Helpers.

fn into_envelope(received: ReceivedMessage) -> Res<Envelope> {
    let payload = STANDARD.decode(&received.message.data).with_context(|| format!("Message {} has invalid base64 data", received.message.message_id))?;

    Ok(Envelope {
        ack_id: received.ack_id,
        message_id: received.message.message_id,
        payload,
        attributes: received.message.attributes,
    })
}

/// Turn an unsuccessful response into an error, marking the ones a retry cannot fix.
fn status_error(resource: &str, status: reqwest::StatusCode, text: &str) -> anyhow::Error {
    let message = format!("{resource} returned {status}: {text}");

    let transient = status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT || status == reqwest::StatusCode::TOO_MANY_REQUESTS;

    if transient { anyhow!(message) } else { anyhow!(PermanentBusError(message)) }
}

fn require_permission(response: &TestIamPermissionsResponse, resource: &str, permission: &str) -> Void {
    if response.permissions.iter().any(|granted| granted == permission) {
        return Ok(());
    }

    Err(anyhow!(PermanentBusError(format!("Missing permission `{permission}` on {resource}"))))
}

fn publish_message(message: &OutboundMessage) -> PubsubMessage {
    let mut attributes = HashMap::new();

    if let Some(tag) = &message.channel_tag {
        attributes.insert(CHANNEL_ATTRIBUTE.to_string(), tag.clone());
    }

    PubsubMessage {
        data: STANDARD.encode(message.body.as_bytes()),
        attributes,
        message_id: String::new(),
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::base::{
        config::ConfigInner,
        types::{DecodeFailurePolicy, DispatchStrategy},
    };

    fn config(inner: ConfigInner) -> Config {
        Config::new(ConfigInner {
            project_id: "proj".to_string(),
            subscription_id: "builds-sub".to_string(),
            team_name: "eng".to_string(),
            decode_failure: Some(DecodeFailurePolicy::Leave),
            max_outstanding: 10,
            pubsub_endpoint: "https://pubsub.googleapis.com/".to_string(),
            ..inner
        })
        .unwrap()
    }

    #[test]
    fn pull_response_becomes_envelopes() {
        let response: PullResponse = serde_json::from_value(json!({
            "receivedMessages": [{
                "ackId": "ack-1",
                "message": {
                    "data": STANDARD.encode(br#"{"status":"SUCCESS"}"#),
                    "attributes": {"team": "ops"},
                    "messageId": "42",
                    "publishTime": "2024-03-01T10:00:00Z"
                }
            }]
        }))
        .unwrap();

        let envelope = into_envelope(response.received_messages.into_iter().next().unwrap()).unwrap();

        assert_eq!(envelope.ack_id, "ack-1");
        assert_eq!(envelope.message_id, "42");
        assert_eq!(envelope.payload, br#"{"status":"SUCCESS"}"#);
        assert_eq!(envelope.attributes["team"], "ops");
    }

    #[test]
    fn empty_pull_response_has_no_messages() {
        let response: PullResponse = serde_json::from_str("{}").unwrap();
        assert!(response.received_messages.is_empty());
    }

    #[test]
    fn invalid_base64_is_an_error() {
        let received = ReceivedMessage {
            ack_id: "ack-1".to_string(),
            message: PubsubMessage {
                data: "***".to_string(),
                ..Default::default()
            },
        };

        assert!(into_envelope(received).is_err());
    }

    #[test]
    fn publish_message_carries_channel_tag() {
        let message = OutboundMessage {
            body: "hello".to_string(),
            channel_tag: Some("builds".to_string()),
        };

        assert_eq!(
            serde_json::to_value(publish_message(&message)).unwrap(),
            json!({"data": STANDARD.encode("hello"), "attributes": {"channel": "builds"}})
        );

        let untagged = OutboundMessage { body: "hello".to_string(), channel_tag: None };
        assert_eq!(serde_json::to_value(publish_message(&untagged)).unwrap(), json!({"data": STANDARD.encode("hello")}));
    }

    #[test]
    fn acknowledge_request_shape() {
        assert_eq!(serde_json::to_value(AcknowledgeRequest { ack_ids: ["a"] }).unwrap(), json!({"ackIds": ["a"]}));
        assert_eq!(serde_json::to_value(PullRequest { max_messages: 5 }).unwrap(), json!({"maxMessages": 5}));
    }

    #[test]
    fn resource_names_and_endpoints() {
        let client = PubSubClient::new(&config(ConfigInner {
            dispatch: DispatchStrategy::Republish,
            topic_id: Some("chat".to_string()),
            topic_project_id: Some("shared".to_string()),
            pubsub_access_token: Some("token".to_string()),
            ..Default::default()
        }))
        .unwrap();

        assert_eq!(client.base_url, "https://pubsub.googleapis.com/v1");
        assert_eq!(client.subscription, "projects/proj/subscriptions/builds-sub");
        assert_eq!(client.topic.as_deref(), Some("projects/shared/topics/chat"));
        assert!(matches!(client.tokens, TokenSource::Static(_)));

        let emulated = PubSubClient::new(&config(ConfigInner {
            pubsub_emulator_host: Some("localhost:8085".to_string()),
            ..Default::default()
        }))
        .unwrap();

        assert_eq!(emulated.base_url, "http://localhost:8085/v1");
        assert!(emulated.topic.is_none());
        assert!(matches!(emulated.tokens, TokenSource::None));
    }

    #[test]
    fn client_errors_are_permanent() {
        use crate::service::bus::is_permanent;
        use reqwest::StatusCode;

        let resource = "projects/proj/subscriptions/missing:pull";

        assert!(is_permanent(&status_error(resource, StatusCode::NOT_FOUND, "")));
        assert!(is_permanent(&status_error(resource, StatusCode::FORBIDDEN, "")));
        assert!(is_permanent(&status_error(resource, StatusCode::UNAUTHORIZED, "")));

        assert!(!is_permanent(&status_error(resource, StatusCode::TOO_MANY_REQUESTS, "")));
        assert!(!is_permanent(&status_error(resource, StatusCode::REQUEST_TIMEOUT, "")));
        assert!(!is_permanent(&status_error(resource, StatusCode::SERVICE_UNAVAILABLE, "")));

        let err = status_error(resource, StatusCode::NOT_FOUND, "Resource not found");
        assert!(err.to_string().contains("404 Not Found: Resource not found"));
    }

    #[test]
    fn missing_permission_is_permanent() {
        let granted: TestIamPermissionsResponse = serde_json::from_value(json!({"permissions": [SUBSCRIBE_PERMISSION]})).unwrap();
        assert!(require_permission(&granted, "projects/p/subscriptions/s", SUBSCRIBE_PERMISSION).is_ok());

        let denied: TestIamPermissionsResponse = serde_json::from_str("{}").unwrap();
        let err = require_permission(&denied, "projects/p/topics/t", PUBLISH_PERMISSION).unwrap_err();
        assert!(crate::service::bus::is_permanent(&err));
        assert!(err.to_string().contains("pubsub.topics.publish"));
    }

    #[test]
    fn test_iam_permissions_request_shape() {
        assert_eq!(
            serde_json::to_value(TestIamPermissionsRequest { permissions: [PUBLISH_PERMISSION] }).unwrap(),
            json!({"permissions": ["pubsub.topics.publish"]})
        );
    }

    #[tokio::test]
    async fn publish_without_topic_fails() {
        let client = Arc::new(PubSubClient::new(&config(ConfigInner::default())).unwrap());
        let publisher = BusPublisher::pubsub(client);

        let err = publisher.publish(&OutboundMessage { body: "x".to_string(), channel_tag: None }).await.unwrap_err();
        assert!(err.to_string().contains("No outbound topic"));
    }
}

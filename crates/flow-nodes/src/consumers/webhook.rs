//! Webhook delivery consumer
//!
//! Posts each unit as JSON to a configured endpoint. Built as an
//! [`AsyncConsumer`] so a flow driver can keep several posts in flight and
//! gather their status results in submission order.

use async_trait::async_trait;
use flow_engine::{AsyncConsumer, AsyncConsumerNode, Context, FlowError, FlowResult};
use serde_json::json;

/// Async consumer posting units to an HTTP endpoint
pub struct WebhookConsumer {
    url: String,
    client: reqwest::Client,
}

impl WebhookConsumer {
    /// Result key holding the endpoint's HTTP status code
    pub const KEY_STATUS: &'static str = "status";

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wrap into a gathering node with the given concurrency threshold
    pub fn into_node(self, concurrency: usize) -> AsyncConsumerNode<Self> {
        AsyncConsumerNode::new(self, concurrency)
    }
}

#[async_trait]
impl AsyncConsumer for WebhookConsumer {
    async fn consume(&self, unit: Context) -> FlowResult<Context> {
        let response = self
            .client
            .post(&self.url)
            .json(unit.as_map())
            .send()
            .await
            .map_err(|err| FlowError::task(format!("webhook post failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FlowError::task(format!(
                "webhook '{}' returned status {status}",
                self.url
            )));
        }
        Ok(Context::new().with(Self::KEY_STATUS, json!(status.as_u16())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_wraps_with_requested_concurrency() {
        use flow_engine::Node;

        let node = WebhookConsumer::new("http://127.0.0.1:9/hook").into_node(4);
        assert_eq!(node.concurrency(), 4);
        assert_eq!(node.core().name(), "WebhookConsumer");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_the_task() {
        // nothing listens on the discard port, so the post is refused locally
        let consumer = WebhookConsumer::new("http://127.0.0.1:9/hook");
        let err = consumer.consume(Context::new()).await.unwrap_err();
        assert!(err.to_string().contains("webhook post failed"));
    }
}

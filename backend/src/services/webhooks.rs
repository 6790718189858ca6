use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::WebhookConfig;
use crate::error::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub url: String,
    pub method: String,
    pub payload: Value,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub status_code: u16,
    pub attempts: u32,
}

/// Outbound HTTP collaborator used by `SendWebhook` actions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    async fn deliver(&self, request: &WebhookRequest) -> WorkflowResult<WebhookDelivery>;
}

#[derive(Clone)]
pub struct HttpWebhookDispatcher {
    client: Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl HttpWebhookDispatcher {
    pub fn new(config: &WebhookConfig) -> WorkflowResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    fn method(raw: &str) -> WorkflowResult<Method> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "PATCH" => Ok(Method::PATCH),
            "DELETE" => Ok(Method::DELETE),
            other => Err(WorkflowError::configuration(format!(
                "unsupported webhook method: {}",
                other
            ))),
        }
    }

    fn should_retry(status: StatusCode) -> bool {
        status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
    }

    async fn attempt(&self, method: &Method, request: &WebhookRequest) -> Result<StatusCode, reqwest::Error> {
        let mut builder = self.client.request(method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if *method != Method::GET {
            builder = builder.json(&request.payload);
        }
        Ok(builder.send().await?.status())
    }
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookDispatcher {
    async fn deliver(&self, request: &WebhookRequest) -> WorkflowResult<WebhookDelivery> {
        let method = Self::method(&request.method)?;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let retryable = match self.attempt(&method, request).await {
                Ok(status) if status.is_success() => {
                    info!("Webhook delivered to {} ({})", request.url, status);
                    return Ok(WebhookDelivery {
                        status_code: status.as_u16(),
                        attempts,
                    });
                }
                Ok(status) if Self::should_retry(status) => {
                    WorkflowError::collaborator("webhook", format!("{} responded with {}", request.url, status))
                }
                Ok(status) => {
                    return Err(WorkflowError::collaborator(
                        "webhook",
                        format!("{} responded with {}", request.url, status),
                    ));
                }
                Err(e) if e.is_builder() => return Err(WorkflowError::from(e)),
                Err(e) => WorkflowError::from(e),
            };

            if attempts > self.max_retries {
                return Err(retryable);
            }

            let delay = self.retry_backoff * 2u32.saturating_pow(attempts - 1);
            warn!(
                "Webhook attempt {} to {} failed: {}; retrying in {:?}",
                attempts, request.url, retryable, delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

//! Provider gateway for OpenRouter chat completions.
//!
//! The gateway makes exactly one attempt per request. Callers that can
//! degrade (the radar engine) switch to a deterministic fallback on any
//! failure; retrying here would only delay that switch.

pub mod error;
pub mod openrouter;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use openrouter::{ChatProvider, OpenRouterAdapter};
use usage::{CallStatus, ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{NoopUsageSink, StderrUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    openrouter: OpenRouterAdapter,
    usage_sink: Arc<U>,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let openrouter = OpenRouterAdapter::from_env()?;
        Ok(Self {
            openrouter,
            usage_sink,
        })
    }

    pub fn with_adapter(openrouter: OpenRouterAdapter, usage_sink: Arc<U>) -> Self {
        Self {
            openrouter,
            usage_sink,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        match self.openrouter.chat(&req).await {
            Ok(resp) => {
                self.record_usage(&req, &resp, CallStatus::Success, None)
                    .await;
                Ok(resp)
            }
            Err(err) => {
                let code = err.code().to_string();
                let request_id = err.request_id().map(|s| s.to_string());
                self.record_usage_with_id(&req, &ChatResponse::empty(), Some(code), request_id)
                    .await;
                Err(err)
            }
        }
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        resp: &ChatResponse,
        status: CallStatus,
        error_code: Option<String>,
    ) {
        let record = self.base_record(req, resp);
        let record = if status == CallStatus::Error {
            record.error(error_code.unwrap_or_else(|| "provider_error".to_string()))
        } else {
            record
        };
        self.usage_sink.record(record).await;
    }

    async fn record_usage_with_id(
        &self,
        req: &ChatRequest,
        resp: &ChatResponse,
        error_code: Option<String>,
        request_id: Option<String>,
    ) {
        let mut record = self
            .base_record(req, resp)
            .error(error_code.unwrap_or_else(|| "provider_error".to_string()));
        if let Some(id) = request_id {
            record = record.request_id(id);
        }
        self.usage_sink.record(record).await;
    }

    fn base_record(&self, req: &ChatRequest, resp: &ChatResponse) -> ProviderCallRecord {
        ProviderCallRecord::new(
            req.model.provider(),
            "chat/completions",
            req.model.model_id(),
            req.attribution.caller,
        )
        .tokens(resp.input_tokens as i32, resp.output_tokens as i32)
        .user(req.attribution.user_id)
        .role(req.attribution.role_id)
        .latency(resp.latency.as_millis() as i32)
    }
}

impl ChatResponse {
    fn empty() -> Self {
        Self {
            content: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            latency: Duration::from_millis(0),
            finish_reason: FinishReason::Unknown("error".to_string()),
        }
    }
}

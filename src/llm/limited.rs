//! Rate limiting and retry decorator for any [`LLMClient`]

use crate::llm::client::{GenerationParams, LLMClient, LLMResponse};
use crate::types::Result;
use crate::utils::rate_limiter::{RetryPolicy, TokenBucket};
use async_trait::async_trait;
use std::sync::Arc;

pub struct RateLimitedClient {
    inner: Box<dyn LLMClient>,
    bucket: Arc<TokenBucket>,
    retry: RetryPolicy,
}

impl RateLimitedClient {
    pub fn new(inner: Box<dyn LLMClient>, bucket: Arc<TokenBucket>, retry: RetryPolicy) -> Self {
        Self {
            inner,
            bucket,
            retry,
        }
    }
}

#[async_trait]
impl LLMClient for RateLimitedClient {
    async fn generate_with_params(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<LLMResponse> {
        // Each attempt, retries included, spends a token
        self.retry
            .run(self.inner.model_name(), || async move {
                self.bucket.acquire(1).await?;
                self.inner.generate_with_params(prompt, params).await
            })
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl LLMClient for FlakyClient {
        async fn generate_with_params(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<LLMResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(AppError::RateLimited("429".into()))
            } else {
                Ok(LLMResponse {
                    content: "ok".into(),
                    ..Default::default()
                })
            }
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_and_spends_tokens() {
        let calls = Arc::new(AtomicU32::new(0));
        let bucket = Arc::new(TokenBucket::new(60, 10));
        let client = RateLimitedClient::new(
            Box::new(FlakyClient {
                failures: 2,
                calls: Arc::clone(&calls),
            }),
            Arc::clone(&bucket),
            RetryPolicy::default(),
        );

        assert_eq!(client.generate("hi").await.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Three tokens spent, a few seconds of backoff refilled some of them
        assert!(bucket.available().await < 10.0);
        assert_eq!(client.model_name(), "flaky");
    }
}

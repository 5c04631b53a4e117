//! Webhook registration, status, and inbound handling.

pub mod server;

use std::sync::Arc;

use crate::config::Config;
use crate::error::KernelError;
use crate::telegram::{BotApi, UpdateSink};
use crate::validate::{InboundRequest, RequestValidator};

/// Append the handler route and secret to a base URL.
///
/// Exactly one `?`/`&` separator is chosen: `&` when the base already has a
/// query string, otherwise `?`, with a `/` inserted first when the base has
/// no query string and does not already end in one.
pub fn build_webhook_url(base: &str, secret: &str) -> String {
    let mut url = base.to_string();
    let separator = if url.contains('?') {
        '&'
    } else {
        if !url.ends_with('/') {
            url.push('/');
        }
        '?'
    };
    format!("{url}{separator}a=handle&s={secret}")
}

/// Issues webhook management calls and prints operator-facing outcome lines.
pub struct WebhookController<A: BotApi> {
    api: A,
    config: Config,
}

impl<A: BotApi> WebhookController<A> {
    pub fn new(api: A, config: Config) -> Self {
        Self { api, config }
    }

    /// Target base URL: configured value, or derived from the hosting
    /// provider's app name.
    fn base_url(&self) -> Result<String, KernelError> {
        if let Some(url) = self.config.webhook.url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }
        if let Some(app) = self
            .config
            .heroku_app_name
            .as_deref()
            .filter(|a| !a.is_empty())
        {
            return Ok(format!("https://{app}.herokuapp.com"));
        }
        Err(KernelError::config("webhook URL is empty"))
    }

    /// Register the webhook with the platform.
    ///
    /// Unauthenticated registration is disallowed: a missing shared secret is
    /// a configuration error, as is a missing URL.
    pub async fn register(&self) -> Result<(), KernelError> {
        let base = self.base_url()?;
        let secret = self
            .config
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| KernelError::config("secret is empty"))?;

        let url = build_webhook_url(&base, secret);
        let outcome = self.api.set_webhook(&url, &self.config.webhook).await;

        if outcome.ok {
            println!("Webhook URL: {base}");
            println!("{}", outcome.description);
        } else {
            println!("Request failed: {}", outcome.description);
        }
        Ok(())
    }

    pub async fn deregister(&self) -> Result<(), KernelError> {
        let outcome = self.api.delete_webhook().await;
        if outcome.ok {
            println!("{}", outcome.description);
        } else {
            println!("Request failed: {}", outcome.description);
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<(), KernelError> {
        let outcome = self.api.webhook_info().await;
        if outcome.ok {
            println!("{}", outcome.description);
        } else {
            println!("Request failed: {}", outcome.description);
        }
        Ok(())
    }
}

/// Validate one inbound request and forward its update if authentic.
/// Unauthentic requests are dropped silently: no processing, no error.
pub async fn handle_request(
    validator: &RequestValidator,
    sink: &Arc<dyn UpdateSink>,
    request: &InboundRequest,
    body: &str,
) {
    if !validator.is_authentic(request) {
        tracing::debug!("dropping unauthentic webhook request");
        return;
    }

    match serde_json::from_str::<teloxide::types::Update>(body) {
        Ok(update) => {
            if let Err(err) = sink.process(update).await {
                tracing::warn!(%err, "webhook update processing failed");
            }
        }
        Err(err) => tracing::debug!(%err, "ignoring undecodable update payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::telegram::ApiOutcome;

    #[test]
    fn url_with_no_query_gains_slash_and_question_mark() {
        assert_eq!(
            build_webhook_url("https://x.com", "abc"),
            "https://x.com/?a=handle&s=abc"
        );
    }

    #[test]
    fn url_with_query_appends_with_ampersand() {
        assert_eq!(
            build_webhook_url("https://x.com?q=1", "abc"),
            "https://x.com?q=1&a=handle&s=abc"
        );
    }

    #[test]
    fn url_with_trailing_slash_is_not_doubled() {
        assert_eq!(
            build_webhook_url("https://x.com/", "abc"),
            "https://x.com/?a=handle&s=abc"
        );
    }

    struct FakeApi {
        set_urls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn new() -> Self {
            Self {
                set_urls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BotApi for FakeApi {
        async fn set_webhook(
            &self,
            url: &str,
            _options: &crate::config::WebhookConfig,
        ) -> ApiOutcome {
            self.set_urls.lock().unwrap().push(url.to_string());
            ApiOutcome::success("Webhook was set")
        }

        async fn delete_webhook(&self) -> ApiOutcome {
            ApiOutcome::success("Webhook was deleted")
        }

        async fn webhook_info(&self) -> ApiOutcome {
            ApiOutcome::success("WebhookInfo { .. }")
        }
    }

    #[tokio::test]
    async fn register_requires_a_secret() {
        let mut config = Config::default();
        config.webhook.url = Some("https://x.com".to_string());

        let controller = WebhookController::new(FakeApi::new(), config);
        assert!(matches!(
            controller.register().await,
            Err(KernelError::Config(_))
        ));
    }

    #[tokio::test]
    async fn register_requires_a_url_or_hosting_fallback() {
        let mut config = Config::default();
        config.secret = Some("abc".to_string());

        let controller = WebhookController::new(FakeApi::new(), config.clone());
        assert!(matches!(
            controller.register().await,
            Err(KernelError::Config(_))
        ));

        config.heroku_app_name = Some("mybot".to_string());
        let api = FakeApi::new();
        let urls = {
            let controller = WebhookController::new(api, config);
            controller.register().await.unwrap();
            controller.api.set_urls.lock().unwrap().clone()
        };
        assert_eq!(urls, vec!["https://mybot.herokuapp.com/?a=handle&s=abc"]);
    }
}

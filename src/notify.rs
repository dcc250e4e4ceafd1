//! Out-of-band administrator notification for new submissions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::config::Config;
use crate::domain::PendingSubmission;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_submission(&self, submission: &PendingSubmission) -> Result<()>;
}

/// POSTs the submission JSON to the admin-notification function
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String, anon_key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("naija-fuel-tracker/0.1"));
        if !anon_key.is_empty() {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {anon_key}")).context("invalid backend API key")?,
            );
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_submission(&self, submission: &PendingSubmission) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(submission)
            .send()
            .await
            .context("notification POST failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("notification webhook error: HTTP {status}: {body}");
        }
        Ok(())
    }
}

/// Writes the notification to the log instead of sending it
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_submission(&self, submission: &PendingSubmission) -> Result<()> {
        info!(
            submission_id = submission.id,
            station = %submission.key(),
            submitted_by = %submission.submitted_by,
            "new price submission awaiting review"
        );
        Ok(())
    }
}

pub fn build_notifier(cfg: &Config) -> Result<Arc<dyn Notifier>> {
    match cfg.notify.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Ok(Arc::new(WebhookNotifier::new(
            url.to_string(),
            &cfg.backend.anon_key,
            Duration::from_secs(cfg.backend.http_timeout_seconds),
        )?)),
        _ => Ok(Arc::new(LogNotifier)),
    }
}

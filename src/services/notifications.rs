use async_trait::async_trait;
use tracing::warn;

use crate::config::NotificationConfig;
use crate::error::AppResult;

/// Notification collaborator boundary. Delivery is fire-and-forget from
/// the scheduling engine's point of view: a failure is logged and surfaced
/// as partial success, never as a failed scheduling operation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient: &str,
        template_category: &str,
        variables: serde_json::Value,
    ) -> AppResult<()>;
}

pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn from_config(config: &NotificationConfig) -> Option<Self> {
        let base_url = config.base_url.clone()?;
        Some(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(
        &self,
        recipient: &str,
        template_category: &str,
        variables: serde_json::Value,
    ) -> AppResult<()> {
        let response = self
            .client
            .post(format!("{}/notifications", self.base_url))
            .json(&serde_json::json!({
                "recipient": recipient,
                "template_category": template_category,
                "variables": variables,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(
                recipient,
                template_category,
                status = %response.status(),
                "Notification provider rejected request"
            );
            return Err(crate::error::AppError::BadRequest(format!(
                "notification provider returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Attempt a notification and swallow the outcome into a boolean for the
/// caller's partial-success reporting.
pub async fn try_notify(
    notifier: Option<&dyn Notifier>,
    recipient: &str,
    template_category: &str,
    variables: serde_json::Value,
) -> bool {
    let Some(notifier) = notifier else {
        return false;
    };

    match notifier.notify(recipient, template_category, variables).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                recipient,
                template_category,
                error = ?e,
                "Notification failed; scheduling operation unaffected"
            );
            false
        }
    }
}

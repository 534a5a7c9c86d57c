//! WhatsApp delivery through the Twilio Messages API.

use std::time::Duration;

use super::NotifyError;
use crate::config::WhatsAppConfig;

pub struct WhatsAppService {
    config: WhatsAppConfig,
    http_client: reqwest::Client,
}

impl WhatsAppService {
    pub fn new(config: WhatsAppConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            http_client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    fn messages_url(&self, account_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            account_sid
        )
    }

    /// Send `body` to an E.164 phone number
    pub async fn send(&self, to_phone: &str, body: &str) -> Result<(), NotifyError> {
        let (Some(sid), Some(token), Some(from)) = (
            self.config.account_sid.as_deref(),
            self.config.auth_token.as_deref(),
            self.config.from_number.as_deref(),
        ) else {
            return Err(NotifyError::NotConfigured("whatsapp"));
        };
        if !self.config.enabled {
            return Err(NotifyError::NotConfigured("whatsapp"));
        }

        let to = format!("whatsapp:{}", to_phone);
        let from = format!("whatsapp:{}", from);
        let params = [("To", to.as_str()), ("From", from.as_str()), ("Body", body)];

        let response = self
            .http_client
            .post(self.messages_url(sid))
            .basic_auth(sid, Some(token))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(to = %to_phone, "WhatsApp message sent");
        Ok(())
    }
}

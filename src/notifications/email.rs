//! SMTP delivery for notification emails.

use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::NotifyError;
use crate::config::EmailConfig;

pub struct EmailService {
    config: EmailConfig,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    /// Build the multipart message without sending it
    pub fn build_message(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<Message, NotifyError> {
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or(NotifyError::NotConfigured("email"))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address)
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}", e)))?;
        let to: Mailbox = to_email
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}", e)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;
        Ok(message)
    }

    pub async fn send(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<(), NotifyError> {
        if !self.is_enabled() {
            return Err(NotifyError::NotConfigured("email"));
        }
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or(NotifyError::NotConfigured("email"))?;

        let message = self.build_message(to_email, subject, html_body, text_body)?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = match (&self.config.smtp_username, &self.config.smtp_password) {
            (Some(username), Some(password)) => {
                mailer.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => mailer,
        };

        mailer.build().send(message).await?;

        tracing::info!(to = %to_email, subject = %subject, "Email sent");
        Ok(())
    }
}

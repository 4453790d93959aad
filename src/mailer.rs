use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_sesv2::{
    config::Region,
    types::{Body, Content, Destination, EmailContent, Message},
    Client,
};
use tracing::info;

use crate::config::{MailConfig, MailTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> anyhow::Result<()>;
}

pub async fn from_config(config: &MailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match config.transport {
        MailTransport::Ses => Ok(Arc::new(SesMailer::new(config).await?)),
        MailTransport::Log => Ok(Arc::new(LogMailer)),
    }
}

#[derive(Clone)]
pub struct SesMailer {
    client: Client,
    from: String,
}

impl SesMailer {
    pub async fn new(config: &MailConfig) -> anyhow::Result<Self> {
        let mut loader =
            defaults(BehaviorVersion::latest()).region(Region::new(config.ses_region.clone()));
        if let (Some(access_key), Some(secret_key)) =
            (config.ses_access_key.as_deref(), config.ses_secret_key.as_deref())
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ));
        }
        if let Some(endpoint) = config.ses_endpoint.as_deref() {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        Ok(Self {
            client: Client::new(&shared),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        let destination = Destination::builder().to_addresses(email.to.clone()).build();
        let subject = Content::builder()
            .data(email.subject)
            .charset("UTF-8")
            .build()
            .context("build email subject")?;
        let text = Content::builder()
            .data(email.text)
            .charset("UTF-8")
            .build()
            .context("build email body")?;
        let message = Message::builder()
            .subject(subject)
            .body(Body::builder().text(text).build())
            .build();

        let result = self
            .client
            .send_email()
            .from_email_address(&self.from)
            .destination(destination)
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .context("ses send_email")?;

        info!(to = %email.to, message_id = ?result.message_id(), "email sent");
        Ok(())
    }
}

/// Writes emails to the log instead of delivering them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        info!(to = %email.to, subject = %email.subject, body = %email.text, "email (log transport)");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_mail_config() -> MailConfig {
    MailConfig {
        transport: MailTransport::Log,
        from: "test@tourbook.local".into(),
        ses_region: "us-east-1".into(),
        ses_endpoint: None,
        ses_access_key: None,
        ses_secret_key: None,
    }
}

/// Records sent mail; fails every send when `fail` is set.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FakeMailer {
    pub sent: std::sync::Mutex<Vec<Email>>,
    pub fail: bool,
}

#[cfg(test)]
#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("smtp unavailable");
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_transport_is_selected_from_config() {
        let mailer = from_config(&test_mail_config()).await.unwrap();
        mailer
            .send(Email {
                to: "a@b.io".into(),
                subject: "hi".into(),
                text: "body".into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fake_mailer_records_and_fails_on_demand() {
        let ok = FakeMailer::default();
        let email = Email {
            to: "a@b.io".into(),
            subject: "s".into(),
            text: "t".into(),
        };
        ok.send(email.clone()).await.unwrap();
        assert_eq!(ok.sent.lock().unwrap().as_slice(), &[email.clone()]);

        let failing = FakeMailer {
            fail: true,
            ..Default::default()
        };
        assert!(failing.send(email).await.is_err());
    }
}

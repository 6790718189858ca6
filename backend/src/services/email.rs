use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{error, info};

use crate::config::SmtpConfig;
use crate::error::{WorkflowError, WorkflowResult};

/// Outbound email collaborator used by `SendEmail` actions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str, is_html: bool) -> WorkflowResult<()>;
}

#[derive(Debug, Clone)]
pub struct SmtpEmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl SmtpEmailService {
    pub fn new(smtp_config: &SmtpConfig) -> WorkflowResult<Self> {
        let builder = if smtp_config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp_config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
        };

        let mut builder = builder
            .port(smtp_config.port)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)));

        if !smtp_config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                smtp_config.username.clone(),
                smtp_config.password.clone(),
            ));
        }

        Ok(SmtpEmailService {
            transport: builder.build(),
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        })
    }

    fn build_message(&self, to: &str, subject: &str, body: &str, is_html: bool) -> WorkflowResult<Message> {
        let from = format!("{} <{}>", self.from_name, self.from_email).parse::<Mailbox>()?;
        let to = to.parse::<Mailbox>()?;
        let content_type = if is_html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        Ok(Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(content_type)
            .body(body.to_string())?)
    }
}

#[async_trait]
impl EmailSender for SmtpEmailService {
    async fn send(&self, to: &str, subject: &str, body: &str, is_html: bool) -> WorkflowResult<()> {
        let message = self.build_message(to, subject, body, is_html)?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to {}", to);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", to, e);
                Err(WorkflowError::from(e))
            }
        }
    }
}

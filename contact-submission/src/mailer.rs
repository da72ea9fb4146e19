use crate::secrets::SecretRepository;
use async_once_cell::OnceCell;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub const SMTP_CREDENTIALS_NAME: &str = "smtp-ses-credentials";

/// A notification about one contact form submission. Built per request and never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailMessage {
    /// The resolved sender; its display name is quoted as needed when the mail is written.
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), MailerError>;
}

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("Unable to connect to SMTP server: {0}")]
    Connection(lambda_http::Error),
    #[error("Error building message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("Error sending message: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Delivers through an SMTP relay. The connection pool is set up on first use; if that fails the
/// next message tries again.
pub struct SmtpMailer<SecretRepositoryT: SecretRepository> {
    secrets_repository: SecretRepositoryT,
    smtp_url: String,
    transport: OnceCell<AsyncSmtpTransport<Tokio1Executor>>,
}

#[derive(Deserialize)]
struct SmtpCredentials {
    #[serde(rename = "SMTP_USERNAME")]
    username: String,
    #[serde(rename = "SMTP_PASSWORD")]
    password: String,
}

impl<SecretRepositoryT: SecretRepository> SmtpMailer<SecretRepositoryT> {
    pub fn new(secrets_repository: SecretRepositoryT, smtp_url: impl Into<String>) -> Self {
        Self {
            secrets_repository,
            smtp_url: smtp_url.into(),
            transport: Default::default(),
        }
    }

    async fn transport(&self) -> Result<&AsyncSmtpTransport<Tokio1Executor>, MailerError> {
        self.transport
            .get_or_try_init(self.initialise_transport())
            .await
            .map_err(MailerError::Connection)
    }

    async fn initialise_transport(
        &self,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, lambda_http::Error> {
        info!("Connecting to SMTP server {}", self.smtp_url);
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(&self.smtp_url)?
            .authentication(vec![Mechanism::Plain]);

        // Credentials are only sent over TLS.
        if self.smtp_url.starts_with("smtps://") {
            let credentials: SmtpCredentials = self
                .secrets_repository
                .get_secret(SMTP_CREDENTIALS_NAME)
                .await?;
            builder = builder.credentials(Credentials::new(
                credentials.username,
                credentials.password,
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl<SecretRepositoryT: SecretRepository> Mailer for SmtpMailer<SecretRepositoryT> {
    async fn send(&self, message: MailMessage) -> Result<(), MailerError> {
        let email = build_email(&message)?;
        self.transport().await?.send(email).await?;
        Ok(())
    }
}

fn build_email(message: &MailMessage) -> Result<Message, MailerError> {
    Ok(Message::builder()
        .from(message.from.clone())
        .to(message.to.clone())
        .subject(message.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(message.body.clone())?)
}

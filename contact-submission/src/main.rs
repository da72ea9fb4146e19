mod config;
mod dispatcher;
mod error;
mod error_page;
mod flash;
mod friendlycaptcha;
mod identity;
mod mailer;
mod secrets;
mod submission;

use config::ContactConfig;
use dispatcher::SubmissionDispatcher;
use error::SubmissionError;
use friendlycaptcha::FriendlyCaptchaVerifier;
use identity::{Identity, Sender};
use lambda_http::{run, service_fn, Body, Error, Request, RequestPayloadExt, Response};
use mailer::{Mailer, SmtpMailer};
use secrets::{AwsSecretsManagerSecretRepository, SecretRepository};
use submission::SubmissionInput;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();
    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            warn!("Ignoring unreadable .env file: {error}");
        }
    }

    let config = ContactConfig::from_env()?;
    if !config.challenge.site_key_present() {
        warn!("FRIENDLYCAPTCHA_SITEKEY is not set, accepting submissions without verification.");
    }
    let mailer = SmtpMailer::new(
        AwsSecretsManagerSecretRepository::open().await,
        config.smtp_url.clone(),
    );
    let handler = ContactFormHandler::new(&config, mailer)?;
    run(service_fn(|event| handler.handle(event))).await
}

/// Request-handling layer around the dispatcher: decodes the request, and turns errors which the
/// dispatcher escalates into responses. A body which does not decode is treated like any other
/// unusable submission.
struct ContactFormHandler<MailerT: Mailer> {
    form_path: String,
    dispatcher: SubmissionDispatcher<MailerT>,
}

impl<MailerT: Mailer> ContactFormHandler<MailerT> {
    fn new(config: &ContactConfig, mailer: MailerT) -> Result<Self, Error> {
        let friendlycaptcha_verifier = FriendlyCaptchaVerifier::new(config.challenge.clone())?;
        Ok(Self {
            form_path: config.form_path.clone(),
            dispatcher: SubmissionDispatcher::new(config, friendlycaptcha_verifier, mailer),
        })
    }

    async fn handle(&self, event: Request) -> Result<Response<Body>, Error> {
        let sender = Sender::from(Identity::from_request(&event));
        let input = match event.payload::<SubmissionInput>() {
            Ok(Some(input)) => input,
            Ok(None) => {
                info!("Contact form submission without payload");
                return Ok(self.dispatcher.reject_invalid());
            }
            Err(error) => {
                info!("Unable to decode contact form submission: {error}");
                return Ok(self.dispatcher.reject_invalid());
            }
        };
        match self.dispatcher.dispatch(&sender, input).await {
            Ok(response) => Ok(response),
            Err(error) => Ok(self.escalate(error)),
        }
    }

    fn escalate(&self, error: SubmissionError) -> Response<Body> {
        error.log();
        error.into_response(&self.form_path)
    }
}

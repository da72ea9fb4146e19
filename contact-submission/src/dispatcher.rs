use crate::{
    config::ContactConfig,
    error::SubmissionError,
    flash::{redirect_with_flash, Flash},
    friendlycaptcha::FriendlyCaptchaVerifier,
    identity::{resolve_sender, ResolvedSender, Sender},
    mailer::{MailMessage, Mailer},
    submission::SubmissionInput,
};
use lambda_http::{Body, Response};
use lettre::message::Mailbox;
use tracing::{info, warn};

/// Runs one submission through sender resolution, challenge verification and mail dispatch.
///
/// Every submission ends in exactly one of:
/// - a redirect to the form with [`Flash::Invalid`] when the submission is incomplete or names an
///   unusable sender address, before anything is verified or sent;
/// - a redirect to the form with [`Flash::Rejected`] when the challenge did not pass, in which
///   case no mail is sent;
/// - a redirect to the form with [`Flash::Sent`] once the mailer accepted the message;
/// - [`SubmissionError::DispatchFailed`], which means the mailer itself failed and is never
///   turned into a redirect here.
pub struct SubmissionDispatcher<MailerT: Mailer> {
    contact_email: Mailbox,
    form_path: String,
    friendlycaptcha_verifier: FriendlyCaptchaVerifier,
    mailer: MailerT,
}

impl<MailerT: Mailer> SubmissionDispatcher<MailerT> {
    pub fn new(
        config: &ContactConfig,
        friendlycaptcha_verifier: FriendlyCaptchaVerifier,
        mailer: MailerT,
    ) -> Self {
        Self {
            contact_email: config.contact_email.clone(),
            form_path: config.form_path.clone(),
            friendlycaptcha_verifier,
            mailer,
        }
    }

    pub async fn dispatch(
        &self,
        sender: &Sender,
        input: SubmissionInput,
    ) -> Result<Response<Body>, SubmissionError> {
        let resolved_sender = resolve_sender(sender, &input);
        let Some(from) = self.validate(&resolved_sender, &input) else {
            return Ok(self.reject_invalid());
        };

        let outcome = self
            .friendlycaptcha_verifier
            .verify_token(&input.challenge_token)
            .await;
        if !outcome.permits_dispatch() {
            warn!("Not sending contact form message, challenge outcome {outcome:?}");
            return Ok(redirect_with_flash(&self.form_path, Flash::Rejected));
        }

        let message = self.construct_mail_message(from, &resolved_sender, &input);
        match self.mailer.send(message).await {
            Ok(()) => {
                info!("Sent contact form message, challenge outcome {outcome:?}");
                Ok(redirect_with_flash(&self.form_path, Flash::Sent))
            }
            Err(source) => Err(SubmissionError::DispatchFailed {
                source,
                message: input.message,
            }),
        }
    }

    /// Returns the sender's mailbox if the submission can be sent at all.
    fn validate(&self, sender: &ResolvedSender, input: &SubmissionInput) -> Option<Mailbox> {
        if !sender.is_complete() {
            info!("Contact form submission without sender name or email");
            return None;
        }
        if input.message.trim().is_empty() {
            info!("Contact form submission with empty message");
            return None;
        }
        match sender.mailbox() {
            Ok(mailbox) => Some(mailbox),
            Err(error) => {
                info!("Contact form submission with unusable email {:?}: {error}", sender.email);
                None
            }
        }
    }

    /// Redirect for submissions which cannot be sent as they are.
    pub fn reject_invalid(&self) -> Response<Body> {
        redirect_with_flash(&self.form_path, Flash::Invalid)
    }

    #[cfg(test)]
    pub fn mailer(&self) -> &MailerT {
        &self.mailer
    }

    fn construct_mail_message(
        &self,
        from: Mailbox,
        sender: &ResolvedSender,
        input: &SubmissionInput,
    ) -> MailMessage {
        MailMessage {
            from,
            to: self.contact_email.clone(),
            subject: format!("Contact form message from {}", sender.display_name.trim()),
            body: input.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SubmissionDispatcher;
    use crate::{
        config::{
            test_support::{config, fake_friendlycaptcha, CORRECT_CAPTCHA_SOLUTION, SITEKEY},
            ContactConfig,
        },
        error::SubmissionError,
        friendlycaptcha::FriendlyCaptchaVerifier,
        identity::{Identity, Sender},
        mailer::{test_support::FakeMailer, MailMessage, Mailer, MailerError, SmtpMailer},
        secrets::{test_support::FakeSecretRepository, SecretRepository},
        submission::SubmissionInput,
    };
    use googletest::prelude::*;
    use lambda_http::{http::header, Body, Response};
    use lettre::message::Mailbox;
    use std::time::Duration;
    use test_support::{
        fake_friendlycaptcha::UNREACHABLE_VERIFY_URL, fake_smtp::FakeSmtpServer, setup_logging,
    };
    use tokio::time::timeout;

    fn dispatcher<MailerT: Mailer>(
        config: ContactConfig,
        mailer: MailerT,
    ) -> SubmissionDispatcher<MailerT> {
        let verifier = FriendlyCaptchaVerifier::new(config.challenge.clone()).unwrap();
        SubmissionDispatcher::new(&config, verifier, mailer)
    }

    fn anonymous_input() -> SubmissionInput {
        SubmissionInput {
            name: "Arbitrary sender".into(),
            email: "email@example.com".into(),
            message: "Hello!".into(),
            challenge_token: CORRECT_CAPTCHA_SOLUTION.into(),
        }
    }

    fn logged_user() -> Sender {
        Sender::Authenticated(Identity {
            email: "logged@example.com".into(),
            display_name: "Logged User".into(),
        })
    }

    fn flash_cookie(response: &Response<Body>) -> Option<&str> {
        response
            .headers()
            .get(header::SET_COOKIE)
            .map(|value| value.to_str().unwrap())
    }

    #[googletest::test]
    #[tokio::test]
    async fn sends_from_identity_instead_of_submitted_fields() {
        let fake = fake_friendlycaptcha().start().await;
        let subject = dispatcher(config(Some(SITEKEY), fake.verify_url()), FakeMailer::default());
        let input = SubmissionInput {
            name: "Fake Name".into(),
            email: "fake@example.com".into(),
            ..anonymous_input()
        };

        let response = subject.dispatch(&logged_user(), input).await;

        expect_that!(response, ok(anything()));
        expect_that!(
            subject
                .mailer
                .attempts()
                .iter()
                .map(|message| message.from.to_string())
                .collect::<Vec<_>>(),
            elements_are![eq("Logged User <logged@example.com>")]
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn constructs_message_for_site_contact() {
        let fake = fake_friendlycaptcha().start().await;
        let subject = dispatcher(config(Some(SITEKEY), fake.verify_url()), FakeMailer::default());

        subject
            .dispatch(&Sender::Anonymous, anonymous_input())
            .await
            .unwrap();

        expect_that!(
            subject.mailer.attempts(),
            elements_are![eq(MailMessage {
                from: Mailbox::new(
                    Some("Arbitrary sender".into()),
                    "email@example.com".parse().unwrap()
                ),
                to: "Site Owner <owner@example.com>".parse().unwrap(),
                subject: "Contact form message from Arbitrary sender".into(),
                body: "Hello!".into(),
            })]
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn delivers_mail_from_sender_whose_name_needs_quoting() {
        setup_logging();
        let fake = fake_friendlycaptcha().start().await;
        let mut smtp = FakeSmtpServer::default().start();
        let mailer = SmtpMailer::new(FakeSecretRepository::open().await, smtp.url());
        let subject = dispatcher(config(Some(SITEKEY), fake.verify_url()), mailer);
        let input = SubmissionInput {
            name: "Doe, John".into(),
            ..anonymous_input()
        };

        let response = subject.dispatch(&Sender::Anonymous, input).await;

        expect_that!(
            response.map(|response| response.status().as_u16()),
            ok(eq(302))
        );
        expect_that!(
            timeout(Duration::from_secs(10), smtp.next_mail()).await,
            ok(some(all!(
                contains_substring("From: \"Doe, John\" <email@example.com>"),
                contains_substring("Subject: Contact form message from Doe, John")
            )))
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn redirects_with_success_flash_after_sending() {
        let fake = fake_friendlycaptcha().start().await;
        let subject = dispatcher(config(Some(SITEKEY), fake.verify_url()), FakeMailer::default());

        let response = subject
            .dispatch(&Sender::Anonymous, anonymous_input())
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(302));
        expect_that!(
            response.headers().get(header::LOCATION),
            some(eq("/contact"))
        );
        expect_that!(flash_cookie(&response), some(starts_with("contact_flash=sent;")));
    }

    #[googletest::test]
    #[tokio::test]
    async fn does_not_send_when_verifier_is_unreachable() {
        let subject = dispatcher(
            config(Some(SITEKEY), UNREACHABLE_VERIFY_URL.into()),
            FakeMailer::default(),
        );

        let response = subject
            .dispatch(&Sender::Anonymous, anonymous_input())
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(302));
        expect_that!(
            response.headers().get(header::LOCATION),
            some(eq("/contact"))
        );
        expect_that!(
            flash_cookie(&response),
            some(starts_with("contact_flash=rejected;"))
        );
        expect_that!(subject.mailer.attempts(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn does_not_send_when_challenge_fails() {
        let fake = fake_friendlycaptcha().start().await;
        let subject = dispatcher(config(Some(SITEKEY), fake.verify_url()), FakeMailer::default());
        let input = SubmissionInput {
            challenge_token: "incorrect captcha solution".into(),
            ..anonymous_input()
        };

        let response = subject.dispatch(&Sender::Anonymous, input).await.unwrap();

        expect_that!(response.status().as_u16(), eq(302));
        expect_that!(
            response.headers().get(header::LOCATION),
            some(eq("/contact"))
        );
        expect_that!(subject.mailer.attempts(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn does_not_send_when_verifier_returns_invalid_response() {
        let fake = fake_friendlycaptcha().return_invalid_response().start().await;
        let subject = dispatcher(config(Some(SITEKEY), fake.verify_url()), FakeMailer::default());

        let response = subject
            .dispatch(&Sender::Anonymous, anonymous_input())
            .await
            .unwrap();

        expect_that!(response.status().as_u16(), eq(302));
        expect_that!(subject.mailer.attempts(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn escalates_mailer_failure() {
        let fake = fake_friendlycaptcha().start().await;
        let subject = dispatcher(
            config(Some(SITEKEY), fake.verify_url()),
            FakeMailer::failing_with("SMTP down"),
        );

        let result = subject
            .dispatch(&Sender::Anonymous, anonymous_input())
            .await;

        expect_that!(
            result,
            err(matches_pattern!(SubmissionError::DispatchFailed {
                source: matches_pattern!(MailerError::Connection(displays_as(eq("SMTP down")))),
                message: eq("Hello!"),
            }))
        );
        expect_that!(subject.mailer.attempts(), len(eq(1)));
    }

    #[googletest::test]
    #[tokio::test]
    async fn sends_without_verification_when_no_sitekey_is_configured() {
        let fake = fake_friendlycaptcha().start().await;
        let subject = dispatcher(config(None, fake.verify_url()), FakeMailer::default());
        let input = SubmissionInput {
            challenge_token: "".into(),
            ..anonymous_input()
        };

        let response = subject.dispatch(&Sender::Anonymous, input).await.unwrap();

        expect_that!(response.status().as_u16(), eq(302));
        expect_that!(
            response.headers().get(header::LOCATION),
            some(eq("/contact"))
        );
        expect_that!(subject.mailer.attempts(), len(eq(1)));
        expect_that!(fake.request_count(), eq(0));
    }

    #[googletest::test]
    #[tokio::test]
    async fn rejected_and_sent_redirects_share_status_and_location() {
        let fake = fake_friendlycaptcha().start().await;
        let subject = dispatcher(config(Some(SITEKEY), fake.verify_url()), FakeMailer::default());
        let rejected_input = SubmissionInput {
            challenge_token: "incorrect captcha solution".into(),
            ..anonymous_input()
        };

        let sent = subject
            .dispatch(&Sender::Anonymous, anonymous_input())
            .await
            .unwrap();
        let rejected = subject
            .dispatch(&Sender::Anonymous, rejected_input)
            .await
            .unwrap();

        expect_that!(sent.status(), eq(rejected.status()));
        expect_that!(
            sent.headers().get(header::LOCATION),
            eq(rejected.headers().get(header::LOCATION))
        );
    }

    #[googletest::test]
    #[tokio::test]
    async fn redirects_anonymous_submission_without_email_before_verification() {
        let fake = fake_friendlycaptcha().start().await;
        let subject = dispatcher(config(Some(SITEKEY), fake.verify_url()), FakeMailer::default());
        let input = SubmissionInput {
            email: "".into(),
            ..anonymous_input()
        };

        let response = subject.dispatch(&Sender::Anonymous, input).await.unwrap();

        expect_that!(response.status().as_u16(), eq(302));
        expect_that!(
            response.headers().get(header::LOCATION),
            some(eq("/contact"))
        );
        expect_that!(
            flash_cookie(&response),
            some(starts_with("contact_flash=invalid;"))
        );
        expect_that!(fake.request_count(), eq(0));
        expect_that!(subject.mailer.attempts(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn redirects_empty_message_without_sending() {
        let subject = dispatcher(config(None, UNREACHABLE_VERIFY_URL.into()), FakeMailer::default());
        let input = SubmissionInput {
            message: " \n".into(),
            ..anonymous_input()
        };

        let response = subject.dispatch(&Sender::Anonymous, input).await.unwrap();

        expect_that!(response.status().as_u16(), eq(302));
        expect_that!(
            response.headers().get(header::LOCATION),
            some(eq("/contact"))
        );
        expect_that!(
            flash_cookie(&response),
            some(starts_with("contact_flash=invalid;"))
        );
        expect_that!(subject.mailer.attempts(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn redirects_unparseable_anonymous_email_without_sending() {
        let fake = fake_friendlycaptcha().start().await;
        let subject = dispatcher(config(Some(SITEKEY), fake.verify_url()), FakeMailer::default());
        let input = SubmissionInput {
            name: "Visitor".into(),
            email: "not an address".into(),
            ..anonymous_input()
        };

        let response = subject.dispatch(&Sender::Anonymous, input).await.unwrap();

        expect_that!(response.status().as_u16(), eq(302));
        expect_that!(
            flash_cookie(&response),
            some(starts_with("contact_flash=invalid;"))
        );
        expect_that!(fake.request_count(), eq(0));
        expect_that!(subject.mailer.attempts(), empty());
    }

    #[googletest::test]
    #[tokio::test]
    async fn sends_when_anonymous_name_contains_comma() {
        let fake = fake_friendlycaptcha().start().await;
        let subject = dispatcher(config(Some(SITEKEY), fake.verify_url()), FakeMailer::default());
        let input = SubmissionInput {
            name: "Doe, John".into(),
            ..anonymous_input()
        };

        let response = subject.dispatch(&Sender::Anonymous, input).await.unwrap();

        expect_that!(
            flash_cookie(&response),
            some(starts_with("contact_flash=sent;"))
        );
        expect_that!(
            subject.mailer.attempts(),
            elements_are![field!(
                MailMessage.from,
                eq(Mailbox::new(
                    Some("Doe, John".into()),
                    "email@example.com".parse().unwrap()
                ))
            )]
        );
    }
}

use crate::{error_page::render_error_page, mailer::MailerError};
use lambda_http::{
    http::{header, StatusCode},
    Body, Response,
};
use thiserror::Error;

/// The only way a submission leaves the dispatcher other than as a redirect. Problems with the
/// visitor's input never end up here.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The mail transport failed. Not recoverable here; the surrounding layer reports it and
    /// shows an error page which still contains `message`, so that nothing the visitor wrote is
    /// lost.
    #[error("Error dispatching contact form message: {source}")]
    DispatchFailed {
        #[source]
        source: MailerError,
        message: String,
    },
}

impl SubmissionError {
    pub fn log(&self) {
        match self {
            SubmissionError::DispatchFailed { source, .. } => {
                tracing::error!("Internal error sending contact form email: {source}");
            }
        }
    }

    pub fn into_response(self, form_path: &str) -> Response<Body> {
        match self {
            SubmissionError::DispatchFailed { message, .. } => {
                match render_error_page(&message, form_path) {
                    Ok(page) => Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
                        .body(page.into())
                        .unwrap(),
                    Err(error) => {
                        tracing::error!("Unable to render error page: {error}");
                        Response::builder()
                            .status(StatusCode::INTERNAL_SERVER_ERROR)
                            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
                            .body("Something went wrong. Your message was not sent.".into())
                            .unwrap()
                    }
                }
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for environment variable {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Missing secret {0}")]
    MissingSecret(&'static str),
}

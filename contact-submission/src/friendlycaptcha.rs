use crate::config::ChallengeConfig;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// Result of checking one submission's challenge solution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// No site key is configured, so nothing was checked.
    Skipped,
    Passed,
    Failed,
    /// The verification service could not be reached or gave an unusable answer.
    VerifierUnavailable,
}

impl ChallengeOutcome {
    pub fn permits_dispatch(&self) -> bool {
        match self {
            ChallengeOutcome::Skipped | ChallengeOutcome::Passed => true,
            ChallengeOutcome::Failed | ChallengeOutcome::VerifierUnavailable => false,
        }
    }
}

pub struct FriendlyCaptchaVerifier {
    config: ChallengeConfig,
    client: Client,
}

#[derive(Serialize)]
struct FriendlyCaptchaVerifyPayload<'a> {
    solution: &'a str,
    secret: &'a str,
    sitekey: &'a str,
}

#[derive(Deserialize)]
struct FriendlyCaptchaResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<String>,
}

impl FriendlyCaptchaVerifier {
    pub fn new(config: ChallengeConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    /// Makes at most one request to the verification service. Never fails: problems on the
    /// service's side come back as [`ChallengeOutcome::VerifierUnavailable`].
    pub async fn verify_token(&self, solution: &str) -> ChallengeOutcome {
        let Some(sitekey) = self.config.site_key.as_deref() else {
            debug!("No FriendlyCaptcha sitekey configured, skipping verification.");
            return ChallengeOutcome::Skipped;
        };
        let payload = FriendlyCaptchaVerifyPayload {
            solution,
            secret: &self.config.secret,
            sitekey,
        };
        let response = match self
            .client
            .post(&self.config.verify_url)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!("Error verifying FriendlyCaptcha solution: {error}");
                return ChallengeOutcome::VerifierUnavailable;
            }
        };
        let status = response.status();
        if status.is_server_error() {
            warn!("FriendlyCaptcha returned status {status}, treating verifier as unavailable");
            return ChallengeOutcome::VerifierUnavailable;
        }
        let response_body: FriendlyCaptchaResponse = match response.json().await {
            Ok(body) => body,
            Err(error) => {
                warn!("Error fetching body from FriendlyCaptcha (status {status}): {error}");
                return ChallengeOutcome::VerifierUnavailable;
            }
        };
        if response_body.success {
            return ChallengeOutcome::Passed;
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
            error!(
                "FriendlyCaptcha rejected our credentials (status {status}): {:?}",
                response_body.errors
            );
        } else {
            warn!(
                "FriendlyCaptcha solution rejected: {:?}",
                response_body.errors
            );
        }
        ChallengeOutcome::Failed
    }
}

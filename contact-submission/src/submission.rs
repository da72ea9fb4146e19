use serde::Deserialize;

/// Fields of the contact form as posted by the browser. Nothing here is trusted, and missing
/// fields decode as empty. Other fields, such as the CSRF token, are handled before this point
/// and ignored.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct SubmissionInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "frc-captcha-solution")]
    pub challenge_token: String,
}

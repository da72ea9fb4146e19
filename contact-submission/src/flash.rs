use lambda_http::{
    http::{header, StatusCode},
    Body, Response,
};

const FLASH_COOKIE_NAME: &str = "contact_flash";
const FLASH_MAX_AGE_SECONDS: u32 = 60;

/// One-shot feedback for the next rendering of the contact form. The form renderer reads and
/// clears the cookie.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flash {
    Sent,
    /// The challenge failed or could not be checked.
    Rejected,
    /// The submission was incomplete or named an unusable sender address.
    Invalid,
}

impl Flash {
    fn value(self) -> &'static str {
        match self {
            Flash::Sent => "sent",
            Flash::Rejected => "rejected",
            Flash::Invalid => "invalid",
        }
    }

    fn cookie(self, form_path: &str) -> String {
        format!(
            "{FLASH_COOKIE_NAME}={}; Path={form_path}; Max-Age={FLASH_MAX_AGE_SECONDS}; HttpOnly; \
             Secure; SameSite=Lax",
            self.value()
        )
    }
}

/// A 302 back to the form carrying `flash`. Every outcome which ends in a redirect goes through
/// here so that they differ only in the cookie value.
pub fn redirect_with_flash(form_path: &str, flash: Flash) -> Response<Body> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, form_path)
        .header(header::SET_COOKIE, flash.cookie(form_path))
        .body(Body::Empty)
        .unwrap()
}

use crate::submission::SubmissionInput;
use lambda_http::{request::RequestContext, Request, RequestExt};
use lettre::{address::AddressError, message::Mailbox};
use std::collections::HashMap;

/// Verified identity of a logged-in visitor, established upstream by the API Gateway JWT
/// authorizer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
    pub display_name: String,
}

/// Who is submitting the form, as far as the request context can tell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sender {
    Authenticated(Identity),
    Anonymous,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSender {
    pub display_name: String,
    pub email: String,
}

impl Identity {
    pub fn from_request(request: &Request) -> Option<Self> {
        let Some(RequestContext::ApiGatewayV2(context)) = request.request_context_ref() else {
            return None;
        };
        let jwt = context.authorizer.as_ref()?.jwt.as_ref()?;
        Self::from_claims(&jwt.claims)
    }

    pub fn from_claims(claims: &HashMap<String, String>) -> Option<Self> {
        let claim = |name: &str| claims.get(name).filter(|value| !value.trim().is_empty());
        if claim("email_verified").is_some_and(|verified| verified == "false") {
            return None;
        }
        let email = claim("email")?;
        let display_name = claim("name")
            .or_else(|| claim("preferred_username"))
            .unwrap_or(email);
        Some(Self {
            email: email.clone(),
            display_name: display_name.clone(),
        })
    }
}

impl From<Option<Identity>> for Sender {
    fn from(identity: Option<Identity>) -> Self {
        identity.map_or(Sender::Anonymous, Sender::Authenticated)
    }
}

/// Once an identity is known, the `name` and `email` fields of the form are never looked at.
pub fn resolve_sender(sender: &Sender, input: &SubmissionInput) -> ResolvedSender {
    match sender {
        Sender::Authenticated(identity) => ResolvedSender {
            display_name: identity.display_name.clone(),
            email: identity.email.clone(),
        },
        Sender::Anonymous => ResolvedSender {
            display_name: input.name.clone(),
            email: input.email.clone(),
        },
    }
}

impl ResolvedSender {
    pub fn is_complete(&self) -> bool {
        !self.display_name.trim().is_empty() && !self.email.trim().is_empty()
    }

    /// The sender as a mailbox. Only the address is parsed; the display name is taken as is and
    /// quoted when the mail is written.
    pub fn mailbox(&self) -> Result<Mailbox, AddressError> {
        Ok(Mailbox::new(
            Some(self.display_name.trim().into()),
            self.email.trim().parse()?,
        ))
    }
}

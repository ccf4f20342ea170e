//! User-facing text. Every message the coordinator shows comes from here so a
//! deployment can override the wording.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Message {
    OauthHandshakeError,
    IdentityNotRegistered,
    DisabledAccount,
    AlreadyAuthenticated,
    CsrfMissing,
    CsrfInvalid,
}

impl Message {
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::OauthHandshakeError => "OAUTH_HANDSHAKE_ERROR",
            Self::IdentityNotRegistered => "IDENTITY_NOT_REGISTERED",
            Self::DisabledAccount => "DISABLED_ACCOUNT",
            Self::AlreadyAuthenticated => "ALREADY_AUTHENTICATED",
            Self::CsrfMissing => "CSRF_MISSING",
            Self::CsrfInvalid => "CSRF_INVALID",
        }
    }

    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        [
            Self::OauthHandshakeError,
            Self::IdentityNotRegistered,
            Self::DisabledAccount,
            Self::AlreadyAuthenticated,
            Self::CsrfMissing,
            Self::CsrfInvalid,
        ]
        .into_iter()
        .find(|message| message.key() == key)
    }

    fn default_template(self) -> &'static str {
        match self {
            Self::OauthHandshakeError => {
                "An error occurred while communicating with the Oauth provider: ({exerror} - {exdesc}). Please try again."
            }
            Self::IdentityNotRegistered => "Identity {id} not registered",
            Self::DisabledAccount => "Account is disabled.",
            Self::AlreadyAuthenticated => "You can only access this endpoint when not logged in.",
            Self::CsrfMissing => "The CSRF token is missing.",
            Self::CsrfInvalid => "The CSRF token is invalid.",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MessageCatalog {
    overrides: HashMap<Message, String>,
}

impl MessageCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the template for one message; `{name}` placeholders are kept.
    #[must_use]
    pub fn with_template(mut self, message: Message, template: impl Into<String>) -> Self {
        self.overrides.insert(message, template.into());
        self
    }

    #[must_use]
    pub fn template(&self, message: Message) -> &str {
        self.overrides
            .get(&message)
            .map(String::as_str)
            .unwrap_or_else(|| message.default_template())
    }

    /// Render a message, substituting `{name}` placeholders from `args`.
    ///
    /// The template is scanned once; substituted values are never re-expanded
    /// and unknown placeholders are kept verbatim.
    #[must_use]
    pub fn render(&self, message: Message, args: &[(&str, &str)]) -> String {
        let mut rest = self.template(message);
        let mut text = String::with_capacity(rest.len());
        while let Some(open) = rest.find('{') {
            text.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let value = after.find('}').and_then(|close| {
                let name = &after[..close];
                args.iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (*value, close))
            });
            match value {
                Some((value, close)) => {
                    text.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    text.push('{');
                    rest = after;
                }
            }
        }
        text.push_str(rest);
        text
    }

    #[must_use]
    pub fn handshake_error(&self, error: &str, description: &str) -> String {
        self.render(
            Message::OauthHandshakeError,
            &[("exerror", error), ("exdesc", description)],
        )
    }

    #[must_use]
    pub fn identity_not_registered(&self, id: &str) -> String {
        self.render(Message::IdentityNotRegistered, &[("id", id)])
    }
}

//! Federated login through external OAuth providers.
//!
//! `OAuthCoordinator` drives the handshake. Providers live in a
//! `ProviderRegistry`, each pairing an `OAuthClient` (the library seam) with an
//! identity extractor. Per-attempt state is a `HandshakeState` stored in the
//! caller's session under a single key, so a session has at most one
//! handshake in flight.

mod client;
mod config;
mod coordinator;
mod handshake;
mod messages;
mod provider;
mod registry;
mod upstream;

#[cfg(test)]
pub(crate) mod tests;

pub use client::{
    AuthorizationRequest, CallbackParams, OAuthClient, OAuthToken, ProtocolError,
};
pub use config::{OAuthConfig, RedirectBehavior};
pub use coordinator::{
    CallbackError, CallbackOutcome, OAuthCoordinator, StartError, StartOutcome, StartRequest,
};
pub use handshake::{HANDSHAKE_KEY, HandshakeState, safe_next};
pub use messages::{Message, MessageCatalog};
pub use provider::{
    GITHUB, GOOGLE, IdentityClaim, IdentityExtractor, OAuthProvider, Provider, UserInfoClaim,
    github, google,
};
pub use registry::ProviderRegistry;
pub use upstream::UpstreamClient;

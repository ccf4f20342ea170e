//! # Federa (Federated Login Coordinator)
//!
//! `federa` signs users in through external OAuth providers and binds the
//! resulting identity to an existing local account. It never creates accounts.
//!
//! ## Handshake
//!
//! A login attempt spans three requests:
//!
//! 1. `POST /login/oauthstart/{provider}` stashes the handshake (provider,
//!    library state token, requested `next`, API flag) in the caller's session
//!    and redirects to the provider.
//! 2. The provider authenticates the user and redirects back.
//! 3. `GET|POST /login/oauthresponse/{provider}` consumes the stashed handshake,
//!    exchanges the code, extracts a single identity claim and resolves it
//!    against the user store.
//!
//! Only one handshake exists per session; starting a new one replaces the
//! previous one. The handshake is removed on every callback, successful or not.
//!
//! ## Failure Routing
//!
//! Browser callers get a flashed message and a redirect to the login-error view.
//! SPA callers are redirected to the configured UI host with the error (and the
//! unmatched identity, when there is one) as query parameters. Providers may
//! override routing for protocol errors.

pub mod api;
pub mod cli;
pub mod csrf;
pub mod mfa;
pub mod oauth;
pub mod session;
pub mod users;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}

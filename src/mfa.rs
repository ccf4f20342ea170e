//! Two-factor gating applied after a federated identity resolves.
//!
//! A resolved user whose (effective) MFA state is not `disabled` is not logged
//! in directly. Instead a pending record is stashed in the session and the
//! caller is sent to the setup or verification view owned by the two-factor
//! subsystem, which finishes the login.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub const TF_PENDING_KEY: &str = "tf_pending";

const DEFAULT_SETUP_VIEW: &str = "/tf-setup";
const DEFAULT_VERIFY_VIEW: &str = "/tf-validate";

/// Logical MFA state for a user.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MfaState {
    #[default]
    Disabled,
    RequiredUnenrolled,
    Enabled,
}

impl MfaState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::RequiredUnenrolled => "required_unenrolled",
            Self::Enabled => "enabled",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "disabled" => Some(Self::Disabled),
            "required_unenrolled" => Some(Self::RequiredUnenrolled),
            "enabled" => Some(Self::Enabled),
            _ => None,
        }
    }
}

/// Enforce required MFA by mapping non-enabled states to `required_unenrolled`.
#[must_use]
pub fn enforce_required_state(required: bool, state: MfaState) -> MfaState {
    if required && state != MfaState::Enabled {
        MfaState::RequiredUnenrolled
    } else {
        state
    }
}

/// Login waiting on a second factor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTwoFactor {
    pub user_id: Uuid,
    pub state: MfaState,
    pub next: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MfaConfig {
    required: bool,
    setup_view: String,
    verify_view: String,
}

impl MfaConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            required: false,
            setup_view: DEFAULT_SETUP_VIEW.to_string(),
            verify_view: DEFAULT_VERIFY_VIEW.to_string(),
        }
    }

    #[must_use]
    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    #[must_use]
    pub fn with_setup_view(mut self, view: String) -> Self {
        self.setup_view = view;
        self
    }

    #[must_use]
    pub fn with_verify_view(mut self, view: String) -> Self {
        self.verify_view = view;
        self
    }

    #[must_use]
    pub fn required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn setup_view(&self) -> &str {
        &self.setup_view
    }

    #[must_use]
    pub fn verify_view(&self) -> &str {
        &self.verify_view
    }

    /// Effective state for a user plus the view that handles it, or `None` when
    /// the login can complete without a second factor.
    #[must_use]
    pub fn route(&self, state: MfaState) -> Option<(MfaState, &str)> {
        match enforce_required_state(self.required, state) {
            MfaState::Disabled => None,
            effective @ MfaState::RequiredUnenrolled => Some((effective, self.setup_view())),
            effective @ MfaState::Enabled => Some((effective, self.verify_view())),
        }
    }
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mfa_state_round_trips_strings() {
        for state in [
            MfaState::Disabled,
            MfaState::RequiredUnenrolled,
            MfaState::Enabled,
        ] {
            assert_eq!(MfaState::parse(state.as_str()), Some(state));
        }
        assert_eq!(MfaState::parse("bogus"), None);
    }

    #[test]
    fn enforce_required_promotes_disabled() {
        assert_eq!(
            enforce_required_state(true, MfaState::Disabled),
            MfaState::RequiredUnenrolled
        );
        assert_eq!(
            enforce_required_state(true, MfaState::Enabled),
            MfaState::Enabled
        );
        assert_eq!(
            enforce_required_state(false, MfaState::Disabled),
            MfaState::Disabled
        );
    }

    #[test]
    fn route_picks_view_by_state() {
        let config = MfaConfig::new();
        assert_eq!(config.route(MfaState::Disabled), None);
        assert_eq!(
            config.route(MfaState::Enabled),
            Some((MfaState::Enabled, "/tf-validate"))
        );

        let config = config
            .with_required(true)
            .with_setup_view("/mfa/setup".to_string());
        assert_eq!(
            config.route(MfaState::Disabled),
            Some((MfaState::RequiredUnenrolled, "/mfa/setup"))
        );
    }
}

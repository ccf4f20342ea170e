use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::oauth::RedirectBehavior;
use crate::session::SameSite;

pub const ARG_OAUTH_ENABLE: &str = "oauth-enable";
pub const ARG_BASE_URL: &str = "base-url";
pub const ARG_POST_LOGIN_VIEW: &str = "post-login-view";
pub const ARG_LOGIN_ERROR_VIEW: &str = "login-error-view";
pub const ARG_POST_OAUTH_LOGIN_VIEW: &str = "post-oauth-login-view";
pub const ARG_REDIRECT_BEHAVIOR: &str = "redirect-behavior";
pub const ARG_REDIRECT_HOST: &str = "redirect-host";
pub const ARG_CSRF_PROTECT: &str = "csrf-protect";
pub const ARG_CSRF_IGNORE_UNAUTH: &str = "csrf-ignore-unauth-endpoints";
pub const ARG_TF_REQUIRED: &str = "tf-required";
pub const ARG_TF_SETUP_VIEW: &str = "tf-setup-view";
pub const ARG_TF_VERIFY_VIEW: &str = "tf-verify-view";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_COOKIE_SAME_SITE: &str = "cookie-same-site";

#[derive(Debug, Clone)]
pub struct Options {
    pub enabled: bool,
    pub base_url: String,
    pub post_login_view: String,
    pub login_error_view: String,
    pub post_oauth_login_view: Option<String>,
    pub redirect_behavior: RedirectBehavior,
    pub redirect_host: Option<String>,
    pub csrf_protect: bool,
    pub csrf_ignore_unauth_endpoints: bool,
    pub tf_required: bool,
    pub tf_setup_view: String,
    pub tf_verify_view: String,
    pub session_ttl_seconds: u64,
    pub cookie_secure: bool,
    pub cookie_same_site: SameSite,
}

impl Options {
    /// Parse login flow arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a value is missing or the redirect behavior is unknown.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let read_string = |id: &str| -> Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };
        let read_optional = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let read_flag = |id: &str| matches.get_one::<bool>(id).copied().unwrap_or(false);

        let redirect_behavior = RedirectBehavior::parse(&read_string(ARG_REDIRECT_BEHAVIOR)?)
            .with_context(|| format!("invalid --{ARG_REDIRECT_BEHAVIOR}"))?;
        let cookie_same_site = SameSite::parse(&read_string(ARG_COOKIE_SAME_SITE)?)
            .with_context(|| format!("invalid --{ARG_COOKIE_SAME_SITE}"))?;

        Ok(Self {
            enabled: read_flag(ARG_OAUTH_ENABLE),
            base_url: read_string(ARG_BASE_URL)?,
            post_login_view: read_string(ARG_POST_LOGIN_VIEW)?,
            login_error_view: read_string(ARG_LOGIN_ERROR_VIEW)?,
            post_oauth_login_view: read_optional(ARG_POST_OAUTH_LOGIN_VIEW),
            redirect_behavior,
            redirect_host: read_optional(ARG_REDIRECT_HOST),
            csrf_protect: read_flag(ARG_CSRF_PROTECT),
            csrf_ignore_unauth_endpoints: read_flag(ARG_CSRF_IGNORE_UNAUTH),
            tf_required: read_flag(ARG_TF_REQUIRED),
            tf_setup_view: read_string(ARG_TF_SETUP_VIEW)?,
            tf_verify_view: read_string(ARG_TF_VERIFY_VIEW)?,
            session_ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(43200),
            cookie_secure: read_flag(ARG_COOKIE_SECURE),
            cookie_same_site,
        })
    }
}

fn flag(id: &'static str, env: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .num_args(0..=1)
        .default_missing_value("true")
        .action(ArgAction::Set)
        .value_parser(clap::value_parser!(bool))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_view_args(command);
    let command = with_security_args(command);
    with_session_args(command)
}

fn with_view_args(command: Command) -> Command {
    command
        .arg(flag(
            ARG_OAUTH_ENABLE,
            "FEDERA_OAUTH_ENABLE",
            "true",
            "Expose the federated login endpoints",
        ))
        .arg(
            Arg::new(ARG_BASE_URL)
                .long(ARG_BASE_URL)
                .help("Externally visible base URL used to build provider callback URLs")
                .env("FEDERA_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_POST_LOGIN_VIEW)
                .long(ARG_POST_LOGIN_VIEW)
                .help("Where browser callers land after a successful login")
                .env("FEDERA_POST_LOGIN_VIEW")
                .default_value("/"),
        )
        .arg(
            Arg::new(ARG_LOGIN_ERROR_VIEW)
                .long(ARG_LOGIN_ERROR_VIEW)
                .help("Where callers are sent when the login fails")
                .env("FEDERA_LOGIN_ERROR_VIEW")
                .default_value("/login"),
        )
        .arg(
            Arg::new(ARG_POST_OAUTH_LOGIN_VIEW)
                .long(ARG_POST_OAUTH_LOGIN_VIEW)
                .help("UI view for API callers after a successful login (defaults to --post-login-view)")
                .env("FEDERA_POST_OAUTH_LOGIN_VIEW"),
        )
        .arg(
            Arg::new(ARG_REDIRECT_BEHAVIOR)
                .long(ARG_REDIRECT_BEHAVIOR)
                .help("Result delivery for API callers: classic or spa")
                .env("FEDERA_REDIRECT_BEHAVIOR")
                .default_value("classic"),
        )
        .arg(
            Arg::new(ARG_REDIRECT_HOST)
                .long(ARG_REDIRECT_HOST)
                .help("UI host (host[:port] or URL) that SPA redirects point at")
                .env("FEDERA_REDIRECT_HOST"),
        )
}

fn with_security_args(command: Command) -> Command {
    command
        .arg(flag(
            ARG_CSRF_PROTECT,
            "FEDERA_CSRF_PROTECT",
            "true",
            "Require a CSRF token when starting a login",
        ))
        .arg(flag(
            ARG_CSRF_IGNORE_UNAUTH,
            "FEDERA_CSRF_IGNORE_UNAUTH_ENDPOINTS",
            "false",
            "Skip the CSRF check for callers that are not logged in",
        ))
        .arg(flag(
            ARG_TF_REQUIRED,
            "FEDERA_TF_REQUIRED",
            "false",
            "Require a second factor for every login",
        ))
        .arg(
            Arg::new(ARG_TF_SETUP_VIEW)
                .long(ARG_TF_SETUP_VIEW)
                .help("View that enrolls a second factor")
                .env("FEDERA_TF_SETUP_VIEW")
                .default_value("/tf-setup"),
        )
        .arg(
            Arg::new(ARG_TF_VERIFY_VIEW)
                .long(ARG_TF_VERIFY_VIEW)
                .help("View that verifies a second factor")
                .env("FEDERA_TF_VERIFY_VIEW")
                .default_value("/tf-validate"),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie TTL in seconds")
                .env("FEDERA_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(flag(
            ARG_COOKIE_SECURE,
            "FEDERA_COOKIE_SECURE",
            "false",
            "Mark the session cookie Secure",
        ))
        .arg(
            Arg::new(ARG_COOKIE_SAME_SITE)
                .long(ARG_COOKIE_SAME_SITE)
                .help("SameSite attribute of the session cookie: strict, lax or none (none implies Secure; needed for form_post callbacks)")
                .env("FEDERA_COOKIE_SAME_SITE")
                .default_value("lax"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> Command {
        with_args(Command::new("federa"))
    }

    #[test]
    fn defaults() -> Result<()> {
        temp_env::with_vars_unset(
            [
                "FEDERA_REDIRECT_BEHAVIOR",
                "FEDERA_REDIRECT_HOST",
                "FEDERA_POST_OAUTH_LOGIN_VIEW",
                "FEDERA_CSRF_PROTECT",
                "FEDERA_COOKIE_SAME_SITE",
            ],
            || {
                let matches = command().try_get_matches_from(["federa"])?;
                let options = Options::parse(&matches)?;
                assert!(options.enabled);
                assert!(options.csrf_protect);
                assert!(!options.csrf_ignore_unauth_endpoints);
                assert!(!options.tf_required);
                assert_eq!(options.post_login_view, "/");
                assert_eq!(options.login_error_view, "/login");
                assert_eq!(options.post_oauth_login_view, None);
                assert_eq!(options.redirect_behavior, RedirectBehavior::Classic);
                assert_eq!(options.session_ttl_seconds, 43200);
                assert_eq!(options.cookie_same_site, SameSite::Lax);
                Ok(())
            },
        )
    }

    #[test]
    fn spa_from_env() {
        temp_env::with_vars(
            [
                ("FEDERA_REDIRECT_BEHAVIOR", Some("spa")),
                ("FEDERA_REDIRECT_HOST", Some("myui.com:8090")),
                ("FEDERA_POST_OAUTH_LOGIN_VIEW", Some("/post-login")),
                ("FEDERA_CSRF_PROTECT", Some("false")),
            ],
            || {
                let matches = command().get_matches_from(["federa"]);
                let options = Options::parse(&matches);
                assert!(options.is_ok());
                if let Ok(options) = options {
                    assert_eq!(options.redirect_behavior, RedirectBehavior::Spa);
                    assert_eq!(options.redirect_host.as_deref(), Some("myui.com:8090"));
                    assert_eq!(options.post_oauth_login_view.as_deref(), Some("/post-login"));
                    assert!(!options.csrf_protect);
                }
            },
        );
    }

    #[test]
    fn bare_flag_means_true() -> Result<()> {
        let matches = command().try_get_matches_from(["federa", "--tf-required", "--cookie-secure"])?;
        let options = Options::parse(&matches)?;
        assert!(options.tf_required);
        assert!(options.cookie_secure);
        Ok(())
    }

    #[test]
    fn cookie_same_site_from_env() {
        temp_env::with_var("FEDERA_COOKIE_SAME_SITE", Some("none"), || {
            let options = command()
                .try_get_matches_from(["federa"])
                .map_err(anyhow::Error::from)
                .and_then(|matches| Options::parse(&matches));
            assert!(matches!(
                options,
                Ok(Options {
                    cookie_same_site: SameSite::None,
                    ..
                })
            ));
        });
    }

    #[test]
    fn unknown_cookie_same_site_is_rejected() -> Result<()> {
        let matches = command().try_get_matches_from(["federa", "--cookie-same-site", "sometimes"])?;
        assert!(Options::parse(&matches).is_err());
        Ok(())
    }

    #[test]
    fn unknown_redirect_behavior_is_rejected() -> Result<()> {
        let matches = command().try_get_matches_from(["federa", "--redirect-behavior", "popup"])?;
        assert!(Options::parse(&matches).is_err());
        Ok(())
    }
}

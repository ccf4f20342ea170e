use anyhow::{Result, anyhow};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_GITHUB_CLIENT_ID: &str = "github-client-id";
pub const ARG_GITHUB_CLIENT_SECRET: &str = "github-client-secret";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_GOOGLE_CLIENT_SECRET: &str = "google-client-secret";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

/// Provider credentials; a provider is registered only when its pair is set.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub github: Option<Credentials>,
    pub google: Option<Credentials>,
}

fn credentials(matches: &ArgMatches, id_arg: &str, secret_arg: &str) -> Result<Option<Credentials>> {
    let read = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };
    match (read(id_arg), read(secret_arg)) {
        (Some(client_id), Some(secret)) => Ok(Some(Credentials {
            client_id,
            client_secret: SecretString::from(secret),
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(anyhow!("missing required argument: --{secret_arg}")),
        (None, Some(_)) => Err(anyhow!("missing required argument: --{id_arg}")),
    }
}

impl Options {
    /// Parse provider credentials from matches.
    ///
    /// # Errors
    /// Returns an error if only half of a credential pair is present.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            github: credentials(matches, ARG_GITHUB_CLIENT_ID, ARG_GITHUB_CLIENT_SECRET)?,
            google: credentials(matches, ARG_GOOGLE_CLIENT_ID, ARG_GOOGLE_CLIENT_SECRET)?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GITHUB_CLIENT_ID)
                .long(ARG_GITHUB_CLIENT_ID)
                .help("GitHub OAuth app client id")
                .env("FEDERA_GITHUB_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_GITHUB_CLIENT_SECRET)
                .long(ARG_GITHUB_CLIENT_SECRET)
                .help("GitHub OAuth app client secret")
                .env("FEDERA_GITHUB_CLIENT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id")
                .env("FEDERA_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_SECRET)
                .long(ARG_GOOGLE_CLIENT_SECRET)
                .help("Google OAuth client secret")
                .env("FEDERA_GOOGLE_CLIENT_SECRET")
                .hide_env_values(true),
        )
}

//! CLI configuration: thin wrapper around `ecosync_config` shared types.
//!
//! Adds CLI-specific resolution that respects `GlobalOpts` flag overrides
//! (--api-url, --token, --data-dir, etc.).

use secrecy::SecretString;

use ecosync_config::ConfigError;
use ecosync_core::EngineConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use ecosync_config::{Config, Profile, config_path, load_config_or_default, save_config};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the engine config from the config file, profile, and CLI overrides.
///
/// Without a matching profile the backend URL must come from `--api-url`.
pub fn build_engine_config(global: &GlobalOpts) -> Result<EngineConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let base = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.profile.is_some() => {
            let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            });
        }
        None => {
            if global.api_url.is_none() {
                return Err(CliError::NoConfig {
                    path: config_path().display().to_string(),
                });
            }
            Profile::default()
        }
    };

    let profile = apply_overrides(base, global);
    let token = resolve_token_with_flag(&profile, &profile_name, global)?;
    Ok(ecosync_config::engine_config(&profile, &profile_name, token)?)
}

/// CLI flags take priority over profile values.
fn apply_overrides(mut profile: Profile, global: &GlobalOpts) -> Profile {
    if let Some(ref url) = global.api_url {
        profile.api_url.clone_from(url);
    }
    if let Some(ref url) = global.feed_url {
        profile.feed_url = Some(url.clone());
    }
    if let Some(ref dir) = global.data_dir {
        profile.data_dir = Some(dir.clone());
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(secs) = global.timeout {
        profile.timeout = Some(secs);
    }
    profile
}

/// The `--token` flag wins; otherwise fall through to the shared chain.
///
/// A missing token is not an error here: queue inspection and offline
/// enqueueing work without one, and the backend reports 401 otherwise.
fn resolve_token_with_flag(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<Option<SecretString>, CliError> {
    if let Some(ref token) = global.token {
        return Ok(Some(SecretString::from(token.clone())));
    }
    match ecosync_config::resolve_token(profile, profile_name) {
        Ok(token) => Ok(Some(token)),
        Err(ConfigError::NoCredentials { .. }) => {
            tracing::debug!(profile = profile_name, "no token configured");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["ecosync"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["queue", "list"]);
        Cli::parse_from(argv).global
    }

    #[test]
    fn flags_override_profile_values() {
        let base = Profile {
            api_url: "https://api.example.org".into(),
            timeout: Some(5),
            ..Profile::default()
        };
        let opts = global(&["--api-url", "http://localhost:8080", "--timeout", "60", "-k"]);
        let merged = apply_overrides(base, &opts);
        assert_eq!(merged.api_url, "http://localhost:8080");
        assert_eq!(merged.timeout, Some(60));
        assert_eq!(merged.insecure, Some(true));
    }

    #[test]
    fn explicit_profile_flag_wins_over_default() {
        let cfg = Config {
            default_profile: Some("home".into()),
            ..Config::default()
        };
        let opts = global(&["--profile", "field"]);
        assert_eq!(active_profile_name(&opts, &cfg), "field");
    }

    #[test]
    fn token_flag_short_circuits_the_chain() {
        let opts = global(&["--token", "abc"]);
        let token = resolve_token_with_flag(&Profile::default(), "default", &opts)
            .expect("token resolves");
        assert!(token.is_some());
    }
}

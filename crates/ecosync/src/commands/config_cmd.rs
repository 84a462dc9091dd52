//! Config subcommand handlers.

use std::fmt::Write as _;
use std::io::{self, BufRead};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

const KEYRING_SERVICE: &str = "ecosync";

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking the token.
fn format_config_redacted(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "insecure = {}", cfg.defaults.insecure);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let Some(p) = cfg.profiles.get(name) else {
            continue;
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "api_url = \"{}\"", p.api_url);
        if let Some(ref feed) = p.feed_url {
            let _ = writeln!(out, "feed_url = \"{feed}\"");
        }
        if p.token.is_some() {
            let _ = writeln!(out, "token = \"****\"");
        }
        if let Some(ref env) = p.token_env {
            let _ = writeln!(out, "token_env = \"{env}\"");
        }
        if let Some(ref dir) = p.data_dir {
            let _ = writeln!(out, "data_dir = \"{}\"", dir.display());
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        if let Some(timeout) = p.network_timeout {
            let _ = writeln!(out, "network_timeout = {timeout}");
        }
        if let Some(hours) = p.cache_ttl_hours {
            let _ = writeln!(out, "cache_ttl_hours = {hours}");
        }
        if let Some(attempts) = p.max_attempts {
            let _ = writeln!(out, "max_attempts = {attempts}");
        }
        if let Some(mb) = p.storage_quota_mb {
            let _ = writeln!(out, "storage_quota_mb = {mb}");
        }
    }

    out
}

/// Structured view of the config with tokens masked.
fn redacted_value(cfg: &Config) -> Result<serde_json::Value, CliError> {
    let mut value = serde_json::to_value(cfg)?;
    if let Some(profiles) = value
        .get_mut("profiles")
        .and_then(serde_json::Value::as_object_mut)
    {
        for profile in profiles.values_mut() {
            if let Some(token) = profile.get_mut("token").filter(|t| !t.is_null()) {
                *token = serde_json::Value::String("****".into());
            }
        }
    }
    Ok(value)
}

fn save_config(cfg: &Config) -> Result<(), CliError> {
    config::save_config(cfg)?;
    Ok(())
}

fn profile_not_found(name: String, cfg: &Config) -> CliError {
    let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
    available.sort();
    CliError::ProfileNotFound {
        name,
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let view = redacted_value(&cfg)?;
            let out = output::render_single(
                &global.output,
                &view,
                |_| format_config_redacted(&cfg),
                |_| config::config_path().display().to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: ecosync config add <name> --api-url <url>");
            } else {
                let mut names: Vec<_> = cfg.profiles.keys().collect();
                names.sort();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        ConfigCommand::Add {
            name,
            api_url,
            feed_url,
        } => {
            let mut cfg = config::load_config_or_default();
            let profile = Profile {
                api_url,
                feed_url,
                ..cfg.profiles.get(&name).cloned().unwrap_or_default()
            };
            // Surface bad URLs now rather than on first use.
            ecosync_config::engine_config(&profile, &name, None)?;

            let first = cfg.profiles.is_empty();
            cfg.profiles.insert(name.clone(), profile);
            if first {
                cfg.default_profile = Some(name.clone());
            }
            save_config(&cfg)?;
            if !global.quiet {
                eprintln!("✓ Profile '{name}' saved to {}", config::config_path().display());
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(profile_not_found(name, &cfg));
            }
            cfg.default_profile = Some(name.clone());
            save_config(&cfg)?;
            if !global.quiet {
                eprintln!("✓ Default profile set to '{name}'");
            }
            Ok(())
        }

        ConfigCommand::SetToken { profile } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));
            if !cfg.profiles.contains_key(&profile_name) {
                return Err(profile_not_found(profile_name, &cfg));
            }

            let mut token = String::new();
            io::stdin().lock().read_line(&mut token)?;
            let token = token.trim();
            if token.is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "no token on stdin".into(),
                });
            }

            let entry = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
                .map_err(|e| CliError::Validation {
                    field: "keyring".into(),
                    reason: format!("failed to access keyring: {e}"),
                })?;
            entry.set_password(token).map_err(|e| CliError::Validation {
                field: "keyring".into(),
                reason: format!("failed to store token in keyring: {e}"),
            })?;
            if !global.quiet {
                eprintln!("✓ Token for '{profile_name}' stored in system keyring");
            }
            Ok(())
        }
    }
}

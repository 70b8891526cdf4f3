// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{DagstackError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DagstackError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_execution(cfg)?;
    validate_agent(cfg)?;
    validate_prefixes(cfg)?;
    validate_git(cfg)?;
    Ok(())
}

fn validate_git(cfg: &RawConfigFile) -> Result<()> {
    let g = &cfg.git;
    match (g.user_name.as_deref(), g.user_email.as_deref()) {
        (None, None) => Ok(()),
        (Some(name), Some(email)) if !name.trim().is_empty() && !email.trim().is_empty() => Ok(()),
        _ => Err(DagstackError::ConfigError(
            "git.user_name and git.user_email must both be set and non-empty".to_string(),
        )),
    }
}

fn validate_execution(cfg: &RawConfigFile) -> Result<()> {
    let e = &cfg.execution;

    if let Some(backoff) = e.retry_backoff {
        if !backoff.is_finite() || backoff < 1.0 {
            return Err(DagstackError::ConfigError(format!(
                "execution.retry_backoff must be a number >= 1.0, got {backoff}"
            )));
        }
    }

    if e.max_concurrency == Some(0) {
        return Err(DagstackError::ConfigError(
            "execution.max_concurrency must be >= 1".to_string(),
        ));
    }

    if e.timeout_secs == Some(0) {
        return Err(DagstackError::ConfigError(
            "execution.timeout_secs must be >= 1 (omit it for no timeout)".to_string(),
        ));
    }

    if let Some(ref base_ref) = e.base_ref {
        if base_ref.trim().is_empty() {
            return Err(DagstackError::ConfigError(
                "execution.base_ref must not be empty".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_agent(cfg: &RawConfigFile) -> Result<()> {
    if let Some(ref command) = cfg.agent.command {
        if command.trim().is_empty() {
            return Err(DagstackError::ConfigError(
                "agent.command must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_prefixes(cfg: &RawConfigFile) -> Result<()> {
    for (section, prefix) in [
        ("workspace", cfg.workspace.branch_prefix.as_deref()),
        ("stack", cfg.stack.branch_prefix.as_deref()),
    ] {
        if let Some(prefix) = prefix {
            if prefix.trim().is_empty() {
                return Err(DagstackError::ConfigError(format!(
                    "{section}.branch_prefix must not be empty"
                )));
            }
        }
    }

    if let (Some(work), Some(stack)) = (
        cfg.workspace.branch_prefix.as_deref(),
        cfg.stack.branch_prefix.as_deref(),
    ) {
        if work == stack {
            return Err(DagstackError::ConfigError(format!(
                "workspace and stack branch prefixes must differ (both are '{work}')"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<ConfigFile> {
        let raw: RawConfigFile = toml::from_str(toml)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn empty_config_is_valid() {
        let cfg = parse("").unwrap();
        assert!(cfg.agent.command.is_none());
        assert!(cfg.execution.mode.is_none());
    }

    #[test]
    fn rejects_backoff_below_one() {
        let err = parse("[execution]\nretry_backoff = 0.5\n").unwrap_err();
        assert!(err.to_string().contains("retry_backoff"));
    }

    #[test]
    fn rejects_zero_concurrency() {
        assert!(parse("[execution]\nmax_concurrency = 0\n").is_err());
    }

    #[test]
    fn rejects_blank_agent_command() {
        assert!(parse("[agent]\ncommand = \"  \"\n").is_err());
    }

    #[test]
    fn rejects_identical_branch_prefixes() {
        let err = parse("[workspace]\nbranch_prefix = \"x/\"\n[stack]\nbranch_prefix = \"x/\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn git_identity_needs_name_and_email() {
        assert!(parse("[git]\nuser_name = \"bot\"\n").is_err());
        assert!(parse("[git]\nuser_name = \"bot\"\nuser_email = \" \"\n").is_err());

        let cfg = parse("[git]\nuser_name = \"bot\"\nuser_email = \"bot@example.com\"\n").unwrap();
        assert_eq!(cfg.git.identity(), Some(("bot", "bot@example.com")));
    }
}

use reqwest::Url;
use tracing::warn;

use super::{types::Config, ConfigError};
use crate::classifier::PatternRuleSet;
use crate::orphan::ExclusionRules;

const MAX_SEED_TIME_MINUTES: i64 = 525_600;
const MAX_SEED_RATIO: f64 = 100.0;

/// Validate configuration.
///
/// Everything here is a startup-time fatal check: pattern rules and exclusion
/// rules are compiled once to surface errors before any remote call.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_client(config)?;

    if config.cache.ttl_secs == 0 {
        return Err(ConfigError::ValidationError(
            "cache.ttl_secs must be greater than 0".to_string(),
        ));
    }

    PatternRuleSet::compile(&config.unregistered.patterns)?;

    for (field, tag) in [
        ("default_tag", &config.unregistered.default_tag),
        ("cross_seeding_tag", &config.unregistered.cross_seeding_tag),
        ("other_issues_tag", &config.unregistered.other_issues_tag),
    ] {
        if tag.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "unregistered.{} cannot be empty",
                field
            )));
        }
    }

    if config.deletion.enabled && config.deletion.tags.is_empty() {
        return Err(ConfigError::ValidationError(
            "deletion.enabled requires at least one tag in deletion.tags".to_string(),
        ));
    }

    ExclusionRules::compile(&config.orphans.exclude_files, &config.orphans.exclude_dirs)?;

    if config.orphans.scan_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "orphans.scan_timeout_secs must be greater than 0".to_string(),
        ));
    }

    for dir in &config.orphans.scan_dirs {
        if !dir.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "orphans.scan_dirs entry must be absolute: {}",
                dir.display()
            )));
        }
    }

    if let Some(recycle) = &config.recycle_bin {
        if !recycle.path.is_absolute() {
            return Err(ConfigError::RecycleBinUnusable {
                path: recycle.path.display().to_string(),
                reason: "path must be absolute".to_string(),
            });
        }
    } else if config.orphans.move_to_recycle_bin {
        return Err(ConfigError::ValidationError(
            "orphans.move_to_recycle_bin requires [recycle_bin] to be configured".to_string(),
        ));
    }

    for (tracker, tracker_config) in &config.tracker_tags {
        validate_tracker_limits(tracker, tracker_config)?;
    }

    if let Some(path) = &config.metrics.textfile_path {
        if path.file_name().is_none() {
            return Err(ConfigError::ValidationError(format!(
                "metrics.textfile_path is not a file path: {}",
                path.display()
            )));
        }
    }

    Ok(())
}

fn validate_client(config: &Config) -> Result<(), ConfigError> {
    let url = Url::parse(&config.client.url).map_err(|e| {
        ConfigError::ValidationError(format!("client.url '{}' is invalid: {}", config.client.url, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError(format!(
            "client.url scheme must be http or https, got '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(ConfigError::ValidationError(
            "client.url is missing a host".to_string(),
        ));
    }
    if config.client.username.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "client.username cannot be empty".to_string(),
        ));
    }
    if config.client.password.is_empty() {
        return Err(ConfigError::ValidationError(
            "client.password cannot be empty".to_string(),
        ));
    }
    if config.client.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "client.timeout_secs must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_tracker_limits(
    tracker: &str,
    tracker_config: &super::TrackerTagConfig,
) -> Result<(), ConfigError> {
    if let Some(minutes) = tracker_config.seed_time_limit {
        if minutes < -2 {
            return Err(ConfigError::ValidationError(format!(
                "tracker_tags.{}.seed_time_limit must be >= -2 (-2 = global, -1 = no limit)",
                tracker
            )));
        }
        if minutes > MAX_SEED_TIME_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "tracker_tags.{}.seed_time_limit exceeds {} minutes (1 year): {}",
                tracker, MAX_SEED_TIME_MINUTES, minutes
            )));
        }
        if minutes == 0 {
            warn!(
                tracker,
                "seed_time_limit is 0, torrents will stop seeding immediately; use -1 for unlimited"
            );
        }
    }

    if let Some(ratio) = tracker_config.seed_ratio_limit {
        if !ratio.is_finite() || ratio < -2.0 {
            return Err(ConfigError::ValidationError(format!(
                "tracker_tags.{}.seed_ratio_limit must be a number >= -2 (-2 = global, -1 = no limit)",
                tracker
            )));
        }
        if ratio > MAX_SEED_RATIO {
            return Err(ConfigError::ValidationError(format!(
                "tracker_tags.{}.seed_ratio_limit exceeds {}: {}",
                tracker, MAX_SEED_RATIO, ratio
            )));
        }
        if ratio == 0.0 {
            warn!(
                tracker,
                "seed_ratio_limit is 0, torrents will stop seeding immediately; use -1 for unlimited"
            );
        }
    }

    Ok(())
}

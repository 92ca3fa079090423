use super::models::{Config, DistributionProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{field} must be at least 1")]
    ZeroSized { field: &'static str },

    #[error("Remote distribution is enabled but no destination is configured (set DISTRIBUTION_TARGET)")]
    MissingDestination,

    #[error("Local distribution provider requires distribution.root")]
    MissingDistributionRoot,

    #[error("media.split_threshold must be at least 1MB")]
    SplitThresholdTooSmall,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_pipeline(config)?;
    validate_progress(config)?;
    validate_distribution(config)?;
    Ok(())
}

fn validate_pipeline(config: &Config) -> Result<(), ValidationError> {
    let pipeline = &config.pipeline;
    let sizes = [
        ("pipeline.dispatch_workers", pipeline.dispatch_workers),
        ("pipeline.download_workers", pipeline.download_workers),
        ("pipeline.upload_workers", pipeline.upload_workers),
        ("pipeline.queue_size", pipeline.queue_size),
        ("pipeline.segment_concurrency", pipeline.segment_concurrency),
        ("pipeline.stats_interval_secs", pipeline.stats_interval_secs as usize),
    ];

    for (field, value) in sizes {
        if value == 0 {
            return Err(ValidationError::ZeroSized { field });
        }
    }

    Ok(())
}

fn validate_progress(config: &Config) -> Result<(), ValidationError> {
    if config.progress.render_interval_ms == 0 {
        return Err(ValidationError::ZeroSized {
            field: "progress.render_interval_ms",
        });
    }
    Ok(())
}

/// Remote mode cannot start without a target to publish to
fn validate_distribution(config: &Config) -> Result<(), ValidationError> {
    let distribution = &config.distribution;
    if !distribution.enabled {
        return Ok(());
    }

    let has_destination = distribution
        .destination
        .as_deref()
        .is_some_and(|d| !d.trim().is_empty());
    if !has_destination {
        return Err(ValidationError::MissingDestination);
    }

    if distribution.provider == DistributionProvider::Local && distribution.root.is_none() {
        return Err(ValidationError::MissingDistributionRoot);
    }

    if config.media.split_threshold.whole_mib() == 0 {
        return Err(ValidationError::SplitThresholdTooSmall);
    }

    Ok(())
}

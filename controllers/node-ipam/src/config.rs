//! Controller configuration.
//!
//! Read once at startup from environment variables. Unset variables fall back
//! to defaults; set but unparseable values abort startup with
//! [`ControllerError::InvalidConfig`].

use crate::error::ControllerError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{Selector, SelectorExt};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_IPAM_ANNOTATION: &str = "ipam.nodepool.dev/allocate";

/// How the pod binder assigns addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindMode {
    /// Reserve the lowest free pool entry before the pod has an address
    #[default]
    Reserve,
    /// Record the owner at the address the pod actually received
    Resolved,
}

impl FromStr for BindMode {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reserve" => Ok(BindMode::Reserve),
            "resolved" => Ok(BindMode::Resolved),
            other => Err(ControllerError::InvalidConfig(format!(
                "BIND_MODE must be 'reserve' or 'resolved', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for BindMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindMode::Reserve => f.write_str("reserve"),
            BindMode::Resolved => f.write_str("resolved"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Expand when free entries drop to this count or below
    pub low_watermark: usize,
    /// Entries appended per expansion
    pub expand_step: usize,
    /// Pods must match to be handled; `None` matches every pod
    pub label_selector: Option<Selector>,
    /// Pods must carry this annotation with a non-empty value
    pub ipam_annotation: String,
    pub bind_mode: BindMode,
    pub pool_workers: usize,
    pub pod_workers: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Immediate re-read attempts after a write conflict
    pub conflict_retries: u32,
    /// How long an owner must stay missing before its address is recycled
    pub recycle_grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            low_watermark: 10,
            expand_step: 10,
            label_selector: None,
            ipam_annotation: DEFAULT_IPAM_ANNOTATION.to_string(),
            bind_mode: BindMode::Reserve,
            pool_workers: 1,
            pod_workers: 1,
            backoff_base: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1000),
            conflict_retries: 3,
            recycle_grace: Duration::ZERO,
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{}='{}': {}", name, raw, e))
        }),
        _ => Ok(default),
    }
}

/// Parses a `LabelSelector` given as JSON or YAML.
///
/// An empty document yields `None` (match everything).
pub fn parse_label_selector(raw: &str) -> Result<Option<Selector>, ControllerError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    // JSON is a subset of YAML
    let selector: LabelSelector = serde_yaml::from_str(raw).map_err(|e| {
        ControllerError::InvalidConfig(format!("LABEL_SELECTOR is not a valid label selector: {}", e))
    })?;
    let selector = Selector::try_from(selector).map_err(|e| {
        ControllerError::InvalidConfig(format!("LABEL_SELECTOR: {}", e))
    })?;
    Ok(Some(selector))
}

impl ControllerConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();

        let label_selector = match lookup("LABEL_SELECTOR") {
            Some(raw) => parse_label_selector(&raw)?,
            None => None,
        };
        let ipam_annotation = lookup("IPAM_ANNOTATION")
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(defaults.ipam_annotation);

        let config = Self {
            low_watermark: parse_var(&lookup, "LOW_WATERMARK", defaults.low_watermark)?,
            expand_step: parse_var(&lookup, "EXPAND_STEP", defaults.expand_step)?,
            label_selector,
            ipam_annotation,
            bind_mode: parse_var(&lookup, "BIND_MODE", defaults.bind_mode)?,
            pool_workers: parse_var(&lookup, "POOL_WORKERS", defaults.pool_workers)?,
            pod_workers: parse_var(&lookup, "POD_WORKERS", defaults.pod_workers)?,
            backoff_base: Duration::from_millis(parse_var(&lookup, "BACKOFF_BASE_MS", 5u64)?),
            backoff_max: Duration::from_secs(parse_var(&lookup, "BACKOFF_MAX_SECS", 1000u64)?),
            conflict_retries: parse_var(&lookup, "CONFLICT_RETRIES", defaults.conflict_retries)?,
            recycle_grace: Duration::from_secs(parse_var(&lookup, "RECYCLE_GRACE_SECS", 0u64)?),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.expand_step == 0 {
            return Err(ControllerError::InvalidConfig("EXPAND_STEP must be at least 1".to_string()));
        }
        if self.pool_workers == 0 || self.pod_workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "POOL_WORKERS and POD_WORKERS must be at least 1".to_string(),
            ));
        }
        if self.backoff_base.is_zero() || self.backoff_base > self.backoff_max {
            return Err(ControllerError::InvalidConfig(format!(
                "backoff base {:?} must be non-zero and not exceed max {:?}",
                self.backoff_base, self.backoff_max
            )));
        }
        Ok(())
    }

    /// Returns true if pod labels pass the configured selector.
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        self.label_selector
            .as_ref()
            .is_none_or(|selector| selector.matches(labels))
    }
}

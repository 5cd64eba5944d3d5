//! convoy.toml configuration parser and validation.

use crate::image::{ImageError, ImageRef};
use crate::spec::{ReadinessPolicy, ReplicaBounds, RolloutLimits, ServiceSpec};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(String),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("service name `{0}` must be lowercase alphanumeric with dashes")]
    InvalidName(String),
    #[error("duplicate service name: {0}")]
    DuplicateService(String),
    #[error("service {service}: {source}")]
    InvalidImage {
        service: String,
        #[source]
        source: ImageError,
    },
    #[error("service {0}: missing required field `{1}`")]
    MissingField(String, &'static str),
    #[error("service {0}: replicas.min must be at least 1")]
    ZeroMinReplicas(String),
    #[error("service {0}: replicas.min ({1}) exceeds replicas.max ({2})")]
    ReplicaBoundsInverted(String, u32, u32),
    #[error("service {0}: scaling.target_utilization must be in (0, 100], got {1}")]
    BadUtilizationTarget(String, f64),
    #[error("service {0}: rollout.max_surge and rollout.max_unavailable cannot both be zero")]
    ImmovableRollout(String),
    #[error("service {0}: readiness.success_threshold must be at least 1")]
    ZeroSuccessThreshold(String),
    #[error("service {0}: readiness.period must be nonzero")]
    ZeroProbePeriod(String),
    #[error("service {0}: invalid duration `{2}` for `{1}`")]
    BadDuration(String, &'static str, String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Raw convoy.toml contents, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoyConfig {
    #[serde(default)]
    pub service: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub image: String,
    pub port: Option<u16>,
    pub env: Option<HashMap<String, String>>,
    pub replicas: Option<ReplicasConfig>,
    pub rollout: Option<RolloutConfig>,
    pub readiness: Option<ReadinessConfig>,
    pub scaling: Option<ScalingConfig>,
    pub termination_grace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicasConfig {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub max_surge: Option<u32>,
    pub max_unavailable: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    pub path: Option<String>,
    pub initial_delay: Option<String>,
    pub period: Option<String>,
    pub timeout: Option<String>,
    pub success_threshold: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub target_utilization: Option<f64>,
    pub cooldown: Option<String>,
}

impl ConvoyConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Validate every `[[service]]` table, rejecting duplicates.
    pub fn build_all(&self) -> ConfigResult<Vec<ServiceSpec>> {
        let mut seen = HashSet::new();
        let mut specs = Vec::with_capacity(self.service.len());
        for service in &self.service {
            if !seen.insert(service.name.clone()) {
                return Err(ConfigError::DuplicateService(service.name.clone()));
            }
            specs.push(service.build()?);
        }
        Ok(specs)
    }

    /// Scaffold a minimal convoy.toml for the given service.
    pub fn scaffold(name: &str, image: &str) -> Self {
        ConvoyConfig {
            service: vec![ServiceConfig {
                name: name.to_string(),
                image: image.to_string(),
                port: Some(8080),
                env: None,
                replicas: Some(ReplicasConfig {
                    min: Some(1),
                    max: Some(10),
                }),
                rollout: Some(RolloutConfig {
                    max_surge: Some(1),
                    max_unavailable: Some(0),
                }),
                readiness: Some(ReadinessConfig {
                    path: Some("/healthz".to_string()),
                    initial_delay: Some("2s".to_string()),
                    period: Some("5s".to_string()),
                    timeout: Some("2s".to_string()),
                    success_threshold: Some(2),
                }),
                scaling: Some(ScalingConfig {
                    target_utilization: Some(80.0),
                    cooldown: Some("60s".to_string()),
                }),
                termination_grace: Some("10s".to_string()),
            }],
        }
    }
}

impl ServiceConfig {
    /// Apply defaults and validate into an immutable [`ServiceSpec`].
    pub fn build(&self) -> ConfigResult<ServiceSpec> {
        let name = self.name.trim();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }

        let image = ImageRef::parse(&self.image)
            .map_err(|source| ConfigError::InvalidImage {
                service: name.to_string(),
                source,
            })?
            .canonical();

        let port = self
            .port
            .ok_or_else(|| ConfigError::MissingField(name.to_string(), "port"))?;

        let (min, max) = match &self.replicas {
            Some(r) => {
                let min = r.min.unwrap_or(1);
                (min, r.max.unwrap_or(min))
            }
            None => (1, 1),
        };
        if min == 0 {
            return Err(ConfigError::ZeroMinReplicas(name.to_string()));
        }
        if min > max {
            return Err(ConfigError::ReplicaBoundsInverted(name.to_string(), min, max));
        }

        let (max_surge, max_unavailable) = match &self.rollout {
            Some(r) => (r.max_surge.unwrap_or(1), r.max_unavailable.unwrap_or(0)),
            None => (1, 0),
        };
        if max_surge == 0 && max_unavailable == 0 {
            return Err(ConfigError::ImmovableRollout(name.to_string()));
        }

        let target_utilization_pct = self
            .scaling
            .as_ref()
            .and_then(|s| s.target_utilization)
            .unwrap_or(80.0);
        if target_utilization_pct <= 0.0 || target_utilization_pct > 100.0 {
            return Err(ConfigError::BadUtilizationTarget(
                name.to_string(),
                target_utilization_pct,
            ));
        }
        let scale_cooldown_ms = duration_field(
            name,
            "scaling.cooldown",
            self.scaling.as_ref().and_then(|s| s.cooldown.as_deref()),
            Duration::from_secs(60),
        )?
        .as_millis() as u64;

        let readiness = self.readiness.as_ref();
        let success_threshold = readiness.and_then(|r| r.success_threshold).unwrap_or(2);
        if success_threshold == 0 {
            return Err(ConfigError::ZeroSuccessThreshold(name.to_string()));
        }
        let period = duration_field(
            name,
            "readiness.period",
            readiness.and_then(|r| r.period.as_deref()),
            Duration::from_secs(5),
        )?;
        if period.is_zero() {
            return Err(ConfigError::ZeroProbePeriod(name.to_string()));
        }
        let initial_delay = duration_field(
            name,
            "readiness.initial_delay",
            readiness.and_then(|r| r.initial_delay.as_deref()),
            Duration::from_secs(2),
        )?;
        let timeout = duration_field(
            name,
            "readiness.timeout",
            readiness.and_then(|r| r.timeout.as_deref()),
            Duration::from_secs(2),
        )?;

        let termination_grace = duration_field(
            name,
            "termination_grace",
            self.termination_grace.as_deref(),
            Duration::from_secs(10),
        )?;

        Ok(ServiceSpec {
            name: name.to_string(),
            image,
            port,
            env: self.env.clone().unwrap_or_default(),
            replicas: ReplicaBounds { min, max },
            target_utilization_pct,
            limits: RolloutLimits {
                max_surge,
                max_unavailable,
            },
            readiness: ReadinessPolicy {
                path: readiness
                    .and_then(|r| r.path.clone())
                    .unwrap_or_else(|| "/healthz".to_string()),
                initial_delay_ms: initial_delay.as_millis() as u64,
                period_ms: period.as_millis() as u64,
                timeout_ms: timeout.as_millis() as u64,
                success_threshold,
            },
            termination_grace_secs: termination_grace.as_secs(),
            scale_cooldown_ms,
        })
    }
}

fn duration_field(
    service: &str,
    field: &'static str,
    value: Option<&str>,
    default: Duration,
) -> ConfigResult<Duration> {
    match value {
        None => Ok(default),
        Some(raw) => parse_duration(raw)
            .ok_or_else(|| ConfigError::BadDuration(service.to_string(), field, raw.to_string())),
    }
}

/// Parse `250ms`, `5s`, or `2m` into a [`Duration`]. Bare numbers are seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(secs) = s.strip_suffix('s') {
        return secs.trim().parse::<u64>().ok().map(Duration::from_secs);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60));
    }
    s.parse::<u64>().ok().map(Duration::from_secs)
}

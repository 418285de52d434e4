use std::fmt;
use std::str::FromStr;

use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::models::telemetry::{DerivedMetrics, TelemetrySnapshot};

/// Lifecycle state of a migration job.
///
/// `COMPLETED`, `FAILED` and `CANCELED` are terminal for display only; the
/// control API can restart a job from any of them. Spellings the control API
/// may add later decode as `Unknown` instead of failing the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum JobStatus {
    #[strum(to_string = "NEW", serialize = "init")]
    New,
    #[strum(to_string = "RUNNING", serialize = "migration")]
    Running,
    #[strum(to_string = "COMPLETED", serialize = "success")]
    Completed,
    Failed,
    #[strum(to_string = "CANCELED", serialize = "cancelled", serialize = "stopped")]
    Canceled,
    Unknown,
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(status = %raw, "Unrecognised job status");
            JobStatus::Unknown
        }))
    }
}

impl JobStatus {
    /// Whether the server moving a job from `self` to `next` is an expected
    /// transition. Staying in the same state is always expected; nothing
    /// moves into or out of `Unknown` as expected.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (New, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Canceled)
                | (Canceled, Running)
                | (Failed, Running)
        )
    }

    /// Job options can only be edited through the control API outside of a
    /// run, and only when the state is known.
    pub fn is_editable(self) -> bool {
        !matches!(self, JobStatus::Running | JobStatus::Unknown)
    }

    pub fn is_running(self) -> bool {
        matches!(self, JobStatus::Running)
    }
}

/// A source or target location, decoded from rclone's `remote:bucket/path`
/// notation. A descriptor without a colon names a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDescriptor {
    pub remote: Option<String>,
    pub bucket: Option<String>,
    pub path: String,
}

impl RemoteDescriptor {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.split_once(':') {
            Some((remote, rest)) if !remote.is_empty() => {
                let rest = rest.trim_start_matches('/');
                let (bucket, path) = match rest.split_once('/') {
                    Some((bucket, path)) => (bucket, path),
                    None => (rest, ""),
                };
                Self {
                    remote: Some(remote.to_string()),
                    bucket: (!bucket.is_empty()).then(|| bucket.to_string()),
                    path: path.to_string(),
                }
            }
            _ => Self {
                remote: None,
                bucket: None,
                path: raw.to_string(),
            },
        }
    }

    /// True when this descriptor lives on the remote registered as `name`.
    pub fn is_on_remote(&self, name: &str) -> bool {
        self.remote.as_deref() == Some(name)
    }
}

impl fmt::Display for RemoteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.remote, &self.bucket) {
            (Some(remote), Some(bucket)) if self.path.is_empty() => write!(f, "{remote}:{bucket}"),
            (Some(remote), Some(bucket)) => write!(f, "{remote}:{bucket}/{}", self.path),
            (Some(remote), None) => write!(f, "{remote}:{}", self.path),
            (None, _) => f.write_str(&self.path),
        }
    }
}

impl FromStr for RemoteDescriptor {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for RemoteDescriptor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RemoteDescriptor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Transfer options of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(alias = "concurrent", alias = "transfers", default = "default_concurrency")]
    pub concurrency: u32,

    /// Bandwidth cap in MB/s.
    #[serde(alias = "limit_speed", alias = "bwlimit", default)]
    pub bandwidth_limit: Option<u64>,

    /// Interval between incremental re-syncs, in seconds.
    #[serde(alias = "increment_circle", default)]
    pub increment_interval: Option<u64>,
}

fn default_concurrency() -> u32 {
    1
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            bandwidth_limit: None,
            increment_interval: None,
        }
    }
}

/// `rclone_options` arrives either as JSON text or as an inline object.
#[derive(Deserialize)]
#[serde(untagged)]
enum EncodedOptions {
    Structured(JobOptions),
    Text(String),
}

fn decode_options<'de, D>(deserializer: D) -> Result<JobOptions, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let encoded = Option::<EncodedOptions>::deserialize(deserializer)?;
    Ok(match encoded {
        None => JobOptions::default(),
        Some(EncodedOptions::Structured(options)) => options,
        Some(EncodedOptions::Text(text)) if text.trim().is_empty() => JobOptions::default(),
        Some(EncodedOptions::Text(text)) => match serde_json::from_str(&text) {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!(error = %e, raw = %text, "Unreadable job options, using defaults");
                JobOptions::default()
            }
        },
    })
}

/// One migration job as held in the store.
///
/// Static fields come from snapshot pulls; `telemetry` and `metrics` only ever
/// advance through channel deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    pub name: String,
    pub status: JobStatus,
    pub source_remote: RemoteDescriptor,
    pub target_remote: RemoteDescriptor,
    #[serde(rename = "rclone_options", alias = "options", deserialize_with = "decode_options", default)]
    pub options: JobOptions,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub total_size_bytes: Option<u64>,
    #[serde(skip_deserializing, default)]
    pub telemetry: Option<TelemetrySnapshot>,
    #[serde(skip_deserializing, default)]
    pub metrics: Option<DerivedMetrics>,
}

/// Body of create/update job commands.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobParams {
    #[garde(length(min = 1, max = 200))]
    pub name: String,

    #[garde(skip)]
    pub source_remote_id: i64,

    #[garde(skip)]
    pub target_remote_id: i64,

    #[garde(length(min = 1, max = 255))]
    pub source_bucket_name: String,

    #[garde(length(max = 1024))]
    #[serde(default)]
    pub source_url: String,

    #[garde(length(min = 1, max = 255))]
    pub target_bucket_name: String,

    #[garde(length(max = 1024))]
    #[serde(default)]
    pub target_url: String,

    #[garde(range(min = 1, max = 256))]
    pub concurrent: u32,

    #[garde(range(min = 1))]
    #[serde(default)]
    pub limit_speed: Option<u64>,

    #[garde(range(min = 1))]
    #[serde(default)]
    pub increment_circle: Option<u64>,
}

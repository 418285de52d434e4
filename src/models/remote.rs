use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Which side of a migration a registered device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RemoteKind {
    Source,
    Target,
}

/// Connection settings of a device, minus credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default, alias = "type")]
    pub remote_type: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub endpoint: String,
}

/// A registered storage device as listed by the device registry.
///
/// The registry's `name` doubles as the rclone remote name, so it is what job
/// descriptors refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RemoteKind,
    #[serde(rename = "config_json", deserialize_with = "decode_config", default)]
    pub config: RemoteConfig,
}

impl Device {
    /// The descriptor prefix jobs on this device carry.
    pub fn descriptor(&self) -> &str {
        &self.name
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EncodedConfig {
    Structured(RemoteConfig),
    Text(String),
}

fn decode_config<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RemoteConfig, D::Error> {
    Ok(match Option::<EncodedConfig>::deserialize(deserializer)? {
        None => RemoteConfig::default(),
        Some(EncodedConfig::Structured(config)) => config,
        Some(EncodedConfig::Text(text)) if text.trim().is_empty() => RemoteConfig::default(),
        Some(EncodedConfig::Text(text)) => match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                // Raw text may hold credentials, so only the parse error is logged
                tracing::warn!(error = %e, "Unreadable device config, using defaults");
                RemoteConfig::default()
            }
        },
    })
}

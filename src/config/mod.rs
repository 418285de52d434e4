use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3100").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Root of the job control and device registry API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Address of the streaming telemetry endpoint
    #[serde(default = "default_telemetry_url")]
    pub telemetry_url: String,

    /// Per-request timeout for control API calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Seconds between periodic snapshot pulls; 0 disables them
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// First reconnect delay after the channel drops
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    /// Upper bound for the reconnect delay
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3100".to_string()
}

fn default_api_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_telemetry_url() -> String {
    "ws://localhost:3000/ws".to_string()
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_snapshot_interval_secs() -> u64 {
    30
}

fn default_reconnect_initial_ms() -> u64 {
    500
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_when_unset() {
        let config: AppConfig = envy::from_iter(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3100");
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.reconnect_max_ms, 30_000);
    }

    #[test]
    fn test_reads_uppercase_variables() {
        let vars = vec![
            ("TELEMETRY_URL".to_string(), "ws://control:8080/ws".to_string()),
            ("SNAPSHOT_INTERVAL_SECS".to_string(), "0".to_string()),
        ];
        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert_eq!(config.telemetry_url, "ws://control:8080/ws");
        assert_eq!(config.snapshot_interval_secs, 0);
    }
}

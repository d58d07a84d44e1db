use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Bound on every outbound provider call, in seconds.
    pub provider_timeout_secs: u64,
    /// Delay before the first webhook delivery attempt, in seconds.
    pub webhook_delay_secs: u64,
    pub webhook_max_attempts: u32,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: i64,
    /// UTC hour at which the daily settlement batch runs (0-23).
    pub settlement_hour_utc: u32,
}

impl Config {
    /// Defaults overridable per knob through the environment
    /// (`DATABASE_URL`, `SWEEP_INTERVAL_SECS`, ...).
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("database_url", "postgresql://localhost/payouts")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("provider_timeout_secs", 30)?
            .set_default("webhook_delay_secs", 5)?
            .set_default("webhook_max_attempts", 3)?
            .set_default("sweep_interval_secs", 300)?
            .set_default("sweep_batch_size", 1000)?
            .set_default("settlement_hour_utc", 2)?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

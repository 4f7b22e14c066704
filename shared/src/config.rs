use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    /// No URL means the in-memory store.
    #[serde(default)]
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub log_format: LogFormat,
    pub expiry_flag_days: i64,
    pub reserve_retries: u32,
    pub eta_jitter_minutes: u32,
    pub event_buffer: usize,
}

impl AppConfig {
    /// Defaults, then `bloodnet.toml` if present, then `BLOODNET__*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Some("bloodnet"))
    }

    pub fn load_from(file: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("port", 8080)?
            .set_default("database_max_connections", 10)?
            .set_default("log_format", "pretty")?
            .set_default("expiry_flag_days", 7)?
            .set_default("reserve_retries", 3)?
            .set_default("eta_jitter_minutes", 0)?
            .set_default("event_buffer", 256)?;

        if let Some(name) = file {
            builder = builder.add_source(config::File::with_name(name).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("BLOODNET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.expiry_flag_days < 0 {
            anyhow::bail!("expiry_flag_days must not be negative");
        }
        if self.reserve_retries == 0 {
            anyhow::bail!("reserve_retries must be at least 1");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            database_max_connections: 10,
            log_format: LogFormat::Pretty,
            expiry_flag_days: 7,
            reserve_retries: 3,
            eta_jitter_minutes: 0,
            event_buffer: 256,
        }
    }
}

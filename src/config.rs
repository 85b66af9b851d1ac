use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub processor_base_url: String,
    pub bank_provider_base_url: String,
    pub bank_webhook_secret: String,
    /// Cron expression for the recurring-date scan.
    pub recurring_scan_schedule: String,
    /// Cron expression for the withheld-transfer reconciliation sweep.
    pub reconciliation_schedule: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            processor_base_url: env::var("PROCESSOR_BASE_URL")?,
            bank_provider_base_url: env::var("BANK_PROVIDER_BASE_URL")?,
            bank_webhook_secret: env::var("BANK_WEBHOOK_SECRET")?,
            // Every 15 minutes / every hour, mirroring the cadence the
            // transfer volume actually needs.
            recurring_scan_schedule: env::var("RECURRING_SCAN_SCHEDULE")
                .unwrap_or_else(|_| "0 */15 * * * *".to_string()),
            reconciliation_schedule: env::var("RECONCILIATION_SCHEDULE")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cron::Schedule;
    use std::str::FromStr;

    #[test]
    fn default_schedules_parse_as_cron_expressions() {
        assert!(Schedule::from_str("0 */15 * * * *").is_ok());
        assert!(Schedule::from_str("0 0 * * * *").is_ok());
    }
}

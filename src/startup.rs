use crate::config::Config;
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::Duration;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub processor: bool,
    pub bank_provider: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.processor && self.bank_provider
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Processor Connectivity: {}", status(self.processor));
        println!("Bank Provider:          {}", status(self.bank_provider));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!(
            "\nOverall Status: {}",
            if self.is_valid() { "✅ PASS" } else { "❌ FAIL" }
        );
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok {
        "✅ OK"
    } else {
        "❌ FAIL"
    }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        processor: true,
        bank_provider: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_endpoint(&config.processor_base_url).await {
        report.processor = false;
        report.errors.push(format!("Processor: {}", e));
    }

    if let Err(e) = validate_endpoint(&config.bank_provider_base_url).await {
        report.bank_provider = false;
        report.errors.push(format!("Bank provider: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.bank_webhook_secret.is_empty() {
        anyhow::bail!("BANK_WEBHOOK_SECRET is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }

    url::Url::parse(&config.processor_base_url)
        .context("PROCESSOR_BASE_URL is not a valid URL")?;
    url::Url::parse(&config.bank_provider_base_url)
        .context("BANK_PROVIDER_BASE_URL is not a valid URL")?;

    use cron::Schedule;
    use std::str::FromStr;
    Schedule::from_str(&config.recurring_scan_schedule)
        .map_err(|e| anyhow::anyhow!("RECURRING_SCAN_SCHEDULE is not valid cron: {}", e))?;
    Schedule::from_str(&config.reconciliation_schedule)
        .map_err(|e| anyhow::anyhow!("RECONCILIATION_SCHEDULE is not valid cron: {}", e))?;

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_endpoint(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(base_url)
        .send()
        .await
        .with_context(|| format!("Failed to connect to {}", base_url))?;

    if response.status().is_server_error() {
        anyhow::bail!("{} returned status: {}", base_url, response.status());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server_port: 3000,
            database_url: "postgres://localhost:5432/fairshare".to_string(),
            processor_base_url: "https://api.processor.example".to_string(),
            bank_provider_base_url: "https://api.bank.example".to_string(),
            bank_webhook_secret: "secret".to_string(),
            recurring_scan_schedule: "0 */15 * * * *".to_string(),
            reconciliation_schedule: "0 0 * * * *".to_string(),
        }
    }

    #[test]
    fn empty_database_url_fails_validation() {
        let mut config = base_config();
        config.database_url = String::new();
        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn invalid_processor_url_fails_validation() {
        let mut config = base_config();
        config.processor_base_url = "not-a-url".to_string();
        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn invalid_cron_expression_fails_validation() {
        let mut config = base_config();
        config.recurring_scan_schedule = "every tuesday".to_string();
        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn complete_config_passes_env_validation() {
        assert!(validate_env_vars(&base_config()).is_ok());
    }
}

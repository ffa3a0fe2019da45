pub mod domain;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub demand_model_url: Option<String>,
        pub demand_model_api_key: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                demand_model_url: std::env::var("DEMAND_MODEL_URL").ok(),
                demand_model_api_key: std::env::var("DEMAND_MODEL_API_KEY").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_demand_model_url(&self) -> anyhow::Result<&str> {
            self.demand_model_url
                .as_deref()
                .context("DEMAND_MODEL_URL is required")
        }
    }
}

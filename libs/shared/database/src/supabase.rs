use std::time::Duration;

use anyhow::{Result, anyhow};
use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION},
};
use tracing::{error, instrument};

use shared_config::AppConfig;

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(config.health_check_timeout())
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build HTTP client with timeout, using defaults: {}", e);
                Client::new()
            });

        Self {
            client,
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        headers.insert("apikey", HeaderValue::from_str(&self.anon_key)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", self.anon_key))?);

        Ok(headers)
    }

    /// Round trip against the REST root. Returns the observed latency.
    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<Duration> {
        if self.base_url.is_empty() {
            return Err(anyhow!("Supabase URL is not configured"));
        }

        let started = std::time::Instant::now();
        let url = format!("{}/rest/v1/", self.base_url);

        let response = self.client
            .get(&url)
            .headers(self.get_headers()?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Database ping failed with status {}", status));
        }

        Ok(started.elapsed())
    }
}

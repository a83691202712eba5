use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub redis_url: Option<String>,
    pub environment: String,
    pub port: u16,
    pub cache_key_prefix: String,
    pub rate_limit_window_seconds: u64,
    pub store_timeout_seconds: u64,
    pub health_check_timeout_seconds: u64,
    pub dashboard_cache_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: String::new(),
            redis_url: None,
            environment: "production".to_string(),
            port: 8000,
            cache_key_prefix: "fairplay_cache".to_string(),
            rate_limit_window_seconds: 60,
            store_timeout_seconds: 5,
            health_check_timeout_seconds: 5,
            dashboard_cache_seconds: 30,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            redis_url: env::var("REDIS_URL").ok().or_else(|| {
                warn!("REDIS_URL not set, cache and rate limiting will use the in-process store");
                None
            }),
            environment: env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            port: parse_or("PORT", defaults.port),
            cache_key_prefix: env::var("CACHE_KEY_PREFIX").unwrap_or(defaults.cache_key_prefix),
            rate_limit_window_seconds: parse_or(
                "RATE_LIMIT_WINDOW_SECONDS",
                defaults.rate_limit_window_seconds,
            ),
            store_timeout_seconds: parse_or("STORE_TIMEOUT_SECONDS", defaults.store_timeout_seconds),
            health_check_timeout_seconds: parse_or(
                "HEALTH_CHECK_TIMEOUT_SECONDS",
                defaults.health_check_timeout_seconds,
            ),
            dashboard_cache_seconds: parse_or(
                "DASHBOARD_CACHE_SECONDS",
                defaults.dashboard_cache_seconds,
            ),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_seconds)
    }

    pub fn dashboard_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dashboard_cache_seconds)
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_production_and_unconfigured() {
        let config = AppConfig::default();
        assert!(!config.is_configured());
        assert!(!config.is_development());
        assert_eq!(config.rate_limit_window_seconds, 60);
        assert_eq!(config.dashboard_cache_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn development_flag_is_case_insensitive() {
        let config = AppConfig {
            environment: "Development".to_string(),
            ..AppConfig::default()
        };
        assert!(config.is_development());
    }
}

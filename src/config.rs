use tracing::warn;

/// Runtime configuration, loaded from the environment with validated
/// fallbacks to the defaults.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// sqlx SQLite URL, e.g. `sqlite://data/chatfolio.db`
    pub database_url: String,
    /// Socket address advertised to the webview; defaults to the bound
    /// host and port when unset
    pub socket_address: Option<String>,
    /// Demo mode runs without platform credentials: offline profiles and a
    /// no-op Send API
    pub demo: bool,
    /// Messenger page access token; required outside demo mode
    pub page_access_token: Option<String>,
    pub graph_api_url: String,
    /// Rate limit applied to the HTTP bootstrap routes
    pub requests_per_minute: u32,
    pub profile_cache_size: usize,
}

impl Default for AppConfig {
    fn default() -> AppConfig {
        AppConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            database_url: "sqlite://data/chatfolio.db".to_string(),
            socket_address: None,
            demo: false,
            page_access_token: None,
            graph_api_url: "https://graph.facebook.com/v2.6".to_string(),
            requests_per_minute: 100,
            profile_cache_size: 256,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, keeping defaults for
    /// anything unset or out of range.
    pub fn from_env() -> AppConfig {
        let mut config = AppConfig::default();

        if let Ok(host) = std::env::var("HOST") {
            if !host.trim().is_empty() {
                config.host = host;
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(value) if value > 0 => config.port = value,
                Ok(_) => warn!("Invalid PORT value 0, using default: {}", config.port),
                Err(e) => warn!(
                    "Failed to parse PORT '{}': {}, using default: {}",
                    port, e, config.port
                ),
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.trim().is_empty() {
                config.database_url = url;
            }
        }

        if let Ok(address) = std::env::var("SOCKET_ADDRESS") {
            if !address.trim().is_empty() {
                config.socket_address = Some(address);
            }
        }

        if let Ok(demo) = std::env::var("DEMO") {
            config.demo = demo.to_lowercase() == "true" || demo == "1";
        }

        if let Ok(token) = std::env::var("PAGE_ACCESS_TOKEN") {
            if !token.trim().is_empty() {
                config.page_access_token = Some(token);
            }
        }

        if let Ok(url) = std::env::var("GRAPH_API_URL") {
            if !url.trim().is_empty() {
                config.graph_api_url = url;
            }
        }

        if let Ok(limit) = std::env::var("REQUESTS_PER_MINUTE") {
            match limit.parse::<u32>() {
                Ok(value) if value > 0 => config.requests_per_minute = value,
                _ => warn!(
                    "Invalid REQUESTS_PER_MINUTE '{}', using default: {}",
                    limit, config.requests_per_minute
                ),
            }
        }

        if let Ok(size) = std::env::var("PROFILE_CACHE_SIZE") {
            match size.parse::<usize>() {
                Ok(value) if value > 0 => config.profile_cache_size = value,
                _ => warn!(
                    "Invalid PROFILE_CACHE_SIZE '{}', using default: {}",
                    size, config.profile_cache_size
                ),
            }
        }

        config
    }

    /// Address the webview should open its socket to
    pub fn advertised_socket_address(&self) -> String {
        self.socket_address
            .clone()
            .unwrap_or_else(|| format!("ws://{}:{}/ws", self.host, self.port))
    }
}

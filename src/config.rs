use std::env;
use log::warn;

// Server Configuration
pub const DEFAULT_WS_BIND_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_API_BIND_ADDRESS: &str = "127.0.0.1:8081";
pub const CLEANUP_INTERVAL_SECS: u64 = 60;

// Price generation
pub const TICK_INTERVAL_MS: u64 = 1000;
pub const MAX_TICK_DRIFT: f64 = 0.005; // U(-0.5%, +0.5%) per symbol per tick
pub const PRICE_DECIMALS: u32 = 2;

// JWT Configuration
pub const DEFAULT_JWT_SECRET: &str = "your-secret-key-change-in-production";

// Subscription store
pub const DEFAULT_STORE_PATH: &str = "./data/subscriptions.json";

// Per-connection outbound event queue; a session that falls this far behind
// is dropped rather than allowed to stall the broadcast loop.
pub const OUTBOUND_QUEUE_SIZE: usize = 64;

// Client-side rolling history capacity per symbol
pub const HISTORY_CAPACITY: usize = 20;

pub struct Config {
    pub ws_bind_address: String,
    pub api_bind_address: String,
    pub jwt_secret: String,
    pub store_path: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            ws_bind_address: env::var("WS_BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_WS_BIND_ADDRESS.to_string()),
            api_bind_address: env::var("API_BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_API_BIND_ADDRESS.to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using default (NOT for production!)");
                    DEFAULT_JWT_SECRET.to_string()
                }),
            store_path: env::var("STORE_PATH")
                .unwrap_or_else(|_| DEFAULT_STORE_PATH.to_string()),
            log_level: env::var("RUST_LOG")
                .unwrap_or_else(|_| "info".to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret == DEFAULT_JWT_SECRET {
            warn!("Using default JWT secret - change for production!");
        }

        if self.jwt_secret.len() < 32 {
            return Err("JWT secret should be at least 32 characters long".to_string());
        }

        if self.ws_bind_address == self.api_bind_address {
            return Err("WebSocket and API servers cannot share a bind address".to_string());
        }

        Ok(())
    }

    pub fn log_config(&self) {
        println!("Server Configuration:");
        println!("  WebSocket Address: {}", self.ws_bind_address);
        println!("  API Address: {}", self.api_bind_address);
        println!("  Store Path: {}", self.store_path);
        println!("  Log Level: {}", self.log_level);
        println!("  JWT Secret: {}***", &self.jwt_secret[..4.min(self.jwt_secret.len())]);
    }
}

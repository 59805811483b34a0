use std::env;
use std::time::Duration;

/// Runtime configuration, read once from the environment at startup. Every
/// knob has a development default so `cargo run` works against a local
/// mongod without any setup.
#[derive(Clone, Debug)]
pub struct Config {
    pub mongodb_uri: String,
    pub database_name: String,
    pub bind_address: String,
    pub graph_api_base: String,
    pub graph_access_token: String,
    pub whatsapp_phone_number_id: String,
    pub workers_per_channel: usize,
    /// Published platform rates, messages per second per account.
    pub whatsapp_rate_per_sec: f64,
    pub messenger_rate_per_sec: f64,
    pub send_timeout: Duration,
    pub max_send_attempts: u32,
    pub retry_base_delay: Duration,
    pub worker_poll_interval: Duration,
    pub scheduler_interval: Duration,
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            mongodb_uri: var_or("LEADCAST_MONGODB_URI", "mongodb://localhost:27017"),
            database_name: var_or("LEADCAST_DATABASE", "leadcast"),
            bind_address: var_or("LEADCAST_BIND", "127.0.0.1:8080"),
            graph_api_base: var_or("LEADCAST_GRAPH_API_BASE", "https://graph.facebook.com/v18.0"),
            graph_access_token: var_or("LEADCAST_GRAPH_TOKEN", ""),
            whatsapp_phone_number_id: var_or("LEADCAST_WHATSAPP_PHONE_ID", ""),
            workers_per_channel: parse_or("LEADCAST_WORKERS_PER_CHANNEL", 4),
            whatsapp_rate_per_sec: parse_or("LEADCAST_WHATSAPP_RATE", 80.0),
            messenger_rate_per_sec: parse_or("LEADCAST_MESSENGER_RATE", 250.0),
            send_timeout: Duration::from_secs(parse_or("LEADCAST_SEND_TIMEOUT_SECS", 10)),
            max_send_attempts: parse_or("LEADCAST_MAX_SEND_ATTEMPTS", 3),
            retry_base_delay: Duration::from_millis(parse_or("LEADCAST_RETRY_BASE_MS", 2000)),
            worker_poll_interval: Duration::from_millis(parse_or("LEADCAST_POLL_MS", 500)),
            scheduler_interval: Duration::from_secs(parse_or("LEADCAST_SCHEDULER_SECS", 30)),
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

use crate::quiz::DEFAULT_QUESTION_TIME_LIMIT_SECS;
use std::env;

const DEFAULT_ORIGIN: &str = "http://localhost:5173";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub local_state_path: Option<String>,
    pub question_time_limit_secs: u32,
    pub allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            local_state_path: None,
            question_time_limit_secs: DEFAULT_QUESTION_TIME_LIMIT_SECS,
            allowed_origins: vec![DEFAULT_ORIGIN.to_string()],
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let host = env::var("BACKEND_HOST").unwrap_or(defaults.host);
        let port = env::var("BACKEND_PORT")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.port);
        let local_state_path = match env::var("LOCAL_STATE_PATH") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v),
            Err(_) => Some(format!("{}/local_state.json", env!("CARGO_MANIFEST_DIR"))),
        };
        let question_time_limit_secs = env::var("QUESTION_TIME_LIMIT_SECS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .filter(|secs: &u32| *secs > 0)
            .unwrap_or(defaults.question_time_limit_secs);
        let allowed_origins = env::var("CORS_ORIGINS")
            .ok()
            .map(|v| parse_origins(&v))
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.allowed_origins);

        Self {
            host,
            port,
            local_state_path,
            question_time_limit_secs,
            allowed_origins,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

use std::path::PathBuf;

/// Runtime configuration, read once at startup. Every knob has a
/// development default so a bare `cargo run` comes up on port 4000.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    /// Origin prefixed to media URLs handed back by the upload endpoints.
    pub public_base_url: String,
    pub upload_dir: PathBuf,
    /// Allowed CORS origin for the browser front end.
    pub frontend_url: String,
}

fn var_or(name: &str, default: &str) -> String {
    dotenv::var(name).unwrap_or_else(|_| default.to_owned())
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:4000"),
            database_url: var_or("DATABASE_URL", "sqlite://connect_hub_chat.db?mode=rwc"),
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:4000"),
            upload_dir: PathBuf::from(var_or("UPLOAD_DIR", "uploads")),
            frontend_url: var_or("FRONTEND_URL", "http://localhost:3000"),
        }
    }
}

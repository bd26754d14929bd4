pub mod paths;
pub mod settings;

pub use paths::PathManager;
pub use settings::{LayoutSettings, LoggingSettings, Settings};

/// Load environment variables from .env files.
/// First loads from ~/.env (home directory), then from ./.env (project directory).
/// Project directory values take precedence over home directory values.
/// Call this before parsing CLI args so `RUST_LOG` and `RACKPLAN_DATA_DIR` are visible.
pub fn load_env_file() {
    if let Some(home) = dirs::home_dir() {
        let home_env_path = home.join(".env");
        dotenv::from_path(home_env_path).ok();
    }

    // Loads ./.env, overwriting home values
    dotenv::dotenv().ok();
}

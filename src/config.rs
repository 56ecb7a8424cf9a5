//! Runtime configuration for the shell client.

use std::path::PathBuf;

use url::Url;

/// Assumed terminal width for column-aligned listings.
pub const DEFAULT_TERMINAL_WIDTH: usize = 80;

/// Default session length requested from the backend, in hours.
pub const DEFAULT_SESSION_HOURS: u32 = 2;

/// Who is asking for a sandbox. Absent identity means every `start`
/// attempt fails locally with "authentication required".
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

/// Everything the shell core needs to know about its environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the sandbox backend.
    pub backend_url: Url,
    /// Session length requested on `start`, in hours.
    pub session_hours: u32,
    /// Terminal width used by the listing formatter.
    pub terminal_width: usize,
    /// Location of the persisted session record.
    pub record_path: PathBuf,
}

impl Config {
    /// Default location of the session record, under the platform data dir.
    pub fn default_record_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("sandterm")
            .join("session.json")
    }
}

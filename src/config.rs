// Configuration loading and parsing (picker.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// picker.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire picker.toml file.
#[derive(Debug, Clone, Deserialize)]
struct PickerFile {
    server: ServerConfig,
    sheet: SheetConfig,
    retry: RetryConfig,
    scryfall: ScryfallConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
    /// Spreadsheet ID of the shared pool. May be left empty in the file and
    /// supplied via the `GOOGLE_SHEET_ID` environment variable instead.
    #[serde(default)]
    pub spreadsheet_id: String,
    pub worksheet: String,
    /// How long fetched sheet data may serve reads before a refetch.
    /// Zero disables the read cache.
    pub cache_ttl_secs: u64,
    /// Upper bound on any single round-trip to the Sheets API.
    pub timeout_secs: u64,
}

/// Bounded retry for transient store failures. Conflicts are never retried;
/// this only governs network-level errors and rate limits.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScryfallConfig {
    pub timeout_secs: u64,
    pub attempts: u32,
    pub backoff_ms: u64,
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    /// OAuth bearer token for the Sheets API. Token acquisition is out of
    /// scope for this service; the deploy environment injects a valid token.
    pub sheets_access_token: Option<String>,
    /// Shared secret guarding the pool reset endpoint. When unset, reset
    /// requests are always rejected.
    pub admin_secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub sheet: SheetConfig,
    pub retry: RetryConfig,
    pub scryfall: ScryfallConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load configuration from `config/picker.toml` and (optionally)
/// `config/credentials.toml`, both relative to the given `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults
/// or consult the environment. Prefer `load_config()` which handles both.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- picker.toml (required) ---
    let picker_path = config_dir.join("picker.toml");
    let picker_text = read_file(&picker_path)?;
    let picker_file: PickerFile =
        toml::from_str(&picker_text).map_err(|e| ConfigError::ParseError {
            path: picker_path.clone(),
            source: e,
        })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    Ok(Config {
        server: picker_file.server,
        sheet: picker_file.sheet,
        retry: picker_file.retry,
        scryfall: picker_file.scryfall,
        credentials,
    })
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let mut copied = Vec::new();

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };

        // Skip .example template files
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // File already exists in config/, skip it
            }
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working
/// directory. Copies default config files first, applies environment
/// overrides for deploy-time secrets, and validates the result.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    let mut config = load_config_from(&cwd)?;
    apply_overrides(&mut config, |name| std::env::var(name).ok());
    validate(&config)?;
    Ok(config)
}

/// Apply environment-style overrides for deploy-time secrets. The sheet ID
/// and credentials were environment variables in the original deployment and
/// keep working that way here.
fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(id) = lookup("GOOGLE_SHEET_ID") {
        config.sheet.spreadsheet_id = id;
    }
    if let Some(token) = lookup("SHEETS_ACCESS_TOKEN") {
        config.credentials.sheets_access_token = Some(token);
    }
    if let Some(secret) = lookup("ADMIN_SECRET") {
        config.credentials.admin_secret = Some(secret);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub(crate) fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.sheet.spreadsheet_id.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "sheet.spreadsheet_id".into(),
            message: "must be set (in picker.toml or via GOOGLE_SHEET_ID)".into(),
        });
    }

    if config.sheet.worksheet.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "sheet.worksheet".into(),
            message: "must not be empty".into(),
        });
    }

    if config.sheet.timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "sheet.timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.retry.attempts == 0 {
        return Err(ConfigError::ValidationError {
            field: "retry.attempts".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.scryfall.timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "scryfall.timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

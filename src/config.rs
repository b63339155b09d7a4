//! Configuration types, loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Validation thresholds for the intake dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeRules {
    /// Minimum characters in a custom problem description (after trim).
    pub min_problem_len: usize,
    /// Minimum characters in a contact name (after trim).
    pub min_name_len: usize,
    /// Youngest accepted age, inclusive.
    pub min_age: u32,
    /// Oldest accepted age, inclusive.
    pub max_age: u32,
    /// Minimum characters in a contact handle, counted after stripping `@`.
    pub min_handle_len: usize,
}

impl Default for IntakeRules {
    fn default() -> Self {
        Self {
            min_problem_len: 10,
            min_name_len: 2,
            min_age: 10,
            max_age: 100,
            min_handle_len: 3,
        }
    }
}

/// Practitioner details shown to users.
#[derive(Debug, Clone)]
pub struct PractitionerInfo {
    pub name: String,
    /// Telegram handle without the leading `@`.
    pub handle: Option<String>,
}

impl Default for PractitionerInfo {
    fn default() -> Self {
        Self {
            name: "the practitioner".to_string(),
            handle: None,
        }
    }
}

/// Everything the funnel needs at runtime.
#[derive(Debug)]
pub struct FunnelConfig {
    pub bot_token: SecretString,
    /// Operator identifier. `None` disables notifications and admin commands.
    pub operator_id: Option<String>,
    pub db_path: PathBuf,
    pub guide_path: PathBuf,
    pub welcome_image_path: PathBuf,
    pub export_dir: PathBuf,
    pub health_port: u16,
    pub store_timeout: Duration,
    pub recent_leads: usize,
    pub practitioner: PractitionerInfo,
    pub rules: IntakeRules,
}

impl FunnelConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bot_token = get("BOT_TOKEN")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("BOT_TOKEN".to_string()))?;

        let operator_id = match get("ADMIN_ID") {
            None => {
                tracing::warn!("ADMIN_ID not set; operator notifications are disabled");
                None
            }
            Some(raw) if raw.parse::<i64>().is_ok() => Some(raw),
            Some(raw) => {
                tracing::error!(value = %raw, "ADMIN_ID must be numeric; operator notifications are disabled");
                None
            }
        };

        let defaults = IntakeRules::default();
        let rules = IntakeRules {
            min_problem_len: parse_or(&get, "FUNNEL_MIN_PROBLEM_LEN", defaults.min_problem_len)?,
            min_name_len: parse_or(&get, "FUNNEL_MIN_NAME_LEN", defaults.min_name_len)?,
            min_age: parse_or(&get, "FUNNEL_MIN_AGE", defaults.min_age)?,
            max_age: parse_or(&get, "FUNNEL_MAX_AGE", defaults.max_age)?,
            min_handle_len: parse_or(&get, "FUNNEL_MIN_HANDLE_LEN", defaults.min_handle_len)?,
        };
        if rules.min_age > rules.max_age {
            return Err(ConfigError::InvalidValue {
                key: "FUNNEL_MIN_AGE".to_string(),
                message: format!("{} is above FUNNEL_MAX_AGE {}", rules.min_age, rules.max_age),
            });
        }

        let timeout_ms: u64 = parse_or(&get, "FUNNEL_STORE_TIMEOUT_MS", 5_000)?;

        Ok(Self {
            bot_token,
            operator_id,
            db_path: get("FUNNEL_DB_PATH")
                .map_or_else(|| PathBuf::from("./data/lead-funnel.db"), PathBuf::from),
            guide_path: get("FUNNEL_GUIDE_PATH")
                .map_or_else(|| PathBuf::from("guide.pdf"), PathBuf::from),
            welcome_image_path: get("FUNNEL_WELCOME_IMAGE")
                .map_or_else(|| PathBuf::from("welcome.jpg"), PathBuf::from),
            export_dir: get("FUNNEL_EXPORT_DIR").map_or_else(std::env::temp_dir, PathBuf::from),
            health_port: parse_or(&get, "FUNNEL_HEALTH_PORT", 8080)?,
            store_timeout: Duration::from_millis(timeout_ms),
            recent_leads: parse_or(&get, "FUNNEL_RECENT_LEADS", 5)?,
            practitioner: PractitionerInfo {
                name: get("FUNNEL_PRACTITIONER_NAME")
                    .unwrap_or_else(|| PractitionerInfo::default().name),
                handle: get("FUNNEL_PRACTITIONER_HANDLE")
                    .map(|h| h.trim_start_matches('@').to_string()),
            },
            rules,
        })
    }
}

/// Optional log directory from `FUNNEL_LOG_DIR`.
///
/// Read on its own so tracing can be set up before the rest of the
/// configuration is parsed.
pub fn log_dir_from_env() -> Option<PathBuf> {
    std::env::var_os("FUNNEL_LOG_DIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}

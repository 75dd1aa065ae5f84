//! Configuration loading and representation.
//!
//! Settings come from the process environment:
//!
//! | variable                            | default |
//! |-------------------------------------|---------|
//! | `FORGEERP_PR_RESTRICT_TO_REQUESTER` | `true`  |
//! | `FORGEERP_PR_APPROVED_ONLY`         | `false` |

use thiserror::Error;

use forgeerp_expenses::SelectionPolicy;

pub const RESTRICT_TO_REQUESTER_VAR: &str = "FORGEERP_PR_RESTRICT_TO_REQUESTER";
pub const APPROVED_ONLY_VAR: &str = "FORGEERP_PR_APPROVED_ONLY";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: expected a boolean, got '{value}'")]
    InvalidBool { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpensesConfig {
    pub selection: SelectionPolicy,
}

impl ExpensesConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = SelectionPolicy::default();
        let restrict_to_requester = parse_bool(
            RESTRICT_TO_REQUESTER_VAR,
            lookup(RESTRICT_TO_REQUESTER_VAR),
            defaults.restrict_to_requester,
        )?;
        let approved_only = parse_bool(
            APPROVED_ONLY_VAR,
            lookup(APPROVED_ONLY_VAR),
            defaults.approved_only,
        )?;

        Ok(Self {
            selection: SelectionPolicy {
                restrict_to_requester,
                approved_only,
            },
        })
    }
}

fn parse_bool(
    var: &'static str,
    value: Option<String>,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { var, value }),
    }
}

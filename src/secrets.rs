//! Credential lookup for the platform client.
//!
//! The core only needs four secret strings. Where they come from is hidden
//! behind [`SecretStore`]; this crate ships a plain YAML file store and an
//! environment store. Ciphered storage is handled elsewhere.

use std::collections::HashMap;
use std::path::Path;

use crate::constants::ENV_PREFIX;
use crate::errors::SecretError;

pub const API_KEY: &str = "api_key";
pub const API_SECRET: &str = "api_secret";
pub const ACCESS_TOKEN: &str = "access_token";
pub const ACCESS_TOKEN_SECRET: &str = "access_token_secret";

pub const SECRET_NAMES: &[&str] = &[API_KEY, API_SECRET, ACCESS_TOKEN, ACCESS_TOKEN_SECRET];

/// Source of the credentials the platform client authenticates with.
pub trait SecretStore: Send + Sync {
    /// Return every secret, keyed by the names in [`SECRET_NAMES`].
    fn get_all(&self) -> Result<HashMap<String, String>, SecretError>;
}

/// Secrets read from an unencrypted YAML mapping.
pub struct PlainSecretStore {
    path: String,
    content: String,
}

impl PlainSecretStore {
    pub fn open(path: &Path) -> Result<Self, SecretError> {
        let content = std::fs::read_to_string(path).map_err(|e| SecretError::Unreadable {
            path: path.display().to_string(),
            details: e.to_string(),
        })?;
        Ok(Self::from_yaml(&path.display().to_string(), content))
    }

    pub fn from_yaml(path: &str, content: String) -> Self {
        Self {
            path: path.to_string(),
            content,
        }
    }

    /// A template users fill in, for `gen plain_secrets`.
    pub fn template() -> String {
        SECRET_NAMES
            .iter()
            .map(|name| format!("{name}: \"\"\n"))
            .collect()
    }
}

impl SecretStore for PlainSecretStore {
    fn get_all(&self) -> Result<HashMap<String, String>, SecretError> {
        let values: HashMap<String, String> =
            serde_yml::from_str(&self.content).map_err(|e| SecretError::Malformed {
                path: self.path.clone(),
                details: e.to_string(),
            })?;
        require_all(values)
    }
}

/// Secrets read from `PUNTGUN_API_KEY`, `PUNTGUN_API_SECRET`, ...
#[derive(Debug, Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn new() -> Self {
        Self
    }
}

impl SecretStore for EnvSecretStore {
    fn get_all(&self) -> Result<HashMap<String, String>, SecretError> {
        let values = SECRET_NAMES
            .iter()
            .filter_map(|name| {
                let variable = format!("{}{}", ENV_PREFIX, name.to_uppercase());
                std::env::var(variable)
                    .ok()
                    .map(|value| (name.to_string(), value))
            })
            .collect();
        require_all(values)
    }
}

fn require_all(values: HashMap<String, String>) -> Result<HashMap<String, String>, SecretError> {
    for name in SECRET_NAMES {
        if values.get(*name).is_none_or(|v| v.trim().is_empty()) {
            return Err(SecretError::Missing {
                name: name.to_string(),
            });
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_store_reads_all_keys() {
        let store = PlainSecretStore::from_yaml(
            "secrets.yml",
            "api_key: k\napi_secret: s\naccess_token: t\naccess_token_secret: ts\n".to_string(),
        );
        let secrets = store.get_all().unwrap();
        assert_eq!(secrets.get(ACCESS_TOKEN).map(String::as_str), Some("t"));
        assert_eq!(secrets.len(), 4);
    }

    #[test]
    fn test_plain_store_missing_key() {
        let store = PlainSecretStore::from_yaml(
            "secrets.yml",
            "api_key: k\napi_secret: s\naccess_token: t\n".to_string(),
        );
        assert!(matches!(
            store.get_all(),
            Err(SecretError::Missing { name }) if name == ACCESS_TOKEN_SECRET
        ));
    }

    #[test]
    fn test_env_store_reads_prefixed_variables() {
        let _guard = crate::test_helpers::ENV_MUTEX.lock();
        let variables = [
            ("PUNTGUN_API_KEY", "k"),
            ("PUNTGUN_API_SECRET", "s"),
            ("PUNTGUN_ACCESS_TOKEN", "t"),
            ("PUNTGUN_ACCESS_TOKEN_SECRET", "ts"),
        ];
        unsafe {
            for (name, value) in variables {
                std::env::set_var(name, value);
            }
        }

        let secrets = EnvSecretStore::new().get_all();

        unsafe {
            std::env::remove_var("PUNTGUN_ACCESS_TOKEN_SECRET");
        }
        let missing = EnvSecretStore::new().get_all();

        unsafe {
            for (name, _) in variables {
                std::env::remove_var(name);
            }
        }

        let secrets = secrets.unwrap();
        assert_eq!(secrets.get(API_KEY).map(String::as_str), Some("k"));
        assert_eq!(secrets.get(ACCESS_TOKEN_SECRET).map(String::as_str), Some("ts"));
        assert!(matches!(
            missing,
            Err(SecretError::Missing { name }) if name == ACCESS_TOKEN_SECRET
        ));
    }

    #[test]
    fn test_template_is_rejected_until_filled() {
        let store = PlainSecretStore::from_yaml("t.yml", PlainSecretStore::template());
        assert!(matches!(store.get_all(), Err(SecretError::Missing { .. })));
    }
}

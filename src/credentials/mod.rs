//! Out-of-band storage for provider API keys.
//!
//! Secrets live in a `KEY=value` file that is never serialized alongside
//! provider records. The path is captured as absolute at construction, so a
//! later `chdir` (or tooling launched from another directory) cannot point
//! the store at a different file. A missing file reads as an empty store.

use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::debug;

use crate::core::errors::ChatResult;

/// Environment-variable style prefix for provider secrets.
const KEY_PREFIX: &str = "PROVIDER_API_KEY_";

/// File-backed credential store keyed by provider name.
pub struct CredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Open a credential store at the given path.
    ///
    /// The path is absolutized immediately; the file itself may not exist
    /// yet.
    ///
    /// # Errors
    /// Returns an error if the current directory cannot be resolved while
    /// absolutizing a relative path.
    pub fn new(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = std::path::absolute(path.as_ref())?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// The absolute path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the secret for a provider name.
    ///
    /// Surrounding single or double quotes an external editor may have
    /// added around the value are stripped.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read.
    pub async fn get(&self, provider_name: &str) -> ChatResult<Option<String>> {
        let key = key_for(provider_name);
        let entries = self.read_entries()?;
        Ok(entries
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v))
    }

    /// Store the secret for a provider name, replacing any previous value.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub async fn set(&self, provider_name: &str, secret: &str) -> ChatResult<()> {
        let key = key_for(provider_name);
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_entries()?;
        if let Some(entry) = entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = secret.to_string();
        } else {
            entries.push((key, secret.to_string()));
        }
        self.write_entries(&entries)?;
        debug!("Stored credential for provider {provider_name}");
        Ok(())
    }

    /// Remove the secret for a provider name, if present.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub async fn delete(&self, provider_name: &str) -> ChatResult<()> {
        let key = key_for(provider_name);
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_entries()?;
        let before = entries.len();
        entries.retain(|(k, _)| *k != key);
        if entries.len() != before {
            self.write_entries(&entries)?;
            debug!("Removed credential for provider {provider_name}");
        }
        Ok(())
    }

    fn read_entries(&self) -> ChatResult<Vec<(String, String)>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                entries.push((key.trim().to_string(), strip_quotes(value.trim()).to_string()));
            }
        }
        Ok(entries)
    }

    fn write_entries(&self, entries: &[(String, String)]) -> ChatResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut content = String::new();
        for (key, value) in entries {
            content.push_str(key);
            content.push('=');
            content.push_str(value);
            content.push('\n');
        }
        fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Credential file key for a provider name: uppercase, with every
/// non-alphanumeric character collapsed to an underscore.
fn key_for(provider_name: &str) -> String {
    let sanitized: String = provider_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{KEY_PREFIX}{sanitized}")
}

/// Strip one matching pair of surrounding quotes, double or single.
fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

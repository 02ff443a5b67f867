//! Secret resolution from several sources, in priority order:
//!
//! 1. **Direct value** (`openai_api_key` in the settings file)
//! 2. **File reference** (`openai_api_key_file`, e.g. a Docker secret)
//! 3. **Env var reference** (`openai_api_key_env`, `OPENAI_API_KEY` by default)

use secrecy::SecretString;
use std::fs;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Returns the first non-empty source. A file that cannot be read is an
/// error rather than a fall-through to the env var.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|e| SecretError::FileReadError {
                path: expanded,
                source: e,
            });
    }

    if let Some(var_name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(var_name) {
            // Env vars may carry trailing newlines
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: var_name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: var_name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but a missing source or unset env var is `None`.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) | Err(SecretError::EnvVarNotSet { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Expands a leading `~` to the user's home directory.
pub(crate) fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            if path == "~" {
                return home.into_owned();
            }
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_direct_value_wins() {
        let secret = resolve_secret(Some("direct"), Some("/nonexistent"), Some("NOPE")).unwrap();
        assert_eq!(secret.expose_secret(), "direct");
    }

    #[test]
    fn test_file_is_trimmed() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();

        let secret = resolve_secret(None, file.path().to_str(), None).unwrap();
        assert_eq!(secret.expose_secret(), "from-file");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = resolve_secret(Some(""), Some("/nonexistent/secret"), Some("HOME")).unwrap_err();
        assert!(matches!(err, SecretError::FileReadError { .. }));
    }

    #[test]
    #[serial]
    fn test_env_var_fallback() {
        std::env::set_var("SPECDIGEST_TEST_SECRET", "from-env\n");
        let secret = resolve_secret(None, None, Some("SPECDIGEST_TEST_SECRET")).unwrap();
        assert_eq!(secret.expose_secret(), "from-env");
        std::env::remove_var("SPECDIGEST_TEST_SECRET");
    }

    #[test]
    #[serial]
    fn test_optional_treats_unset_env_as_none() {
        std::env::remove_var("SPECDIGEST_TEST_UNSET");
        assert!(resolve_secret_optional(None, None, Some("SPECDIGEST_TEST_UNSET"))
            .unwrap()
            .is_none());
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x"), format!("{}/x", home.to_string_lossy()));
        }
    }
}

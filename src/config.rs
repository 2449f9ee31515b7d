use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use gophie_core::settings::{SECTION_DOWNLOADS, SECTION_NAVIGATION};
use gophie_core::{MemorySettings, SettingsStore};

const DEFAULT_HOME: &str = "gopher.floodgap.com";

/// Loads `~/.gophie.toml` (or `explicit`) into a settings store. Tables are
/// sections and their scalar values become setting strings. A missing or
/// broken file leaves every setting at its default.
pub fn load(explicit: Option<&Path>) -> MemorySettings {
    let settings = MemorySettings::new();

    let candidates = match explicit {
        Some(path) => vec![path.to_path_buf()],
        None => candidate_paths(),
    };

    for path in candidates {
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                match content.parse::<toml::Table>() {
                    Ok(table) => {
                        apply(&settings, &table);
                        debug!(path = %path.display(), "Loaded config");
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to parse config");
                    }
                }
                break;
            }
            Err(e) if explicit.is_some() => {
                warn!(path = %path.display(), error = %e, "Failed to read config");
            }
            Err(_) => {}
        }
    }
    settings
}

fn candidate_paths() -> Vec<PathBuf> {
    match home_dir() {
        Some(home) => vec![home.join(".gophie.toml")],
        None => Vec::new(),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn apply(settings: &MemorySettings, table: &toml::Table) {
    for (section, values) in table {
        let Some(values) = values.as_table() else {
            warn!(key = %section, "Ignoring top-level config value outside a section");
            continue;
        };
        for (name, value) in values {
            let value = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(true) => "yes".to_string(),
                toml::Value::Boolean(false) => "no".to_string(),
                other => {
                    warn!(section = %section, name = %name, kind = other.type_str(), "Ignoring non-scalar config value");
                    continue;
                }
            };
            settings.set(name, &value, section);
        }
    }
}

pub fn home_address(settings: &dyn SettingsStore) -> String {
    settings.setting("GOPHERHOME", SECTION_NAVIGATION, DEFAULT_HOME)
}

pub fn selector_prefix_enabled(settings: &dyn SettingsStore) -> bool {
    let value = settings.setting("SELECTOR_PREFIX_ENABLED", SECTION_NAVIGATION, "yes");
    matches!(value.trim().to_ascii_lowercase().as_str(), "yes" | "true" | "1")
}

/// `DOWNLOAD_PATH`, with a leading `$HOME` or `~` expanded.
pub fn download_dir(settings: &dyn SettingsStore) -> PathBuf {
    let value = settings.setting("DOWNLOAD_PATH", SECTION_DOWNLOADS, "$HOME/Downloads");
    let rest = value
        .strip_prefix("$HOME")
        .or_else(|| value.strip_prefix('~'));

    match (rest, home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gophie_core::settings::SECTION_NETWORK;

    #[test]
    fn sections_become_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gophie.toml");
        std::fs::write(
            &path,
            r#"
[Network]
DEFAULT_CHARSET = "ISO-8859-1"
READ_TIMEOUT = 30

[Navigation]
GOPHERHOME = "sdf.org"
SELECTOR_PREFIX_ENABLED = false
"#,
        )
        .unwrap();

        let settings = load(Some(&path));
        assert_eq!(settings.setting("DEFAULT_CHARSET", SECTION_NETWORK, ""), "ISO-8859-1");
        assert_eq!(settings.setting("READ_TIMEOUT", SECTION_NETWORK, ""), "30");
        assert_eq!(home_address(&settings), "sdf.org");
        assert!(!selector_prefix_enabled(&settings));
    }

    #[test]
    fn broken_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gophie.toml");
        std::fs::write(&path, "[Network\nnope").unwrap();

        let settings = load(Some(&path));
        assert_eq!(home_address(&settings), DEFAULT_HOME);
        assert!(selector_prefix_enabled(&settings));
    }

    #[test]
    fn missing_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load(Some(&dir.path().join("absent.toml")));
        assert_eq!(home_address(&settings), DEFAULT_HOME);
    }

    #[test]
    fn download_dir_is_taken_verbatim_when_absolute() {
        let settings = MemorySettings::new().with("DOWNLOAD_PATH", "/srv/gopher", SECTION_DOWNLOADS);
        assert_eq!(download_dir(&settings), PathBuf::from("/srv/gopher"));
    }
}

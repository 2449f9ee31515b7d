use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

pub const SECTION_NETWORK: &str = "Network";
pub const SECTION_NAVIGATION: &str = "Navigation";
pub const SECTION_DOWNLOADS: &str = "Downloads";

/// String lookups by `(name, section, default)`, the shape of an INI file.
pub trait SettingsStore: Send + Sync {
    fn setting(&self, name: &str, section: &str, default: &str) -> String;
}

/// Settings kept in memory, keyed by section and then by name.
#[derive(Debug, Default)]
pub struct MemorySettings {
    sections: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, value: &str, section: &str) {
        let mut sections = self.sections.write().unwrap_or_else(PoisonError::into_inner);
        sections
            .entry(section.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    pub fn with(self, name: &str, value: &str, section: &str) -> Self {
        self.set(name, value, section);
        self
    }
}

impl SettingsStore for MemorySettings {
    fn setting(&self, name: &str, section: &str, default: &str) -> String {
        let sections = self.sections.read().unwrap_or_else(PoisonError::into_inner);
        sections
            .get(section)
            .and_then(|s| s.get(name))
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Result;
use crate::protocol::models::VoiceId;

pub const VOICE_KEY: &str = "selectedVoice";
pub const INSTRUCTIONS_KEY: &str = "customInstructions";

/// Key/value persistence for user preferences, outliving any session.
pub trait SettingsStore: Send {
    fn get(&self, key: &str) -> Option<String>;

    /// # Errors
    /// Returns an error if the value cannot be persisted.
    #[allow(clippy::result_large_err)]
    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// # Errors
    /// Returns an error if the removal cannot be persisted.
    #[allow(clippy::result_large_err)]
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// Ephemeral store, mainly for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file, written through on every edit.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl JsonFileStore {
    /// Load the store, starting empty if the file does not exist yet.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, values })
    }

    #[allow(clippy::result_large_err)]
    fn write_through(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.write_through()
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        self.write_through()
    }
}

/// The user preferences the controller reads at construction and applies to
/// each session it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub voice: VoiceId,
    pub instructions: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voice: VoiceId::default(),
            instructions: String::new(),
        }
    }
}

impl Settings {
    /// Load persisted preferences. A missing or unrecognized stored voice
    /// falls back to the default rather than failing construction.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let voice = store
            .get(VOICE_KEY)
            .map_or_else(VoiceId::default, |saved| {
                VoiceId::from_str(&saved).unwrap_or_else(|_| {
                    tracing::warn!("Ignoring unrecognized stored voice: {saved}");
                    VoiceId::default()
                })
            });
        let instructions = store.get(INSTRUCTIONS_KEY).unwrap_or_default();
        Self { voice, instructions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_defaults_from_empty_store() {
        let store = MemoryStore::new();
        let settings = Settings::load(&store);
        assert_eq!(settings.voice, VoiceId::Marin);
        assert!(settings.instructions.is_empty());
    }

    #[test]
    fn load_reads_saved_values() {
        let mut store = MemoryStore::new();
        store.set(VOICE_KEY, "nova").unwrap();
        store.set(INSTRUCTIONS_KEY, "be brief").unwrap();

        let settings = Settings::load(&store);
        assert_eq!(settings.voice, VoiceId::Nova);
        assert_eq!(settings.instructions, "be brief");
    }

    #[test]
    fn load_falls_back_on_garbage_voice() {
        let mut store = MemoryStore::new();
        store.set(VOICE_KEY, "klaxon").unwrap();

        let settings = Settings::load(&store);
        assert_eq!(settings.voice, VoiceId::Marin);
    }

    #[test]
    fn json_file_store_round_trips() {
        let path = std::env::temp_dir().join(format!(
            "voicebridge-settings-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let mut store = JsonFileStore::open(&path).unwrap();
            assert_eq!(store.get(VOICE_KEY), None);
            store.set(VOICE_KEY, "shimmer").unwrap();
        }

        let mut reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get(VOICE_KEY).as_deref(), Some("shimmer"));
        reopened.remove(VOICE_KEY).unwrap();

        let emptied = JsonFileStore::open(&path).unwrap();
        assert_eq!(emptied.get(VOICE_KEY), None);

        let _ = std::fs::remove_file(&path);
    }
}

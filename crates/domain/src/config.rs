//! Hierarchical configuration store.
//!
//! One YAML document addressed by dot-delimited paths (`api.openai_key`,
//! `discussion.ai1_prompt`, ...). Reads are typed with caller defaults;
//! writes land in memory and mark the store dirty until [`ConfigStore::save`]
//! persists the document.
//!
//! Location: `PARLEY_CONFIG` wins when set; a packaged install (executable
//! outside any cargo `target/` directory) uses the per-user data directory;
//! a source checkout uses `./config.yaml`.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};

/// Application directory name under the per-user data dir.
pub const APP_DIR: &str = "parley";

/// Default config file name.
pub const CONFIG_FILE: &str = "config.yaml";

struct Inner {
    root: Value,
    dirty: bool,
}

/// Thread-safe dot-path configuration store backed by one YAML file.
pub struct ConfigStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl ConfigStore {
    /// Open the store at `path`, loading the document if the file exists.
    ///
    /// A malformed document is an error; a missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let root = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&raw)?
        } else {
            Value::Mapping(Mapping::new())
        };
        tracing::debug!(path = %path.display(), "config store opened");
        Ok(Self {
            path,
            inner: Mutex::new(Inner { root, dirty: false }),
        })
    }

    /// Open the store at the default location for this process.
    pub fn open_default() -> Result<Self> {
        Self::open(default_config_path())
    }

    /// The file this store persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw value at a dot path, cloned out of the document.
    pub fn get(&self, path: &str) -> Option<Value> {
        let inner = self.inner.lock();
        lookup(&inner.root, path).cloned()
    }

    /// String value at `path`, or `default` when absent or not a string.
    pub fn get_str(&self, path: &str, default: &str) -> String {
        self.get(path)
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| default.to_owned())
    }

    /// String value at `path`; falls back to the environment variable, then
    /// `None`. Empty strings count as absent in both sources.
    pub fn get_str_or_env(&self, path: &str, env_var: &str) -> Option<String> {
        if let Some(v) = self.get(path).and_then(|v| v.as_str().map(str::to_owned)) {
            if !v.is_empty() {
                return Some(v);
            }
        }
        std::env::var(env_var).ok().filter(|v| !v.is_empty())
    }

    pub fn get_f64(&self, path: &str, default: f64) -> f64 {
        self.get(path).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn get_u64(&self, path: &str, default: u64) -> u64 {
        self.get(path).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        self.get(path).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// Set the value at a dot path, creating intermediate mappings, and mark
    /// the store dirty.
    pub fn set(&self, path: &str, value: impl Into<Value>) {
        let mut inner = self.inner.lock();
        insert(&mut inner.root, path, value.into());
        inner.dirty = true;
    }

    /// Remove the value at a dot path. Returns whether anything was removed.
    pub fn unset(&self, path: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = remove(&mut inner.root, path);
        if removed {
            inner.dirty = true;
        }
        removed
    }

    /// Whether unsaved changes exist.
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    /// Persist the document as a single YAML file and clear the dirty flag.
    pub fn save(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let doc = serde_yaml::to_string(&inner.root)?;
        std::fs::write(&self.path, doc)?;
        inner.dirty = false;
        tracing::debug!(path = %self.path.display(), "config saved");
        Ok(())
    }
}

/// Resolve the default config path for this process.
///
/// `PARLEY_CONFIG` overrides everything. A packaged binary (not running out
/// of a cargo `target/` tree) keeps its config in the per-user data dir; a
/// source checkout uses the working directory, so `cargo run` never touches
/// user state.
pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("PARLEY_CONFIG") {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    if running_packaged() {
        user_data_dir().join(CONFIG_FILE)
    } else {
        PathBuf::from(CONFIG_FILE)
    }
}

/// Per-user data directory for salt and history files
/// (`$XDG_DATA_HOME/parley` or the platform equivalent).
pub fn user_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn running_packaged() -> bool {
    std::env::current_exe()
        .map(|exe| !exe.components().any(|c| c.as_os_str() == "target"))
        .unwrap_or(false)
}

// ── dot-path plumbing ───────────────────────────────────────────

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.split('.') {
        node = node.as_mapping()?.get(&Value::from(segment))?;
    }
    Some(node)
}

fn insert(root: &mut Value, path: &str, value: Value) {
    let mut node = root;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        if !node.is_mapping() {
            *node = Value::Mapping(Mapping::new());
        }
        let map = node.as_mapping_mut().expect("just ensured mapping");
        let key = Value::from(*segment);
        if i == segments.len() - 1 {
            map.insert(key, value);
            return;
        }
        node = map
            .entry(key)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }
}

fn remove(root: &mut Value, path: &str) -> bool {
    let Some((parent_path, leaf)) = path.rsplit_once('.') else {
        return root
            .as_mapping_mut()
            .map(|m| m.remove(&Value::from(path)).is_some())
            .unwrap_or(false);
    };
    let mut node = root;
    for segment in parent_path.split('.') {
        let Some(next) = node
            .as_mapping_mut()
            .and_then(|m| m.get_mut(&Value::from(segment)))
        else {
            return false;
        };
        node = next;
    }
    node.as_mapping_mut()
        .map(|m| m.remove(&Value::from(leaf)).is_some())
        .unwrap_or(false)
}

/// Validate that a value is usable at a recognised option path. Unknown
/// paths pass through untouched (the host may store its own groups, e.g.
/// `app.window.*` or `language.selection`).
pub fn coerce_known(path: &str, value: &Value) -> Result<()> {
    match path {
        "translation.provider" => {
            let s = value
                .as_str()
                .ok_or_else(|| Error::Config(format!("{path} must be a string")))?;
            s.parse::<crate::provider::ProviderTag>().map(|_| ())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("config.yaml")).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_file_starts_empty() {
        let (_dir, store) = temp_store();
        assert!(store.get("api.openai_key").is_none());
        assert!(!store.is_dirty());
    }

    #[test]
    fn set_get_roundtrip_with_nesting() {
        let (_dir, store) = temp_store();
        store.set("api.ollama_base_url", "http://127.0.0.1:11434");
        store.set("discussion.ai1_prompt", "be curious");
        assert_eq!(
            store.get_str("api.ollama_base_url", ""),
            "http://127.0.0.1:11434"
        );
        assert_eq!(store.get_str("discussion.ai1_prompt", ""), "be curious");
        assert!(store.is_dirty());
    }

    #[test]
    fn save_reload_preserves_values() {
        let (dir, store) = temp_store();
        store.set("chat.system_prompt", "be brief");
        store.set("translation.default_model", "llama3");
        store.set("debate.rounds", 4u64);
        store.save().unwrap();
        assert!(!store.is_dirty());

        let reloaded = ConfigStore::open(dir.path().join("config.yaml")).unwrap();
        assert_eq!(reloaded.get_str("chat.system_prompt", ""), "be brief");
        assert_eq!(reloaded.get_str("translation.default_model", ""), "llama3");
        assert_eq!(reloaded.get_u64("debate.rounds", 0), 4);
    }

    #[test]
    fn typed_getters_fall_back_to_defaults() {
        let (_dir, store) = temp_store();
        store.set("chat.system_prompt", "text");
        assert_eq!(store.get_f64("chat.system_prompt", 0.5), 0.5);
        assert_eq!(store.get_u64("nope", 7), 7);
        assert!(store.get_bool("nope", true));
    }

    #[test]
    fn env_fallback_applies_when_config_empty() {
        let (_dir, store) = temp_store();
        std::env::set_var("PL_TEST_CFG_FALLBACK", "from-env");
        assert_eq!(
            store.get_str_or_env("api.test_key", "PL_TEST_CFG_FALLBACK"),
            Some("from-env".into())
        );

        store.set("api.test_key", "from-config");
        assert_eq!(
            store.get_str_or_env("api.test_key", "PL_TEST_CFG_FALLBACK"),
            Some("from-config".into())
        );
        std::env::remove_var("PL_TEST_CFG_FALLBACK");
    }

    #[test]
    fn empty_config_string_counts_as_absent() {
        let (_dir, store) = temp_store();
        store.set("api.test_key2", "");
        assert_eq!(store.get_str_or_env("api.test_key2", "PL_TEST_UNSET_VAR_X"), None);
    }

    #[test]
    fn unset_removes_and_marks_dirty() {
        let (_dir, store) = temp_store();
        store.set("api.openai_key", "secret");
        store.save().unwrap();
        assert!(store.unset("api.openai_key"));
        assert!(store.is_dirty());
        assert!(store.get("api.openai_key").is_none());
        assert!(!store.unset("api.openai_key"));
    }

    #[test]
    fn set_overwrites_scalar_with_mapping() {
        let (_dir, store) = temp_store();
        store.set("app", "scalar");
        store.set("app.window.width", 1024u64);
        assert_eq!(store.get_u64("app.window.width", 0), 1024);
    }

    #[test]
    fn coerce_known_validates_translation_provider() {
        assert!(coerce_known("translation.provider", &Value::from("ollama")).is_ok());
        assert!(coerce_known("translation.provider", &Value::from("bogus")).is_err());
        assert!(coerce_known("anything.else", &Value::from(1)).is_ok());
    }
}

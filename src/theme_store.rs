use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Preferences key holding the last selected theme.
pub const THEME_STORAGE_KEY: &str = "theme";
pub const FALLBACK_THEME: &str = "light";
const CLASS_PREFIX: &str = "theme-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(usize);

type Listener = Box<dyn FnMut(&str)>;

/// The active theme, persisted in a preferences file and mirrored to
/// subscribers whenever it changes.
pub struct ThemeStore {
    current: String,
    available: Vec<String>,
    storage: Option<PathBuf>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: usize,
}

impl ThemeStore {
    /// Loads the stored theme. A missing or unreadable preferences file, or a
    /// stored name that is no longer available, falls back to the default.
    pub fn load(available: Vec<String>, storage: Option<PathBuf>) -> Self {
        let stored = storage
            .as_deref()
            .and_then(|path| read_preferences(path).ok())
            .and_then(|prefs| prefs.get(THEME_STORAGE_KEY).and_then(Value::as_str).map(str::to_string));

        let mut store = Self {
            current: String::new(),
            available,
            storage,
            listeners: Vec::new(),
            next_id: 0,
        };
        store.current = match stored {
            Some(name) if store.is_available(&name) => name,
            Some(name) => {
                debug!(theme = %name, "stored theme no longer available");
                store.default_theme()
            }
            None => store.default_theme(),
        };
        store
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn available(&self) -> &[String] {
        &self.available
    }

    /// Root class that activates the current theme.
    pub fn class_name(&self) -> String {
        format!("{}{}", CLASS_PREFIX, self.current)
    }

    pub fn default_theme(&self) -> String {
        self.available
            .first()
            .cloned()
            .unwrap_or_else(|| FALLBACK_THEME.to_string())
    }

    fn is_available(&self, name: &str) -> bool {
        self.available.is_empty() || self.available.iter().any(|t| t == name)
    }

    pub fn set(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if !self.is_available(name) {
            return Err(match closest(name, &self.available) {
                Some(suggestion) => anyhow!("Unknown theme '{}'. Did you mean '{}'?", name, suggestion),
                None => anyhow!("Unknown theme '{}'. Available: {}", name, self.available.join(", ")),
            });
        }
        self.persist(name)?;
        if self.current != name {
            info!(from = %self.current, to = %name, "theme changed");
            self.current = name.to_string();
            self.notify();
        }
        Ok(())
    }

    /// Applies the theme named by a `theme-<name>` class in a class
    /// attribute; without one, falls back to the default theme.
    pub fn sync_from_class_list(&mut self, class_attr: &str) -> Result<()> {
        let detected = theme_from_class_list(class_attr)
            .filter(|name| self.is_available(name))
            .unwrap_or_else(|| self.default_theme());
        self.set(&detected)
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&str) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    fn notify(&mut self) {
        let current = self.current.clone();
        for (_, listener) in &mut self.listeners {
            listener(&current);
        }
    }

    fn persist(&self, name: &str) -> Result<()> {
        let Some(path) = &self.storage else {
            return Ok(());
        };
        // Keep whatever else lives in the preferences file.
        let mut prefs = read_preferences(path).unwrap_or_default();
        prefs.insert(THEME_STORAGE_KEY.to_string(), Value::String(name.to_string()));

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(path, serde_json::to_string_pretty(&Value::Object(prefs))?)
            .with_context(|| format!("Failed to write preferences: {}", path.display()))?;
        Ok(())
    }
}

fn read_preferences(path: &Path) -> Result<Map<String, Value>> {
    let text = fs::read_to_string(path)?;
    match serde_json::from_str(&text)? {
        Value::Object(map) => Ok(map),
        _ => Err(anyhow!("preferences file is not a JSON object")),
    }
}

/// Theme named by the first `theme-<name>` class, e.g. `"dark theme-ocean"`.
pub fn theme_from_class_list(class_attr: &str) -> Option<String> {
    class_attr
        .split_whitespace()
        .find_map(|class| class.strip_prefix(CLASS_PREFIX))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn closest<'a>(name: &str, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (c, strsim::jaro_winkler(&name.to_lowercase(), &c.to_lowercase())))
        .filter(|(_, score)| *score > 0.7)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn themes() -> Vec<String> {
        vec!["cosmic".to_string(), "light".to_string(), "ocean".to_string()]
    }

    #[test]
    fn test_missing_storage_falls_back_to_first_theme() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThemeStore::load(themes(), Some(dir.path().join("prefs.json")));
        assert_eq!(store.current(), "cosmic");
        assert_eq!(store.class_name(), "theme-cosmic");

        let empty = ThemeStore::load(Vec::new(), None);
        assert_eq!(empty.current(), FALLBACK_THEME);
    }

    #[test]
    fn test_set_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"sidebar": "collapsed"}"#).unwrap();

        let mut store = ThemeStore::load(themes(), Some(path.clone()));
        store.set("ocean").unwrap();

        let reloaded = ThemeStore::load(themes(), Some(path.clone()));
        assert_eq!(reloaded.current(), "ocean");

        let prefs = read_preferences(&path).unwrap();
        assert_eq!(prefs["sidebar"], "collapsed");
    }

    #[test]
    fn test_corrupt_or_stale_storage_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        fs::write(&path, "not json").unwrap();
        assert_eq!(ThemeStore::load(themes(), Some(path.clone())).current(), "cosmic");

        fs::write(&path, r#"{"theme": "retired"}"#).unwrap();
        assert_eq!(ThemeStore::load(themes(), Some(path.clone())).current(), "cosmic");
    }

    #[test]
    fn test_unknown_theme_suggests_closest() {
        let mut store = ThemeStore::load(themes(), None);
        let err = store.set("ocaen").unwrap_err();
        assert!(err.to_string().contains("Did you mean 'ocean'"), "{}", err);
        assert_eq!(store.current(), "cosmic");
    }

    #[test]
    fn test_subscribers_hear_only_real_changes() {
        let mut store = ThemeStore::load(themes(), None);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = store.subscribe(move |name| sink.borrow_mut().push(name.to_string()));

        store.set("ocean").unwrap();
        store.set("ocean").unwrap();
        store.set("light").unwrap();
        assert_eq!(*seen.borrow(), vec!["ocean", "light"]);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.set("cosmic").unwrap();
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_theme_from_class_list() {
        assert_eq!(theme_from_class_list("dark theme-ocean antialiased"), Some("ocean".to_string()));
        assert_eq!(theme_from_class_list("dark antialiased"), None);
        assert_eq!(theme_from_class_list("theme-"), None);
        assert_eq!(theme_from_class_list(""), None);
    }

    #[test]
    fn test_sync_from_class_list_falls_back_silently() {
        let mut store = ThemeStore::load(themes(), None);
        store.sync_from_class_list("theme-light").unwrap();
        assert_eq!(store.current(), "light");

        store.sync_from_class_list("theme-unknown").unwrap();
        assert_eq!(store.current(), "cosmic");

        store.set("ocean").unwrap();
        store.sync_from_class_list("no-theme-here").unwrap();
        assert_eq!(store.current(), "cosmic");
    }
}

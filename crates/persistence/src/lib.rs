#![deny(warnings)]

//! Persistence layer: versioned key-value snapshots.
//!
//! Values are stored as JSON text under `"{id}:v{version}"` keys. Readers
//! tolerate snapshots written by earlier versions with a different encoding
//! and fall back to a default when a value is missing or unreadable.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Stable key for `id` at `version`.
pub fn versioned_key(id: &str, version: u32) -> String {
    format!("{id}:v{version}")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Notification sent to subscribers when a key changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyChanged {
    pub key: String,
    /// New raw value; `None` when removed.
    pub value: Option<String>,
}

/// Minimal string key-value store.
pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
    /// Receive a [`KeyChanged`] for every subsequent change.
    fn subscribe(&mut self) -> Receiver<KeyChanged>;
}

#[derive(Debug, Default)]
struct Subscribers(Vec<Sender<KeyChanged>>);

impl Subscribers {
    fn add(&mut self) -> Receiver<KeyChanged> {
        let (tx, rx) = channel();
        self.0.push(tx);
        rx
    }

    fn notify(&mut self, key: &str, value: Option<&str>) {
        let event = KeyChanged {
            key: key.to_string(),
            value: value.map(str::to_string),
        };
        // Dropped receivers are pruned on send failure.
        self.0.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
    subscribers: Subscribers,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.subscribers.notify(key, Some(value));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.entries.remove(key).is_some() {
            self.subscribers.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&mut self) -> Receiver<KeyChanged> {
        self.subscribers.add()
    }
}

/// Index file mapping file stems back to the keys that produced them.
const KEY_INDEX: &str = "keys.index";

/// Directory-backed store: one `<key>.json` file per key.
///
/// Keys are sanitized into file names; the original keys are kept in a
/// shared index file so changes made by other processes, picked up by
/// [`FileStore::poll_external`], are reported under their real key.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    seen: BTreeMap<String, SystemTime>,
    keys: BTreeMap<String, String>,
    subscribers: Subscribers,
}

fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Files that appeared, changed or vanished since the previous scan.
#[derive(Debug, Default)]
struct ScanDelta {
    changed: Vec<String>,
    removed: Vec<String>,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let mut store = Self {
            root,
            seen: BTreeMap::new(),
            keys: BTreeMap::new(),
            subscribers: Subscribers::default(),
        };
        store.keys = store.read_index();
        store.scan()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", file_stem(key)))
    }

    fn read_index(&self) -> BTreeMap<String, String> {
        fs::read_to_string(self.root.join(KEY_INDEX))
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    /// Record `key` under its stem, merging with entries other stores wrote.
    fn remember_key(&mut self, key: &str) -> Result<(), StoreError> {
        let stem = file_stem(key);
        if self.keys.get(&stem).map(String::as_str) == Some(key) {
            return Ok(());
        }
        let on_disk = self.read_index();
        self.keys.extend(on_disk);
        self.keys.insert(stem, key.to_string());
        fs::write(self.root.join(KEY_INDEX), serde_json::to_string(&self.keys)?)?;
        Ok(())
    }

    fn key_for(&self, stem: &str) -> String {
        self.keys
            .get(stem)
            .cloned()
            .unwrap_or_else(|| stem.to_string())
    }

    fn scan(&mut self) -> Result<ScanDelta, StoreError> {
        let mut delta = ScanDelta::default();
        let mut present = BTreeSet::new();
        for ent in fs::read_dir(&self.root)? {
            let path = ent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            present.insert(stem.to_string());
            let mtime = fs::metadata(&path)?
                .modified()
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if self.seen.get(stem) != Some(&mtime) {
                self.seen.insert(stem.to_string(), mtime);
                delta.changed.push(stem.to_string());
            }
        }
        delta.removed = self
            .seen
            .keys()
            .filter(|stem| !present.contains(*stem))
            .cloned()
            .collect();
        for stem in &delta.removed {
            self.seen.remove(stem);
        }
        Ok(delta)
    }

    /// Notify subscribers about files written or deleted by someone else
    /// since the last scan. Returns the number of keys reported.
    pub fn poll_external(&mut self) -> Result<usize, StoreError> {
        let delta = self.scan()?;
        if delta.changed.is_empty() && delta.removed.is_empty() {
            return Ok(0);
        }
        let on_disk = self.read_index();
        self.keys.extend(on_disk);
        for stem in &delta.changed {
            let key = self.key_for(stem);
            let value = fs::read_to_string(self.root.join(format!("{stem}.json"))).ok();
            debug!(%key, "external change");
            self.subscribers.notify(&key, value.as_deref());
        }
        for stem in &delta.removed {
            let key = self.key_for(stem);
            debug!(%key, "external removal");
            self.subscribers.notify(&key, None);
        }
        Ok(delta.changed.len() + delta.removed.len())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.remember_key(key)?;
        let path = self.path_for(key);
        fs::write(&path, value)?;
        let mtime = fs::metadata(&path)?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.seen.insert(file_stem(key), mtime);
        self.subscribers.notify(key, Some(value));
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {
                self.seen.remove(&file_stem(key));
                self.subscribers.notify(key, None);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn subscribe(&mut self) -> Receiver<KeyChanged> {
        self.subscribers.add()
    }
}

/// Decode a stored value, accepting earlier encodings:
/// plain JSON, JSON wrapped in a JSON string, or bare text.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Option<T> {
    if let Ok(v) = serde_json::from_str::<T>(raw) {
        return Some(v);
    }
    if let Ok(inner) = serde_json::from_str::<String>(raw) {
        if let Ok(v) = serde_json::from_str::<T>(&inner) {
            return Some(v);
        }
    }
    serde_json::from_value(serde_json::Value::String(raw.trim().to_string())).ok()
}

/// Read `key`, falling back to `default` if it is absent or unreadable.
pub fn load_or_default<S, T>(store: &S, key: &str, default: T) -> T
where
    S: KvStore + ?Sized,
    T: DeserializeOwned,
{
    match store.get(key) {
        Ok(Some(raw)) => decode(&raw).unwrap_or_else(|| {
            warn!(key, "unreadable snapshot, using default");
            default
        }),
        Ok(None) => default,
        Err(e) => {
            warn!(key, error = %e, "snapshot read failed, using default");
            default
        }
    }
}

/// Serialize `value` as JSON under `key`.
pub fn save<S, T>(store: &mut S, key: &str, value: &T) -> Result<(), StoreError>
where
    S: KvStore + ?Sized,
    T: Serialize + ?Sized,
{
    let text = serde_json::to_string(value)?;
    store.set(key, &text)?;
    debug!(key, bytes = text.len(), "snapshot saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Settings {
        interval_ms: u64,
        enabled: bool,
    }

    #[test]
    fn key_carries_version() {
        assert_eq!(versioned_key("settings", 3), "settings:v3");
    }

    #[test]
    fn memory_roundtrip_and_notify() {
        let mut store = MemoryStore::new();
        let rx = store.subscribe();
        let s = Settings {
            interval_ms: 250,
            enabled: true,
        };
        save(&mut store, "settings:v1", &s).unwrap();
        assert_eq!(load_or_default(&store, "settings:v1", Settings::default()), s);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.key, "settings:v1");
        assert!(ev.value.unwrap().contains("250"));
        store.remove("settings:v1").unwrap();
        assert_eq!(rx.try_recv().unwrap().value, None);
        assert!(store.is_empty());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut store = MemoryStore::new();
        drop(store.subscribe());
        store.set("k", "1").unwrap();
        assert!(store.subscribers.0.is_empty());
    }

    #[test]
    fn legacy_encodings_are_tolerated() {
        assert_eq!(decode::<u64>("5000"), Some(5000));
        // JSON text wrapped in a JSON string.
        assert_eq!(decode::<u64>("\"5000\""), Some(5000));
        assert_eq!(
            decode::<Settings>("\"{\\\"interval_ms\\\":7,\\\"enabled\\\":false}\""),
            Some(Settings {
                interval_ms: 7,
                enabled: false
            })
        );
        // Bare text for string-typed values.
        assert_eq!(decode::<String>("hello"), Some("hello".to_string()));
        assert_eq!(decode::<u64>("{broken"), None);
    }

    #[test]
    fn malformed_or_missing_falls_back() {
        let mut store = MemoryStore::new();
        store.set("settings:v1", "{not json").unwrap();
        assert_eq!(
            load_or_default(&store, "settings:v1", Settings::default()),
            Settings::default()
        );
        assert_eq!(load_or_default(&store, "absent", 9u32), 9);
    }

    #[test]
    fn file_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileStore::open(dir.path()).unwrap();
            save(&mut store, "resources:v1", &vec![1.0, 2.0]).unwrap();
            assert!(store.path_for("resources:v1").ends_with("resources_v1.json"));
        }
        let mut store = FileStore::open(dir.path()).unwrap();
        let v: Vec<f64> = load_or_default(&store, "resources:v1", vec![]);
        assert_eq!(v, vec![1.0, 2.0]);
        assert_eq!(store.get("missing").unwrap(), None);
        store.remove("resources:v1").unwrap();
        store.remove("resources:v1").unwrap();
        assert_eq!(store.get("resources:v1").unwrap(), None);
    }

    #[test]
    fn file_store_reports_external_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        let rx = store.subscribe();
        assert_eq!(store.poll_external().unwrap(), 0);
        fs::write(dir.path().join("other.json"), "42").unwrap();
        assert_eq!(store.poll_external().unwrap(), 1);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.key, "other");
        assert_eq!(ev.value.as_deref(), Some("42"));
        assert_eq!(store.poll_external().unwrap(), 0);
    }

    #[test]
    fn external_changes_use_the_written_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = FileStore::open(dir.path()).unwrap();
        let rx = watcher.subscribe();
        let mut writer = FileStore::open(dir.path()).unwrap();

        writer.set("settings:v1", "{\"a\":1}").unwrap();
        assert_eq!(watcher.poll_external().unwrap(), 1);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.key, "settings:v1");
        assert_eq!(ev.value.as_deref(), Some("{\"a\":1}"));

        writer.remove("settings:v1").unwrap();
        assert_eq!(watcher.poll_external().unwrap(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            KeyChanged {
                key: "settings:v1".into(),
                value: None
            }
        );
        assert_eq!(watcher.poll_external().unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn key_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileStore::open(dir.path()).unwrap();
            store.set("resources:v1", "[]").unwrap();
        }
        let mut store = FileStore::open(dir.path()).unwrap();
        let rx = store.subscribe();
        fs::remove_file(dir.path().join("resources_v1.json")).unwrap();
        assert_eq!(store.poll_external().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap().key, "resources:v1");
    }
}

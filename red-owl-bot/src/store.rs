use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::persist::{load_json, save_json};

/// Thread-safe wrapper around a JSON state file. Every mutation is saved
/// before the lock is released.
pub struct PersistedState<T> {
    inner: Arc<Mutex<T>>,
    path: Arc<PathBuf>,
}

impl<T> Clone for PersistedState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            path: Arc::clone(&self.path),
        }
    }
}

impl<T: Serialize + DeserializeOwned + Default> PersistedState<T> {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let value = load_json(&path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(value)),
            path: Arc::new(path),
        })
    }

    /// Read a value out of the state.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock().unwrap())
    }

    /// Mutate the state and persist it.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut state = self.inner.lock().unwrap();
        let result = f(&mut state);
        save_json(&self.path, &*state)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn updates_are_visible_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let state = PersistedState::<BTreeMap<String, u32>>::load(&path).unwrap();
        let previous = state
            .update(|map| map.insert("rounds".to_owned(), 2))
            .unwrap();
        assert_eq!(previous, None);

        let reloaded = PersistedState::<BTreeMap<String, u32>>::load(&path).unwrap();
        assert_eq!(reloaded.read(|map| map.get("rounds").copied()), Some(2));
    }

    #[test]
    fn clones_share_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = PersistedState::<Vec<u32>>::load(dir.path().join("list.json")).unwrap();
        let other = state.clone();

        other.update(|list| list.push(7)).unwrap();

        assert_eq!(state.read(|list| list.clone()), vec![7]);
    }
}

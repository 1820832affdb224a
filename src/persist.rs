use std::{cell::RefCell, collections::HashMap, rc::Rc};

use derive_ex::derive_ex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{PersistError, StateFields};


/// Key-value backend for persisted state.
pub trait Storage {
    fn get_item(&self, key: &str) -> Result<Option<String>, PersistError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), PersistError>;
    fn remove_item(&self, key: &str) -> Result<(), PersistError>;
}

/// In-process [`Storage`]. Clones share the same items.
#[derive_ex(Clone, Default)]
#[default(Self::new())]
pub struct MemoryStorage(Rc<RefCell<MemoryStorageData>>);

#[derive(Default)]
struct MemoryStorageData {
    items: HashMap<String, String>,
    is_unavailable: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(MemoryStorageData::default())))
    }

    /// Makes every operation fail with [`PersistError::Unavailable`] while `value` is `true`.
    pub fn set_unavailable(&self, value: bool) {
        self.0.borrow_mut().is_unavailable = value;
    }
    pub fn len(&self) -> usize {
        self.0.borrow().items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.borrow().items.is_empty()
    }

    fn with<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>) -> T,
    ) -> Result<T, PersistError> {
        let mut data = self.0.borrow_mut();
        if data.is_unavailable {
            return Err(PersistError::Unavailable("memory storage disabled".into()));
        }
        Ok(f(&mut data.items))
    }
}
impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, PersistError> {
        self.with(|items| items.get(key).cloned())
    }
    fn set_item(&self, key: &str, value: &str) -> Result<(), PersistError> {
        self.with(|items| {
            items.insert(key.to_string(), value.to_string());
        })
    }
    fn remove_item(&self, key: &str) -> Result<(), PersistError> {
        self.with(|items| {
            items.remove(key);
        })
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedBlob<P> {
    state: P,
    version: u32,
}

type MigrateFn<P> = dyn Fn(serde_json::Value, u32) -> Option<P>;

/// Configuration of the persistence of a [`Store`](crate::Store).
///
/// `P` is the serialized part of the state.
pub struct PersistOptions<S, P> {
    name: String,
    storage: Rc<dyn Storage>,
    version: u32,
    partialize: Box<dyn Fn(&S) -> P>,
    merge: Box<dyn Fn(P, S) -> S>,
    migrate: Option<Box<MigrateFn<P>>>,
}

impl<S: StateFields> PersistOptions<S, S::Patch>
where
    S::Patch: Serialize + DeserializeOwned + 'static,
{
    /// Persists the patch selected by `partialize`.
    ///
    /// On hydration, the persisted patch is shallowly merged into the initial state. Persisted fields win.
    pub fn new(
        name: impl Into<String>,
        storage: impl Storage + 'static,
        partialize: impl Fn(&S) -> S::Patch + 'static,
    ) -> Self {
        Self::custom(name, storage, partialize, |patch, mut state: S| {
            state.apply_patch(patch);
            state
        })
    }
}

impl<S: StateFields, P: Serialize + DeserializeOwned + 'static> PersistOptions<S, P> {
    pub fn custom(
        name: impl Into<String>,
        storage: impl Storage + 'static,
        partialize: impl Fn(&S) -> P + 'static,
        merge: impl Fn(P, S) -> S + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            storage: Rc::new(storage),
            version: 0,
            partialize: Box::new(partialize),
            merge: Box::new(merge),
            migrate: None,
        }
    }

    /// Sets the version written with every blob. Defaults to `0`.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the function that converts a blob written with another version.
    ///
    /// Without it, or if it returns `None`, such a blob is discarded.
    pub fn migrate(mut self, f: impl Fn(serde_json::Value, u32) -> Option<P> + 'static) -> Self {
        self.migrate = Some(Box::new(f));
        self
    }

    /// Replaces the function combining the persisted value with the initial state.
    pub fn merge(mut self, f: impl Fn(P, S) -> S + 'static) -> Self {
        self.merge = Box::new(f);
        self
    }

    fn read(&self) -> Result<Option<P>, PersistError> {
        let Some(text) = self.storage.get_item(&self.name)? else {
            return Ok(None);
        };
        let blob: PersistedBlob<serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| PersistError::Corrupted(e.to_string()))?;
        if blob.version == self.version {
            return serde_json::from_value(blob.state)
                .map(Some)
                .map_err(|e| PersistError::Corrupted(e.to_string()));
        }
        let Some(migrate) = &self.migrate else {
            tracing::debug!(
                name = %self.name,
                stored = blob.version,
                expected = self.version,
                "discarding persisted state with another version"
            );
            return Ok(None);
        };
        Ok(migrate(blob.state, blob.version))
    }

    fn hydrate(&self, state: S) -> (S, bool) {
        match self.read() {
            Ok(Some(persisted)) => ((self.merge)(persisted, state), true),
            Ok(None) => (state, false),
            Err(e @ PersistError::Corrupted(_)) => {
                tracing::warn!(name = %self.name, error = %e, "ignoring persisted state");
                (state, false)
            }
            Err(e) => {
                tracing::debug!(name = %self.name, error = %e, "failed to read persisted state");
                (state, false)
            }
        }
    }

    fn write(&self, state: &S) -> Result<(), PersistError> {
        let blob = PersistedBlob {
            state: (self.partialize)(state),
            version: self.version,
        };
        let text =
            serde_json::to_string(&blob).map_err(|e| PersistError::Serialize(e.to_string()))?;
        self.storage.set_item(&self.name, &text)
    }

    pub(crate) fn into_persister(self) -> Persister<S> {
        Persister(Box::new(self))
    }
}

trait DynPersist<S> {
    fn hydrate(&self, state: S) -> (S, bool);
    fn write(&self, state: &S) -> Result<(), PersistError>;
    fn clear(&self) -> Result<(), PersistError>;
    fn name(&self) -> &str;
}

impl<S: StateFields, P: Serialize + DeserializeOwned + 'static> DynPersist<S>
    for PersistOptions<S, P>
{
    fn hydrate(&self, state: S) -> (S, bool) {
        PersistOptions::hydrate(self, state)
    }
    fn write(&self, state: &S) -> Result<(), PersistError> {
        PersistOptions::write(self, state)
    }
    fn clear(&self) -> Result<(), PersistError> {
        self.storage.remove_item(&self.name)
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// Type-erased [`PersistOptions`] owned by a store.
pub(crate) struct Persister<S>(Box<dyn DynPersist<S>>);

impl<S> Persister<S> {
    /// Returns the state to start from and whether a persisted blob was applied.
    pub fn hydrate(&self, state: S) -> (S, bool) {
        self.0.hydrate(state)
    }

    /// Writes `state`. Failures are logged and otherwise ignored.
    pub fn save(&self, state: &S) {
        if let Err(e) = self.0.write(state) {
            tracing::debug!(name = self.0.name(), error = %e, "failed to persist state");
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.0.clear() {
            tracing::debug!(name = self.0.name(), error = %e, "failed to remove persisted state");
        }
    }
}

use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    rc::{Rc, Weak},
    time::Instant,
};

use derive_ex::derive_ex;
use parse_display::Display;
use serde::Serialize;
use slabmap::SlabMap;

use crate::{core::Scheduler, Clock, QueryConfig, QueryKeyError, Subscription};


/// Cache key built from the arguments of a query.
///
/// Two argument values produce the same key if and only if they serialize to the same JSON text.
#[derive(Clone, Display, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{0}")]
pub struct QueryKey(Rc<str>);

impl QueryKey {
    pub fn new<A: Serialize + ?Sized>(args: &A) -> Result<Self, QueryKeyError> {
        let text = serde_json::to_string(args).map_err(QueryKeyError::new)?;
        Ok(Self(text.into()))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the key of `args`, or logs a warning and returns `None`.
    pub(crate) fn of<A: Serialize + ?Sized>(args: &A) -> Option<Self> {
        match Self::new(args) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring query with arguments that cannot be used as a key");
                None
            }
        }
    }
}

/// Value stored for each key of a [`QueryCache`].
pub(crate) trait CacheValue: Clone + Default + 'static {
    /// An entry with a request in flight is never evicted.
    fn is_loading(&self) -> bool;
    fn fetched_at(&self) -> Option<Instant>;
}

type Listener<V> = Rc<dyn Fn(&V)>;

/// Keyed cache shared by the queries of one definition.
///
/// Owns the entries, the access-order ledger, the latest request id per key and the listener sets.
#[derive_ex(Clone, bound())]
pub(crate) struct QueryCache<V>(Rc<CacheNode<V>>);

struct CacheNode<V> {
    data: RefCell<CacheData<V>>,
    scheduler: Scheduler,
    clock: Rc<dyn Clock>,
    config: QueryConfig,
}

struct CacheData<V> {
    entries: HashMap<QueryKey, CacheEntry<V>>,
    ledger: VecDeque<QueryKey>,
    next_request_id: u64,
    eviction_pending: bool,
}

struct CacheEntry<V> {
    value: V,
    request_id: u64,
    listeners: SlabMap<Listener<V>>,
}

impl<V> CacheData<V> {
    fn touch(&mut self, key: &QueryKey) {
        if let Some(index) = self.ledger.iter().position(|k| k == key) {
            if let Some(key) = self.ledger.remove(index) {
                self.ledger.push_back(key);
            }
        }
    }
}

impl<V: CacheValue> QueryCache<V> {
    pub fn new(scheduler: Scheduler, clock: Rc<dyn Clock>, config: QueryConfig) -> Self {
        Self(Rc::new(CacheNode {
            data: RefCell::new(CacheData {
                entries: HashMap::new(),
                ledger: VecDeque::new(),
                next_request_id: 0,
                eviction_pending: false,
            }),
            scheduler,
            clock,
            config,
        }))
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.0.scheduler
    }
    pub fn now(&self) -> Instant {
        self.0.clock.now()
    }

    /// Returns the value of `key` and marks it as the most recently touched.
    pub fn get(&self, key: &QueryKey) -> Option<V> {
        let mut d = self.0.data.borrow_mut();
        let value = d.entries.get(key)?.value.clone();
        d.touch(key);
        Some(value)
    }

    /// Returns `true` if `key` holds data fetched within the staleness window.
    pub fn is_fresh(&self, key: &QueryKey) -> bool {
        let d = self.0.data.borrow();
        let Some(fetched_at) = d.entries.get(key).and_then(|e| e.value.fetched_at()) else {
            return false;
        };
        self.now().saturating_duration_since(fetched_at) < self.0.config.stale_time
    }

    pub fn request_id(&self, key: &QueryKey) -> Option<u64> {
        Some(self.0.data.borrow().entries.get(key)?.request_id)
    }

    pub fn len(&self) -> usize {
        self.0.data.borrow().entries.len()
    }

    /// Writes to the entry of `key`, creating it if needed.
    pub fn write(&self, key: &QueryKey, f: impl FnOnce(&mut V)) {
        self.entry(key);
        self.update_existing(key, |value, _| f(value));
    }

    /// Allocates a new request id for `key`, making every earlier request of `key` superseded.
    pub fn issue(&self, key: &QueryKey, f: impl FnOnce(&mut V)) -> u64 {
        self.entry(key);
        let id = {
            let mut d = self.0.data.borrow_mut();
            d.next_request_id += 1;
            let id = d.next_request_id;
            if let Some(e) = d.entries.get_mut(key) {
                e.request_id = id;
            }
            id
        };
        self.update_existing(key, |value, _| f(value));
        id
    }

    /// Applies `f` if `id` is still the latest request of `key`.
    ///
    /// Returns `false` if the result of the request was discarded.
    pub fn commit(&self, key: &QueryKey, id: u64, f: impl FnOnce(&mut V)) -> bool {
        self.update_existing(key, |value, latest| {
            if latest == id {
                f(value);
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    /// Writes to the entry of `key` if it exists and notifies its listeners.
    ///
    /// `f` receives the latest request id of `key`.
    pub fn update_existing<R>(&self, key: &QueryKey, f: impl FnOnce(&mut V, u64) -> R) -> Option<R> {
        let (ret, value, listeners) = {
            let mut d = self.0.data.borrow_mut();
            let e = d.entries.get_mut(key)?;
            let ret = f(&mut e.value, e.request_id);
            let value = e.value.clone();
            let listeners: Vec<_> = e.listeners.values().cloned().collect();
            d.touch(key);
            (ret, value, listeners)
        };
        for listener in listeners {
            listener(&value);
        }
        if self.len() > self.0.config.max_cache_size {
            self.schedule_eviction();
        }
        Some(ret)
    }

    /// Writes to every entry and notifies the listeners of each.
    pub fn update_all(&self, f: impl Fn(&mut V)) {
        let keys: Vec<_> = self.0.data.borrow().entries.keys().cloned().collect();
        for key in keys {
            self.update_existing(&key, |value, _| f(value));
        }
    }

    /// Registers `listener` for `key`. An entry with a listener is never evicted.
    pub fn subscribe(&self, key: &QueryKey, listener: impl Fn(&V) + 'static) -> Subscription {
        self.entry(key);
        let id = {
            let mut d = self.0.data.borrow_mut();
            d.touch(key);
            let Some(e) = d.entries.get_mut(key) else {
                return Subscription::empty();
            };
            e.listeners.insert(Rc::new(listener))
        };
        let key = key.clone();
        Subscription::from_weak_fn(Rc::downgrade(&self.0), move |node| {
            let is_unused = {
                let mut d = node.data.borrow_mut();
                match d.entries.get_mut(&key) {
                    Some(e) => {
                        e.listeners.remove(id);
                        e.listeners.is_empty()
                    }
                    None => false,
                }
            };
            if is_unused {
                QueryCache(node).schedule_eviction();
            }
        })
    }

    fn entry(&self, key: &QueryKey) {
        let is_full = {
            let mut d = self.0.data.borrow_mut();
            if d.entries.contains_key(key) {
                return;
            }
            d.entries.insert(
                key.clone(),
                CacheEntry {
                    value: V::default(),
                    request_id: 0,
                    listeners: SlabMap::new(),
                },
            );
            d.ledger.push_back(key.clone());
            d.entries.len() > self.0.config.max_cache_size
        };
        if is_full {
            self.schedule_eviction();
        }
    }

    fn schedule_eviction(&self) {
        {
            let mut d = self.0.data.borrow_mut();
            if d.eviction_pending {
                return;
            }
            d.eviction_pending = true;
        }
        let node = Rc::downgrade(&self.0);
        self.0.scheduler.schedule_task(move || {
            if let Some(node) = Weak::upgrade(&node) {
                QueryCache(node).evict();
            }
        });
    }

    /// Removes the least recently touched entries without listeners or requests in flight
    /// until the number of entries does not exceed `max_cache_size`.
    pub fn evict(&self) {
        let mut evicted = Vec::new();
        {
            let mut d = self.0.data.borrow_mut();
            d.eviction_pending = false;
            let max = self.0.config.max_cache_size;
            let mut index = 0;
            while d.entries.len() > max && index < d.ledger.len() {
                let key = &d.ledger[index];
                let is_evictable = d
                    .entries
                    .get(key)
                    .map_or(true, |e| e.listeners.is_empty() && !e.value.is_loading());
                if !is_evictable {
                    index += 1;
                    continue;
                }
                if let Some(key) = d.ledger.remove(index) {
                    if let Some(e) = d.entries.remove(&key) {
                        tracing::debug!(key = %key, "evicting query");
                        evicted.push(e);
                    }
                }
            }
        }
        drop(evicted);
    }
}

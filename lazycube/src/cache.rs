/// An implementation of an LRU (Least Recently Used) cache.
///
use std::{collections::HashMap, fmt::Debug, hash::Hash, sync::Arc};

use parking_lot::{Condvar, Mutex};

use crate::errors::{Error, Result};

/// An LRU (least recently used) cache.
///
/// Values must implement ``Cacheable``, which self reports size, intended to be the number of
/// bytes (more or less) an object takes up in memory. For realized cubes that is a presence flag
/// and a double for each cell of each attribute.
///
/// The ``limit`` is passed in when instantiating the Cache. When an object is added to the cache
/// which causes the total size of objects stored in the cache to exceed the limit, objects are
/// evicted from the cache until the total size is back under the limit. Objects are evicted in
/// least recently used order.
///
/// The ``Cache`` is thread safe. When interrogating the cache with ``get``, a ``load`` function
/// is passed in that is used to compute the object in the event of a cache miss. If several
/// threads ask for the same missing object at once, it is only loaded once, with the other
/// threads waiting for that load to finish.
///
/// Keys identify immutable values, so nothing special needs to be done for invalidation. A failed
/// load is never cached: the loading thread gets the error, waiting threads get ``Error::Load``
/// and the next ``get`` tries again.
///
pub struct Cache<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    /// The actual cache
    recent: Mutex<Entries<K, V>>,

    /// Synchronization objects for objects that are currently being loaded
    loaders: Mutex<HashMap<K, Arc<Loader<V>>>>,
}

/// A trait for objects that can be cached
///
/// Cacheable objects must be able to self report their size via the ``size`` method.
///
pub trait Cacheable: Sized {
    /// Return the approximate number of bytes the object takes up in memory
    fn size(&self) -> u64;
}

/// Used to hand an object's load result to every thread waiting for that object.
struct Loader<V>
where
    V: Cacheable,
{
    /// ``None`` until the loading thread has finished or given up
    object: Mutex<Option<Result<Arc<V>>>>,

    finished: Condvar,
}

/// The entries stored in this cache.
///
/// Entries are directly accessible via ``map`` and also stored in a doubly
/// linked list where ``most_recent`` and ``least_recent`` are the two ends.
///
struct Entries<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    /// Sum of sizes of all entries must stay below this limit.
    limit: u64,

    /// Current sum of sizes of all entries.
    size: u64,

    map: HashMap<K, CacheEntry<K, V>>,

    most_recent: Option<K>,

    least_recent: Option<K>,
}

struct CacheEntry<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    key: K,

    object: Arc<V>,

    /// The next more recent key
    more_recent: Option<K>,

    /// The next less recent key
    less_recent: Option<K>,

    /// The size of this entry, as reported by the object's ``Cacheable::size`` method
    size: u64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    /// Instantiate an empty cache with given size limit.
    ///
    pub fn new(limit: u64) -> Self {
        let recent = Mutex::new(Entries {
            limit,
            size: 0,
            map: HashMap::new(),
            most_recent: None,
            least_recent: None,
        });
        let loaders = Mutex::new(HashMap::new());

        Self { recent, loaders }
    }

    /// Get an object by key
    ///
    /// If object isn't in the cache, will call ``load`` to compute the object and then store it
    /// in the cache. If the same object is already being loaded in another thread, this will wait
    /// for that load to finish and then return.
    ///
    pub fn get<L>(&self, key: &K, load: L) -> Result<Arc<V>>
    where
        L: FnOnce(K) -> Result<V>,
    {
        match self.lookup(key) {
            Some(object) => Ok(object),
            None => self.load(key, load),
        }
    }

    /// Whether an object is currently stored under ``key``
    pub fn contains(&self, key: &K) -> bool {
        self.recent.lock().map.contains_key(key)
    }

    /// Check if an object is already stored in the cache. If it is, move it to the most recently
    /// used position in the linked list and then return a new reference to it.
    ///
    fn lookup(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.recent.lock();
        let entry = entries.remove(key)?;
        let object = Arc::clone(&entry.object);
        entries.push_most_recent(entry);

        Some(object)
    }

    /// Load an object, or wait for the thread already loading it.
    ///
    fn load<L>(&self, key: &K, load: L) -> Result<Arc<V>>
    where
        L: FnOnce(K) -> Result<V>,
    {
        let (first, loader) = {
            let mut loaders = self.loaders.lock();
            match loaders.get(key) {
                Some(loader) => (false, Arc::clone(loader)),
                None => {
                    // Another thread may have finished loading between lookup and here
                    if let Some(object) = self.lookup(key) {
                        return Ok(object);
                    }
                    let loader = Arc::new(Loader::new());
                    loaders.insert(*key, Arc::clone(&loader));

                    (true, loader)
                }
            }
        };

        if !first {
            return loader.wait();
        }

        // Releases the key even if ``load`` panics
        let guard = LoadGuard {
            cache: self,
            key: *key,
            loader,
        };

        match load(*key) {
            Ok(object) => {
                let object = Arc::new(object);
                self.recent.lock().insert(*key, &object);
                guard.loader.finish(Ok(Arc::clone(&object)));

                Ok(object)
            }
            Err(err) => {
                guard.loader.finish(Err(Error::Load));

                Err(err)
            }
        }
    }
}

/// Held by the thread loading an object.
///
/// Dropping it removes the key's loader, so the next ``get`` for that key loads again. If the
/// load never finished, because it unwound, waiting threads are woken with ``Error::Load``.
///
struct LoadGuard<'a, K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    cache: &'a Cache<K, V>,
    key: K,
    loader: Arc<Loader<V>>,
}

impl<K, V> Drop for LoadGuard<'_, K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    fn drop(&mut self) {
        self.loader.finish(Err(Error::Load));
        self.cache.loaders.lock().remove(&self.key);
    }
}

impl<V> Loader<V>
where
    V: Cacheable,
{
    fn new() -> Self {
        Loader {
            object: Mutex::new(None),
            finished: Condvar::new(),
        }
    }

    /// Inform any waiting threads that the object has been loaded, or the loading thread has given
    /// up trying.
    ///
    /// Only the first outcome is kept.
    ///
    fn finish(&self, object: Result<Arc<V>>) {
        let mut slot = self.object.lock();
        if slot.is_none() {
            *slot = Some(object);
        }
        self.finished.notify_all();
    }

    /// Wait for the loading thread to finish loading the object, or give up trying.
    fn wait(&self) -> Result<Arc<V>> {
        let mut object = self.object.lock();
        loop {
            match &*object {
                Some(Ok(object)) => return Ok(Arc::clone(object)),
                Some(Err(_)) => return Err(Error::Load),
                None => self.finished.wait(&mut object),
            }
        }
    }
}

impl<K, V> Entries<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    /// Move an entry to the most recently used spot in the linked list.
    ///
    fn push_most_recent(&mut self, entry: CacheEntry<K, V>) {
        let old_head_key = self.most_recent;

        if let Some(old_head_key) = old_head_key {
            if old_head_key == entry.key {
                // Already at head, nothing to do
                self.map.insert(entry.key, entry);
                return;
            }

            // The old head now points at the new head
            if let Some(old_head) = self.map.remove(&old_head_key) {
                let less_recent = old_head.less_recent;
                let old_head = old_head.update(Some(entry.key), less_recent);
                self.map.insert(old_head_key, old_head);
            }
        }

        let entry = entry.update(None, old_head_key);
        self.most_recent = Some(entry.key);
        if self.least_recent.is_none() {
            // Only object in the list, so it is also the tail
            self.least_recent = Some(entry.key);
        }
        self.map.insert(entry.key, entry);
    }

    /// Remove an entry from the cache
    ///
    fn remove(&mut self, key: &K) -> Option<CacheEntry<K, V>> {
        let entry = self.map.remove(key)?;
        if self.most_recent == Some(entry.key) {
            self.most_recent = entry.less_recent;
        }

        if self.least_recent == Some(entry.key) {
            self.least_recent = entry.more_recent;
        }

        if let Some(key) = entry.less_recent {
            if let Some(less_recent) = self.map.remove(&key) {
                let less_recent_less_recent = less_recent.less_recent;
                let less_recent = less_recent.update(entry.more_recent, less_recent_less_recent);
                self.map.insert(key, less_recent);
            }
        }

        if let Some(key) = entry.more_recent {
            if let Some(more_recent) = self.map.remove(&key) {
                let more_recent_more_recent = more_recent.more_recent;
                let more_recent = more_recent.update(more_recent_more_recent, entry.less_recent);
                self.map.insert(key, more_recent);
            }
        }

        Some(entry)
    }

    /// Add a new object to the cache.
    ///
    /// If the addition of this object causes ``size`` to exceed ``limit``, entries will be evicted
    /// until ``size`` is at or below ``limit`` again before returning.
    ///
    fn insert(&mut self, key: K, object: &Arc<V>) {
        let entry = CacheEntry::new(key, object);
        self.size += entry.size;
        self.push_most_recent(entry);

        while self.size > self.limit {
            let evicted = match self.least_recent {
                Some(tail) => self.remove(&tail),
                None => None,
            };
            match evicted {
                Some(evicted) => self.size -= evicted.size,
                None => break,
            }
        }
    }
}

impl<K, V> CacheEntry<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    fn new(key: K, object: &Arc<V>) -> Self {
        Self {
            key,
            object: Arc::clone(object),
            more_recent: None,
            less_recent: None,
            size: object.size(),
        }
    }

    /// Create a copy of this cache entry with updated links to next entries in chain.
    ///
    fn update(self, more_recent: Option<K>, less_recent: Option<K>) -> Self {
        Self {
            more_recent,
            less_recent,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        panic::{self, AssertUnwindSafe},
        sync::Barrier,
        thread,
        time::Duration,
    };

    struct DummyValue {
        value: u32,
        size: u64,
    }

    impl DummyValue {
        fn new(value: u32, size: u64) -> Self {
            DummyValue { value, size }
        }
    }

    impl Cacheable for DummyValue {
        fn size(&self) -> u64 {
            self.size
        }
    }

    fn collect_linked_list(recent: &Entries<u32, DummyValue>) -> Vec<u32> {
        // From front to back
        let mut frontwise: Vec<u32> = vec![];
        let mut current = recent.most_recent;
        while let Some(key) = current {
            let node = recent.map.get(&key).expect("Missing key");
            frontwise.push(node.object.value);
            current = node.less_recent;
        }

        // From back to front
        let mut backwise: Vec<u32> = vec![];
        let mut current = recent.least_recent;
        while let Some(key) = current {
            let node = recent.map.get(&key).expect("Missing key");
            backwise.push(node.object.value);
            current = node.more_recent;
        }
        backwise.reverse();

        assert_eq!(frontwise, backwise);

        frontwise
    }

    #[test]
    fn test_common_use() -> Result<()> {
        let cache: Cache<u32, DummyValue> = Cache::new(100);
        let load = |key| Ok(DummyValue::new(key, 25));

        assert_eq!(cache.get(&1, load)?.value, 1);
        {
            let recent = cache.recent.lock();
            assert_eq!(recent.size, 25);
            assert_eq!(recent.map.len(), 1);
            assert_eq!(collect_linked_list(&recent), vec![1]);
        }

        let dont_load = |_| panic!("I shouldn't get called");
        assert_eq!(cache.get(&1, dont_load)?.value, 1);

        assert_eq!(cache.get(&2, load)?.value, 2);
        {
            let recent = cache.recent.lock();
            assert_eq!(recent.size, 50);
            assert_eq!(recent.map.len(), 2);
            assert_eq!(collect_linked_list(&recent), vec![2, 1]);
        }

        assert_eq!(cache.get(&3, load)?.value, 3);
        assert_eq!(cache.get(&4, load)?.value, 4);
        {
            let recent = cache.recent.lock();
            assert_eq!(recent.size, 100);
            assert_eq!(recent.map.len(), 4);
            assert_eq!(collect_linked_list(&recent), vec![4, 3, 2, 1]);
        }

        assert_eq!(cache.get(&3, dont_load)?.value, 3);
        assert_eq!(collect_linked_list(&cache.recent.lock()), vec![3, 4, 2, 1]);

        assert_eq!(cache.get(&3, dont_load)?.value, 3);
        assert_eq!(collect_linked_list(&cache.recent.lock()), vec![3, 4, 2, 1]);

        assert_eq!(cache.get(&1, dont_load)?.value, 1);
        assert_eq!(collect_linked_list(&cache.recent.lock()), vec![1, 3, 4, 2]);

        // Cache is now full, next load should push 4 and 2 out
        let load = |key| Ok(DummyValue::new(key, 50));
        assert_eq!(cache.get(&5, load)?.value, 5);
        {
            let recent = cache.recent.lock();
            assert_eq!(recent.size, 100);
            assert_eq!(recent.map.len(), 3);
            assert_eq!(collect_linked_list(&recent), vec![5, 1, 3]);
        }

        let load = |key| Ok(DummyValue::new(key * 2, 33));
        assert_eq!(cache.get(&1, load)?.value, 1);
        assert_eq!(cache.get(&3, load)?.value, 3);
        assert_eq!(cache.get(&5, load)?.value, 5);
        assert_eq!(cache.get(&7, load)?.value, 14);
        assert_eq!(cache.get(&1, load)?.value, 2);
        assert_eq!(cache.get(&3, load)?.value, 6);
        assert_eq!(cache.get(&5, load)?.value, 10);

        // This will obliterate the cache
        let load = |key| Ok(DummyValue::new(key, 101));
        assert_eq!(cache.get(&7, load)?.value, 7);
        {
            let recent = cache.recent.lock();
            assert_eq!(recent.size, 0);
            assert_eq!(recent.map.len(), 0);
            assert!(recent.most_recent.is_none());
            assert!(recent.least_recent.is_none());
        }

        Ok(())
    }

    #[test]
    fn test_failed_load_is_not_cached() -> Result<()> {
        let cache: Cache<u32, DummyValue> = Cache::new(100);
        let fail = |_| Err(Error::Config(String::from("nope")));
        assert!(matches!(cache.get(&1, fail), Err(Error::Config(_))));
        assert!(!cache.contains(&1));
        assert!(cache.loaders.lock().is_empty());

        assert_eq!(cache.get(&1, |key| Ok(DummyValue::new(key, 10)))?.value, 1);
        assert!(cache.contains(&1));

        Ok(())
    }

    #[test]
    fn test_panicking_load_releases_key() -> Result<()> {
        let cache: Cache<u32, DummyValue> = Cache::new(100);
        let started = Barrier::new(2);

        thread::scope(|scope| {
            let loading = scope.spawn(|| {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    cache.get(&1, |_| {
                        started.wait();
                        thread::sleep(Duration::from_millis(50));
                        panic!("lane function blew up");
                    })
                }))
            });

            // Wait for the load to be underway, then pile on
            started.wait();
            let waiting = cache.get(&1, |_| panic!("I shouldn't get called"));
            assert!(matches!(waiting, Err(Error::Load)));

            assert!(loading.join().expect("thread panicked").is_err());
        });

        assert!(cache.loaders.lock().is_empty());
        assert!(!cache.contains(&1));
        assert_eq!(cache.get(&1, |key| Ok(DummyValue::new(key, 10)))?.value, 1);

        Ok(())
    }

    #[test]
    fn test_concurrent_load() -> Result<()> {
        let loading = Arc::new(Mutex::new(false));
        let loaded = Arc::new(Mutex::new(false));
        let cache: Arc<Cache<u32, DummyValue>> = Arc::new(Cache::new(100));
        let mut threads = vec![];

        // 10 threads trying to load single key, only one should actually do the load
        for _ in 1..=10 {
            let loading = Arc::clone(&loading);
            let loaded = Arc::clone(&loaded);
            let cache = Arc::clone(&cache);
            threads.push(thread::spawn(move || {
                let long_load = |key| {
                    {
                        let mut loading = loading.lock();
                        assert!(!*loading);
                        *loading = true;
                    }

                    // Make all those other threads wait a bit
                    thread::sleep(Duration::from_millis(50));

                    {
                        let mut loaded = loaded.lock();
                        assert!(!*loaded);
                        *loaded = true;
                    }

                    Ok(DummyValue::new(key, 25))
                };

                assert_eq!(cache.get(&42, long_load).expect("oh no error!").value, 42);
            }));
        }

        // Another 10 threads loading a different key that shouldn't be blocked by the long load
        thread::sleep(Duration::from_millis(10));
        for _ in 11..=20 {
            let loading = Arc::clone(&loading);
            let loaded = Arc::clone(&loaded);
            let cache = Arc::clone(&cache);
            threads.push(thread::spawn(move || {
                let load = |key| {
                    assert!(*loading.lock());
                    Ok(DummyValue::new(key * 2, 25))
                };

                assert_eq!(cache.get(&21, load).expect("oh no error!").value, 42);
                assert!(!*loaded.lock());
            }));
        }

        for thread in threads {
            thread.join().expect("thread panicked");
        }
        assert!(*loaded.lock());

        Ok(())
    }
}

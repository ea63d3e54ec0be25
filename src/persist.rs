use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::storage::{StorageError, StorageService};
use crate::table::SchemaError;

/// A single pending deadline that is pushed back on every change.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true once when the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Uninitialized,
    Loading,
    Ready,
}

/// Owns one value of `T` and keeps a storage key eventually consistent with
/// it.
///
/// The live value is updated synchronously by [`Persisted::set_data`]. Writes
/// to storage are debounced: every change moves the write deadline to
/// `now + delay`, and [`Persisted::tick_at`] performs the write once the deadline
/// has passed, always with the latest value. Storage problems never escape
/// from the write path, they are kept in [`Persisted::error`]. Once
/// [`Persisted::dispose`] ran, storage is never written again.
pub struct Persisted<T> {
    key: String,
    storage: Box<dyn StorageService<T>>,
    data: T,
    state: LoadState,
    disposed: bool,
    error: Option<StorageError>,
    debouncer: Debouncer,
}

impl<T> Persisted<T> {
    pub fn new(
        key: impl Into<String>,
        storage: Box<dyn StorageService<T>>,
        initial: T,
        delay: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            storage,
            data: initial,
            state: LoadState::Uninitialized,
            disposed: false,
            error: None,
            debouncer: Debouncer::new(delay),
        }
    }

    /// Seeds the live value from storage, or storage from the initial value.
    ///
    /// Stored data that can not be read or fails validation is replaced by
    /// the initial value. Runs once, later calls do nothing.
    pub fn init(&mut self) {
        if self.state == LoadState::Ready || self.disposed {
            return;
        }
        self.state = LoadState::Loading;
        match self.storage.load(&self.key) {
            Ok(Some(stored)) => {
                info!("Adopted stored data for '{}'", self.key);
                self.data = stored;
            }
            Ok(None) => {
                info!("Nothing stored for '{}', saving initial data", self.key);
                self.write();
            }
            Err(e) => {
                warn!("Replacing stored data for '{}' with initial data: {e}", self.key);
                self.write();
            }
        }
        self.state = LoadState::Ready;
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn set_data(&mut self, value: T) -> Result<(), SchemaError> {
        self.set_data_at(value, Instant::now())
    }

    /// Replaces the live value if it validates and schedules a write.
    ///
    /// Before [`Persisted::init`] this only replaces the initial value. After
    /// [`Persisted::dispose`] the update is dropped.
    pub fn set_data_at(&mut self, value: T, now: Instant) -> Result<(), SchemaError> {
        if self.disposed {
            warn!("Dropped update for disposed '{}'", self.key);
            return Ok(());
        }
        if let Err(e) = self.storage.validate(&value) {
            warn!("Rejected update for '{}': {e}", self.key);
            self.error = Some(StorageError::Invalid(e.clone()));
            return Err(e);
        }
        self.data = value;
        if matches!(self.error, Some(StorageError::Invalid(_))) {
            self.error = None;
        }
        if self.state == LoadState::Ready {
            self.debouncer.schedule(now);
            trace!("Write for '{}' scheduled", self.key);
        }
        Ok(())
    }

    /// Performs the pending write if its deadline has passed. Returns whether
    /// a write was attempted.
    pub fn tick_at(&mut self, now: Instant) -> bool {
        if self.disposed {
            return false;
        }
        if self.debouncer.fire(now) {
            self.write();
            true
        } else {
            false
        }
    }

    /// Writes a pending change right away.
    pub fn flush(&mut self) -> bool {
        if self.disposed || !self.debouncer.is_pending() {
            return false;
        }
        self.debouncer.cancel();
        self.write();
        true
    }

    /// Drops a pending write without performing it. Later updates are
    /// ignored.
    pub fn dispose(&mut self) {
        if self.debouncer.is_pending() {
            debug!("Discarding pending write for '{}'", self.key);
        }
        self.debouncer.cancel();
        self.disposed = true;
    }

    fn write(&mut self) {
        match self.storage.set(&self.key, &self.data) {
            Ok(()) => {
                debug!("Wrote '{}'", self.key);
                self.error = None;
            }
            Err(e) => {
                error!("Writing '{}' failed: {e}", self.key);
                self.error = Some(e);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn is_initialized(&self) -> bool {
        self.state == LoadState::Ready
    }

    pub fn is_loading(&self) -> bool {
        !self.is_initialized()
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn error(&self) -> Option<&StorageError> {
        self.error.as_ref()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn storage(&self) -> &dyn StorageService<T> {
        self.storage.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::json;

    use super::*;
    use crate::storage::{InMemoryStorage, Validator};
    use crate::table::TableData;

    /// Records every successful write on top of an in memory store.
    pub(crate) struct RecordingStorage<T> {
        inner: InMemoryStorage<T>,
        pub writes: Rc<RefCell<Vec<T>>>,
        pub fail_writes: Rc<RefCell<bool>>,
    }

    impl<T> RecordingStorage<T> {
        pub fn new(inner: InMemoryStorage<T>) -> Self {
            Self {
                inner,
                writes: Rc::new(RefCell::new(Vec::new())),
                fail_writes: Rc::new(RefCell::new(false)),
            }
        }
    }

    impl<T> StorageService<T> for RecordingStorage<T>
    where
        T: Clone + serde::Serialize + serde::de::DeserializeOwned,
    {
        fn load(&self, key: &str) -> Result<Option<T>, StorageError> {
            self.inner.load(key)
        }

        fn set(&mut self, key: &str, value: &T) -> Result<(), StorageError> {
            if *self.fail_writes.borrow() {
                return Err(StorageError::Unavailable {
                    key: key.to_string(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.set(key, value)?;
            self.writes.borrow_mut().push(value.clone());
            Ok(())
        }

        fn remove(&mut self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }

        fn validate(&self, value: &T) -> Result<(), SchemaError> {
            self.inner.validate(value)
        }
    }

    pub(crate) fn table_validator() -> Validator<TableData> {
        Box::new(|d: &TableData| d.validate())
    }

    pub(crate) fn name_table(names: &[&str]) -> TableData {
        let records: Vec<_> = names
            .iter()
            .map(|n| json!([{"type": "text", "label": "Name", "required": true, "schemaOrder": 0, "value": n}]))
            .collect();
        TableData::parse(&json!({
            "schema": [{"type": "text", "label": "Name", "required": true, "schemaOrder": 0}],
            "records": records,
        }))
        .unwrap()
    }

    const KEY: &str = "tableData";

    fn hook(
        storage: InMemoryStorage<TableData>,
        initial: TableData,
    ) -> (Persisted<TableData>, Rc<RefCell<Vec<TableData>>>) {
        let recording = RecordingStorage::new(storage);
        let writes = Rc::clone(&recording.writes);
        let hook = Persisted::new(KEY, Box::new(recording), initial, Duration::from_millis(500));
        (hook, writes)
    }

    #[test]
    fn debouncer_fires_once_after_delay() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        assert!(!debouncer.fire(t0));
        debouncer.schedule(t0);
        assert!(!debouncer.fire(t0 + Duration::from_millis(499)));
        assert!(debouncer.fire(t0 + Duration::from_millis(500)));
        assert!(!debouncer.fire(t0 + Duration::from_millis(501)));
    }

    #[test]
    fn stores_initial_data_when_nothing_is_stored() {
        let (mut hook, writes) = hook(InMemoryStorage::new(table_validator()), name_table(&["Ada"]));
        assert!(hook.is_loading());
        assert!(!hook.is_initialized());
        assert_eq!(hook.state(), LoadState::Uninitialized);

        hook.init();
        assert!(hook.is_initialized());
        assert!(!hook.is_loading());
        assert!(hook.error().is_none());
        assert_eq!(hook.data(), &name_table(&["Ada"]));
        assert_eq!(*writes.borrow(), vec![name_table(&["Ada"])]);
        assert_eq!(hook.storage().get(KEY), Some(name_table(&["Ada"])));
    }

    #[test]
    fn adopts_valid_stored_data() {
        let mut storage = InMemoryStorage::new(table_validator());
        storage.set(KEY, &name_table(&["Stored"])).unwrap();
        let (mut hook, writes) = hook(storage, name_table(&["Initial"]));

        hook.init();
        assert_eq!(hook.data(), &name_table(&["Stored"]));
        assert!(writes.borrow().is_empty());
    }

    #[test]
    fn corrupt_stored_data_falls_back_to_initial() {
        let mut storage = InMemoryStorage::new(table_validator());
        let corrupt = json!({
            "schema": [{"type": "text", "label": "Name", "required": true, "schemaOrder": 0}],
            "records": [[{"type": "text", "label": "Name", "required": true, "schemaOrder": 0}]],
        });
        storage.insert_raw(KEY, &corrupt.to_string());
        let (mut hook, writes) = hook(storage, name_table(&[]));

        hook.init();
        assert!(hook.is_initialized());
        assert!(hook.error().is_none());
        assert_eq!(hook.data(), &name_table(&[]));
        assert_eq!(writes.borrow().len(), 1);
        assert_eq!(hook.storage().get(KEY), Some(name_table(&[])));
    }

    #[test]
    fn unparsable_stored_data_falls_back_to_initial() {
        let mut storage = InMemoryStorage::new(table_validator());
        storage.insert_raw(KEY, "invalid-json");
        let (mut hook, _writes) = hook(storage, name_table(&["Ada"]));
        hook.init();
        assert_eq!(hook.storage().get(KEY), Some(name_table(&["Ada"])));
    }

    #[test]
    fn init_runs_once() {
        let (mut hook, writes) = hook(InMemoryStorage::new(table_validator()), name_table(&[]));
        hook.init();
        hook.init();
        assert_eq!(writes.borrow().len(), 1);
    }

    #[test]
    fn set_data_updates_immediately_and_coalesces_writes() {
        let (mut hook, writes) = hook(InMemoryStorage::new(table_validator()), name_table(&[]));
        hook.init();
        let t0 = Instant::now();
        let ms = Duration::from_millis;

        hook.set_data_at(name_table(&["a"]), t0).unwrap();
        assert_eq!(hook.data(), &name_table(&["a"]));
        hook.set_data_at(name_table(&["a", "b"]), t0 + ms(100)).unwrap();
        hook.set_data_at(name_table(&["a", "b", "c"]), t0 + ms(200)).unwrap();
        assert_eq!(hook.data(), &name_table(&["a", "b", "c"]));
        assert_eq!(hook.next_deadline(), Some(t0 + ms(700)));

        assert!(!hook.tick_at(t0 + ms(500)));
        assert!(!hook.tick_at(t0 + ms(699)));
        assert_eq!(writes.borrow().len(), 1);

        assert!(hook.tick_at(t0 + ms(700)));
        assert_eq!(writes.borrow().len(), 2);
        assert_eq!(writes.borrow()[1], name_table(&["a", "b", "c"]));

        assert!(!hook.tick_at(t0 + ms(5000)));
        assert_eq!(writes.borrow().len(), 2);
    }

    #[test]
    fn invalid_update_is_rejected_and_recorded() {
        let (mut hook, writes) = hook(InMemoryStorage::new(table_validator()), name_table(&["Ada"]));
        hook.init();
        let t0 = Instant::now();

        let mut invalid = name_table(&["Ada"]);
        invalid.schema.clear();
        assert_eq!(hook.set_data_at(invalid, t0), Err(SchemaError::EmptySchema));
        assert_eq!(hook.data(), &name_table(&["Ada"]));
        assert!(matches!(hook.error(), Some(StorageError::Invalid(_))));
        assert!(!hook.is_pending());

        assert!(!hook.tick_at(t0 + Duration::from_secs(1)));
        assert_eq!(writes.borrow().len(), 1);
        assert_eq!(hook.storage().get(KEY), Some(name_table(&["Ada"])));

        hook.set_data_at(name_table(&["Bob"]), t0).unwrap();
        assert!(hook.error().is_none());
    }

    #[test]
    fn write_failures_are_captured() {
        let recording = RecordingStorage::new(InMemoryStorage::new(table_validator()));
        let fail = Rc::clone(&recording.fail_writes);
        let mut hook = Persisted::new(KEY, Box::new(recording), name_table(&[]), Duration::ZERO);
        hook.init();

        *fail.borrow_mut() = true;
        let t0 = Instant::now();
        hook.set_data_at(name_table(&["Ada"]), t0).unwrap();
        assert!(hook.tick_at(t0));
        assert!(matches!(hook.error(), Some(StorageError::Unavailable { .. })));
        assert_eq!(hook.data(), &name_table(&["Ada"]));

        *fail.borrow_mut() = false;
        hook.set_data_at(name_table(&["Ada", "Bob"]), t0).unwrap();
        assert!(matches!(hook.error(), Some(StorageError::Unavailable { .. })));
        assert!(hook.tick_at(t0));
        assert!(hook.error().is_none());
    }

    #[test]
    fn flush_writes_pending_change() {
        let (mut hook, writes) = hook(InMemoryStorage::new(table_validator()), name_table(&[]));
        hook.init();

        hook.set_data_at(name_table(&["b"]), Instant::now()).unwrap();
        assert!(hook.flush());
        assert!(!hook.flush());
        assert!(!hook.is_pending());
        assert_eq!(writes.borrow().last(), Some(&name_table(&["b"])));
    }

    #[test]
    fn disposed_hook_never_writes() {
        let (mut hook, writes) = hook(InMemoryStorage::new(table_validator()), name_table(&[]));
        hook.init();
        let t0 = Instant::now();

        hook.set_data_at(name_table(&["a"]), t0).unwrap();
        hook.dispose();
        assert!(!hook.tick_at(t0 + Duration::from_secs(10)));

        hook.set_data_at(name_table(&["b"]), t0).unwrap();
        assert!(!hook.is_pending());
        assert_eq!(hook.data(), &name_table(&["a"]));
        assert!(!hook.flush());
        assert!(!hook.tick_at(t0 + Duration::from_secs(10)));
        assert_eq!(writes.borrow().len(), 1);
        assert_eq!(hook.storage().get(KEY), Some(name_table(&[])));
    }

    #[test]
    fn set_data_before_init_replaces_initial_value() {
        let (mut hook, writes) = hook(InMemoryStorage::new(table_validator()), name_table(&[]));
        hook.set_data(name_table(&["Early"])).unwrap();
        assert!(!hook.is_pending());
        hook.init();
        assert_eq!(writes.borrow().as_slice(), &[name_table(&["Early"])]);
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Duration, Utc};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::{get_app, FirebaseApp, FirebaseOptions};
use crate::database::error::{internal_error, invalid_argument, DatabaseFuture, DatabaseResult};
use crate::database::native::{
    native_module, EventType, NativeDatabaseModule, NativeSetting, NativeTarget,
};
use crate::database::path::normalize_path;
use crate::database::reference::DatabaseReference;
use crate::database::LOGGER;
use crate::deprecation::replacements::{DATABASE_INSTANCE, DATABASE_MODULE};
use crate::deprecation::{silenced_by_env, DeprecationEmitter};
use crate::logger::LogLevel;

const MIN_CACHE_SIZE_BYTES: u64 = 1024 * 1024;
const MAX_CACHE_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Per-instance options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Suppresses the warnings logged by namespaced methods. `None` defers to
    /// [`SILENCE_ENV_VAR`](crate::deprecation::SILENCE_ENV_VAR).
    pub silence_deprecation_warnings: Option<bool>,
}

impl DatabaseSettings {
    pub fn from_env() -> Self {
        Self {
            silence_deprecation_warnings: Some(silenced_by_env()),
        }
    }
}

/// Handle to one Realtime Database instance, identified by app and URL.
///
/// Cloning is cheap; clones share the native module, the listener table and the
/// deprecation emitter.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    app: FirebaseApp,
    url: Url,
    target: NativeTarget,
    native: Arc<dyn NativeDatabaseModule>,
    emitter: DeprecationEmitter,
    started: AtomicBool,
    emulator: Mutex<Option<(String, u16)>>,
    listeners: Mutex<HashMap<String, TrackedListener>>,
    next_listener_id: AtomicU64,
}

#[derive(Clone, Debug)]
pub(crate) struct TrackedListener {
    pub(crate) path: Vec<String>,
    pub(crate) query_key: String,
    pub(crate) event: EventType,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("app", &self.inner.app.name())
            .field("url", &self.url())
            .finish()
    }
}

impl PartialEq for Database {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

type RegistryKey = (String, String);

static DATABASES: LazyLock<Mutex<HashMap<RegistryKey, Database>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn databases() -> MutexGuard<'static, HashMap<RegistryKey, Database>> {
    DATABASES
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Returns the database for `app` (the default app when `None`) at `url`, or
/// at the URL derived from the app options.
///
/// Instances are cached per (app, URL) and bound to the process-wide native
/// module at creation time.
pub fn get_database(app: Option<&FirebaseApp>, url: Option<&str>) -> DatabaseResult<Database> {
    let app = resolve_app(app)?;
    let url = resolve_database_url(app.options(), url)?;
    let key = registry_key(&app, &url);

    let mut registry = databases();
    if let Some(existing) = registry.get(&key) {
        return Ok(existing.clone());
    }
    let database = Database::new(app, url, native_module(), DatabaseSettings::default());
    registry.insert(key, database.clone());
    Ok(database)
}

/// Creates the database for `app` at `url` bound to an explicit native module
/// and settings.
///
/// Fails when an instance for the same app and URL already exists.
pub fn get_database_with(
    app: &FirebaseApp,
    url: Option<&str>,
    native: Arc<dyn NativeDatabaseModule>,
    settings: DatabaseSettings,
) -> DatabaseResult<Database> {
    app.check_destroyed()
        .map_err(|err| invalid_argument(err.to_string()))?;
    let url = resolve_database_url(app.options(), url)?;
    let key = registry_key(app, &url);

    let mut registry = databases();
    if registry.contains_key(&key) {
        return Err(invalid_argument(format!(
            "A database for app '{}' at {} has already been created",
            app.name(),
            url.as_str().trim_end_matches('/')
        )));
    }
    let database = Database::new(app.clone(), url, native, settings);
    registry.insert(key, database.clone());
    Ok(database)
}

pub(crate) fn forget_app_instances(app_name: &str) {
    databases().retain(|(app, _), _| app != app_name);
}

fn resolve_app(app: Option<&FirebaseApp>) -> DatabaseResult<FirebaseApp> {
    let app = match app {
        Some(app) => app.clone(),
        None => get_app(None).map_err(|err| internal_error(err.to_string()))?,
    };
    app.check_destroyed()
        .map_err(|err| invalid_argument(err.to_string()))?;
    Ok(app)
}

fn registry_key(app: &FirebaseApp, url: &Url) -> RegistryKey {
    (app.name().to_string(), url.as_str().to_string())
}

fn resolve_database_url(options: &FirebaseOptions, url: Option<&str>) -> DatabaseResult<Url> {
    let raw = match (url, &options.database_url, &options.project_id) {
        (Some(url), _, _) => url.to_string(),
        (None, Some(url), _) => url.clone(),
        (None, None, Some(project_id)) => {
            format!("https://{project_id}-default-rtdb.firebaseio.com")
        }
        (None, None, None) => {
            return Err(invalid_argument(
                "Can't determine the database URL. Include a project_id or database_url \
                 in the app options",
            ))
        }
    };
    let parsed = Url::parse(raw.trim())
        .map_err(|err| invalid_argument(format!("Invalid database URL '{raw}': {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid_argument(format!(
            "Invalid database URL '{raw}': expected an http(s) URL with a host"
        )));
    }
    if !matches!(parsed.path(), "" | "/") {
        return Err(invalid_argument(format!(
            "Database URL must point to the root of the database, got '{raw}'"
        )));
    }
    Ok(parsed)
}

impl Database {
    fn new(
        app: FirebaseApp,
        url: Url,
        native: Arc<dyn NativeDatabaseModule>,
        settings: DatabaseSettings,
    ) -> Self {
        let silenced = settings
            .silence_deprecation_warnings
            .unwrap_or_else(silenced_by_env);
        let target = NativeTarget {
            app_name: app.name().to_string(),
            database_url: url.as_str().trim_end_matches('/').to_string(),
        };
        LOGGER.debug(format!(
            "created database for app '{}' at {}",
            target.app_name, target.database_url
        ));
        Self {
            inner: Arc::new(DatabaseInner {
                app,
                url,
                target,
                native,
                emitter: DeprecationEmitter::new(DATABASE_MODULE).with_silenced(silenced),
                started: AtomicBool::new(false),
                emulator: Mutex::new(None),
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn app(&self) -> &FirebaseApp {
        &self.inner.app
    }

    /// Database URL without a trailing slash.
    pub fn url(&self) -> &str {
        &self.inner.target.database_url
    }

    pub fn deprecation_warnings_silenced(&self) -> bool {
        self.inner.emitter.is_silenced()
    }

    pub(crate) fn target(&self) -> &NativeTarget {
        &self.inner.target
    }

    pub(crate) fn native(&self) -> Arc<dyn NativeDatabaseModule> {
        self.inner.native.clone()
    }

    pub(crate) fn emitter(&self) -> &DeprecationEmitter {
        &self.inner.emitter
    }

    pub(crate) fn downgrade(&self) -> Weak<DatabaseInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<DatabaseInner>) -> Option<Database> {
        inner.upgrade().map(|inner| Database { inner })
    }

    fn mark_started(&self) {
        self.inner.started.store(true, Ordering::SeqCst);
    }

    fn deprecated(&self, method: &str) {
        self.inner.emitter.warn(DATABASE_INSTANCE, method);
    }

    pub(crate) fn next_registration_key(&self) -> String {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        format!("{}#{id}", self.inner.target.app_name)
    }

    pub(crate) fn track_listener(&self, key: String, listener: TrackedListener) {
        lock(&self.inner.listeners).insert(key, listener);
    }

    pub(crate) fn untrack_listener(&self, key: &str) -> bool {
        lock(&self.inner.listeners).remove(key).is_some()
    }

    /// Removes and returns the tracked keys matching `filter`.
    pub(crate) fn take_listeners(
        &self,
        filter: impl Fn(&TrackedListener) -> bool,
    ) -> Vec<String> {
        let mut listeners = lock(&self.inner.listeners);
        let keys: Vec<String> = listeners
            .iter()
            .filter(|(_, listener)| filter(listener))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            listeners.remove(key);
        }
        keys
    }

    pub fn active_listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    #[deprecated(note = "use the modular `reference()` function")]
    pub fn reference(&self, path: &str) -> DatabaseResult<DatabaseReference> {
        self.deprecated("reference");
        reference(self, path)
    }

    #[deprecated(note = "use the modular `reference_from_url()` function")]
    pub fn reference_from_url(&self, url: &str) -> DatabaseResult<DatabaseReference> {
        self.deprecated("reference_from_url");
        reference_from_url(self, url)
    }

    #[deprecated(note = "use the modular `go_online()` function")]
    pub fn go_online(&self) -> DatabaseFuture<()> {
        self.deprecated("go_online");
        go_online(self)
    }

    #[deprecated(note = "use the modular `go_offline()` function")]
    pub fn go_offline(&self) -> DatabaseFuture<()> {
        self.deprecated("go_offline");
        go_offline(self)
    }

    #[deprecated(note = "use the modular `connect_database_emulator()` function")]
    pub fn use_emulator(&self, host: &str, port: u16) -> DatabaseResult<()> {
        self.deprecated("use_emulator");
        connect_database_emulator(self, host, port)
    }

    #[deprecated(note = "use the modular `set_persistence_enabled()` function")]
    pub fn set_persistence_enabled(&self, enabled: bool) -> DatabaseResult<()> {
        self.deprecated("set_persistence_enabled");
        set_persistence_enabled(self, enabled)
    }

    #[deprecated(note = "use the modular `enable_logging()` function")]
    pub fn set_logging_enabled(&self, enabled: bool) -> DatabaseResult<()> {
        self.deprecated("set_logging_enabled");
        enable_logging(self, enabled)
    }

    #[deprecated(note = "use the modular `set_persistence_cache_size_bytes()` function")]
    pub fn set_persistence_cache_size_bytes(&self, bytes: u64) -> DatabaseResult<()> {
        self.deprecated("set_persistence_cache_size_bytes");
        set_persistence_cache_size_bytes(self, bytes)
    }

    #[deprecated(note = "use the modular `get_server_time()` function")]
    pub fn get_server_time(&self) -> DatabaseResult<DateTime<Utc>> {
        self.deprecated("get_server_time");
        get_server_time(self)
    }
}

/// Reference to `path` (`""` or `"/"` for the root).
pub fn reference(database: &Database, path: &str) -> DatabaseResult<DatabaseReference> {
    database.mark_started();
    let segments = normalize_path(path)?;
    Ok(DatabaseReference::new(database.clone(), segments))
}

/// Reference to the location named by an absolute URL on this database.
pub fn reference_from_url(database: &Database, url: &str) -> DatabaseResult<DatabaseReference> {
    let parsed = Url::parse(url)
        .map_err(|err| invalid_argument(format!("reference_from_url: invalid URL '{url}': {err}")))?;
    if parsed.origin() != database.inner.url.origin() {
        return Err(invalid_argument(format!(
            "reference_from_url: host name does not match the current database (found {}, expected {})",
            parsed.host_str().unwrap_or_default(),
            database.inner.url.host_str().unwrap_or_default()
        )));
    }
    let path = percent_decode_str(parsed.path())
        .decode_utf8()
        .map_err(|err| invalid_argument(format!("reference_from_url: invalid path encoding: {err}")))?;
    reference(database, &path)
}

pub fn go_online(database: &Database) -> DatabaseFuture<()> {
    database.mark_started();
    let native = database.native();
    let target = database.target().clone();
    Box::pin(async move { native.set_online(&target, true).await })
}

/// Disconnects from the backend. Writes queued through `on_disconnect` run at
/// this point.
pub fn go_offline(database: &Database) -> DatabaseFuture<()> {
    database.mark_started();
    let native = database.native();
    let target = database.target().clone();
    Box::pin(async move { native.set_online(&target, false).await })
}

/// Points the instance at a local emulator.
///
/// Must run before the first reference is created. Repeating the call with the
/// same host and port afterwards is a no-op.
pub fn connect_database_emulator(database: &Database, host: &str, port: u16) -> DatabaseResult<()> {
    let host = host.trim();
    if host.is_empty() {
        return Err(invalid_argument("connect_database_emulator requires a host"));
    }
    let mut emulator = lock(&database.inner.emulator);
    if database.inner.started.load(Ordering::SeqCst) {
        return match emulator.as_ref() {
            Some((current_host, current_port)) if current_host == host && *current_port == port => {
                Ok(())
            }
            _ => Err(invalid_argument(
                "connect_database_emulator must be called before any other operation on the database",
            )),
        };
    }
    database.native().configure(
        database.target(),
        NativeSetting::Emulator {
            host: host.to_string(),
            port,
        },
    )?;
    *emulator = Some((host.to_string(), port));
    Ok(())
}

pub fn set_persistence_enabled(database: &Database, enabled: bool) -> DatabaseResult<()> {
    database
        .native()
        .configure(database.target(), NativeSetting::PersistenceEnabled(enabled))
}

/// Turns native debug logging on or off and sets the `@firebase/database`
/// logger to `debug` or back to `warn` to match.
pub fn enable_logging(database: &Database, enabled: bool) -> DatabaseResult<()> {
    database
        .native()
        .configure(database.target(), NativeSetting::LoggingEnabled(enabled))?;
    let level = if enabled { LogLevel::Debug } else { LogLevel::Warn };
    LOGGER
        .set_log_level(level)
        .map_err(|err| internal_error(err.to_string()))
}

/// Accepts sizes from 1 MB to 100 MB.
pub fn set_persistence_cache_size_bytes(database: &Database, bytes: u64) -> DatabaseResult<()> {
    if !(MIN_CACHE_SIZE_BYTES..=MAX_CACHE_SIZE_BYTES).contains(&bytes) {
        return Err(invalid_argument(format!(
            "Persistence cache size must be between {MIN_CACHE_SIZE_BYTES} and \
             {MAX_CACHE_SIZE_BYTES} bytes, got {bytes}"
        )));
    }
    database.native().configure(
        database.target(),
        NativeSetting::PersistenceCacheSizeBytes(bytes),
    )
}

/// Local clock corrected by the offset the native module reports.
pub fn get_server_time(database: &Database) -> DatabaseResult<DateTime<Utc>> {
    database.mark_started();
    let offset = database.native().server_time_offset(database.target())?;
    Ok(Utc::now() + Duration::milliseconds(offset))
}

//! Named loggers with swappable handlers.
//!
//! Every component owns a static [`Logger`] (`@firebase/app`, `@firebase/database`,
//! `@firebase/database-compat`). Output goes through the logger's handler, which
//! defaults to a timestamped line on stdout/stderr. Tests substitute the handler
//! for the current thread with [`Logger::intercept`] or [`Logger::capture`]; the
//! returned guard puts the previous state back when it is dropped, including
//! while a failed assertion is unwinding.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, RwLock, Weak};

static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INSTANCES: LazyLock<Mutex<Vec<Weak<LoggerInner>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));
static NEXT_INTERCEPT_ID: AtomicU64 = AtomicU64::new(1);

pub type SharedLogHandler =
    Arc<dyn Fn(&Logger, LogLevel, &[LogArgument]) + Send + Sync + 'static>;

thread_local! {
    static INTERCEPTORS: RefCell<Vec<Interceptor>> = const { RefCell::new(Vec::new()) };
}

struct Interceptor {
    id: u64,
    logger: usize,
    handler: SharedLogHandler,
}

#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    pub fn new(name: impl Into<String>) -> Self {
        let inner = Arc::new(LoggerInner::new(name.into()));
        track_instance(&inner);
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.inner.log_level.load(Ordering::SeqCst))
    }

    pub fn set_log_level<L>(&self, level: L) -> Result<(), LogError>
    where
        L: IntoLogLevel,
    {
        let level = level.into_log_level()?;
        self.inner.log_level.store(level as u8, Ordering::SeqCst);
        Ok(())
    }

    pub fn log_handler(&self) -> SharedLogHandler {
        self.inner
            .log_handler
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Replaces the process-wide handler of this logger.
    pub fn set_log_handler<F>(&self, handler: F)
    where
        F: Fn(&Logger, LogLevel, &[LogArgument]) + Send + Sync + 'static,
    {
        *self
            .inner
            .log_handler
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = Arc::new(handler);
    }

    pub fn reset_log_handler(&self) {
        *self
            .inner
            .log_handler
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = default_log_handler_arc();
    }

    /// Substitutes `handler` for every record this logger emits on the calling
    /// thread until the returned guard is dropped.
    ///
    /// Records emitted on other threads keep flowing to the regular handler, so
    /// parallel tests sharing a static logger never observe each other. Guards
    /// nest: the most recent interceptor wins and dropping it re-exposes the
    /// previous one.
    pub fn intercept<F>(&self, handler: F) -> InterceptGuard
    where
        F: Fn(&Logger, LogLevel, &[LogArgument]) + Send + Sync + 'static,
    {
        let id = NEXT_INTERCEPT_ID.fetch_add(1, Ordering::Relaxed);
        INTERCEPTORS.with(|stack| {
            stack.borrow_mut().push(Interceptor {
                id,
                logger: self.key(),
                handler: Arc::new(handler),
            });
        });
        InterceptGuard {
            id,
            _thread_bound: PhantomData,
        }
    }

    /// Intercepts this logger on the calling thread and records every record
    /// without producing output.
    pub fn capture(&self) -> LogCapture {
        let records: Arc<Mutex<Vec<LogRecord>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);
        let guard = self.intercept(move |logger, level, args| {
            lock(&sink).push(LogRecord {
                logger: logger.name().to_owned(),
                level,
                message: build_message(args),
            });
        });
        LogCapture {
            records,
            _guard: guard,
        }
    }

    pub fn debug(&self, arg: impl IntoLogArgument) {
        self.emit_one(LogLevel::Debug, arg);
    }

    pub fn log(&self, arg: impl IntoLogArgument) {
        self.emit_one(LogLevel::Verbose, arg);
    }

    pub fn info(&self, arg: impl IntoLogArgument) {
        self.emit_one(LogLevel::Info, arg);
    }

    pub fn warn(&self, arg: impl IntoLogArgument) {
        self.emit_one(LogLevel::Warn, arg);
    }

    pub fn warn_with<I, T>(&self, args: I)
    where
        I: IntoIterator<Item = T>,
        T: IntoLogArgument,
    {
        self.emit_many(LogLevel::Warn, args);
    }

    pub fn error(&self, arg: impl IntoLogArgument) {
        self.emit_one(LogLevel::Error, arg);
    }

    fn emit_one(&self, level: LogLevel, arg: impl IntoLogArgument) {
        self.dispatch(level, vec![arg.into_log_argument()]);
    }

    fn emit_many<I, T>(&self, level: LogLevel, args: I)
    where
        I: IntoIterator<Item = T>,
        T: IntoLogArgument,
    {
        let arguments = args
            .into_iter()
            .map(|arg| arg.into_log_argument())
            .collect();
        self.dispatch(level, arguments);
    }

    fn dispatch(&self, level: LogLevel, arguments: Vec<LogArgument>) {
        // The interceptor is cloned out first so a handler that logs again does
        // not hit an outstanding RefCell borrow.
        match self.thread_interceptor() {
            Some(handler) => handler(self, level, &arguments),
            None => (self.log_handler())(self, level, &arguments),
        }
    }

    fn thread_interceptor(&self) -> Option<SharedLogHandler> {
        let key = self.key();
        INTERCEPTORS.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|interceptor| interceptor.logger == key)
                .map(|interceptor| Arc::clone(&interceptor.handler))
        })
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    fn from_inner(inner: Arc<LoggerInner>) -> Self {
        Self { inner }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name())
            .field("level", &self.log_level())
            .finish()
    }
}

struct LoggerInner {
    name: String,
    log_level: AtomicU8,
    log_handler: RwLock<SharedLogHandler>,
}

impl LoggerInner {
    fn new(name: String) -> Self {
        let level = GLOBAL_LOG_LEVEL.load(Ordering::SeqCst);
        Self {
            name,
            log_level: AtomicU8::new(level),
            log_handler: RwLock::new(default_log_handler_arc()),
        }
    }
}

/// Removes its interceptor from the owning thread when dropped.
///
/// The guard is `!Send`: it must be released on the thread that installed it.
#[must_use = "the interceptor is removed as soon as the guard is dropped"]
pub struct InterceptGuard {
    id: u64,
    _thread_bound: PhantomData<Rc<()>>,
}

impl Drop for InterceptGuard {
    fn drop(&mut self) {
        let id = self.id;
        // `try_with` because the guard may outlive the thread-local during
        // thread teardown.
        let _ = INTERCEPTORS.try_with(|stack| {
            if let Ok(mut stack) = stack.try_borrow_mut() {
                stack.retain(|interceptor| interceptor.id != id);
            }
        });
    }
}

impl fmt::Debug for InterceptGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptGuard").field("id", &self.id).finish()
    }
}

/// A single record seen by a [`LogCapture`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub logger: String,
    pub level: LogLevel,
    pub message: String,
}

/// Records emitted on the current thread while the capture is alive.
#[must_use = "records are only collected while the capture is alive"]
pub struct LogCapture {
    records: Arc<Mutex<Vec<LogRecord>>>,
    _guard: InterceptGuard,
}

impl LogCapture {
    pub fn records(&self) -> Vec<LogRecord> {
        lock(&self.records).clone()
    }

    /// Messages recorded at exactly `level`, in emission order.
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        lock(&self.records)
            .iter()
            .filter(|record| record.level == level)
            .map(|record| record.message.clone())
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages(LogLevel::Warn)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.records).clear();
    }
}

impl fmt::Debug for LogCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogCapture")
            .field("records", &lock(&self.records).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn track_instance(inner: &Arc<LoggerInner>) {
    lock(&INSTANCES).push(Arc::downgrade(inner));
}

fn default_log_handler_arc() -> SharedLogHandler {
    Arc::new(default_log_handler)
}

fn default_log_handler(logger: &Logger, level: LogLevel, args: &[LogArgument]) {
    if level < logger.log_level() || level == LogLevel::Silent {
        return;
    }

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let message = build_message(args);
    let line = if message.is_empty() {
        format!("[{}]  {}:", now, logger.name())
    } else {
        format!("[{}]  {}: {}", now, logger.name(), message)
    };

    match level {
        LogLevel::Warn | LogLevel::Error => eprintln!("{line}"),
        _ => println!("{line}"),
    }
}

fn build_message(args: &[LogArgument]) -> String {
    args.iter()
        .filter_map(LogArgument::to_message_fragment)
        .collect::<Vec<_>>()
        .join(" ")
}

fn with_instances<F>(mut f: F)
where
    F: FnMut(Logger),
{
    let mut instances = lock(&INSTANCES);
    let mut i = 0;
    while i < instances.len() {
        match instances[i].upgrade() {
            Some(inner) => {
                f(Logger::from_inner(inner));
                i += 1;
            }
            None => {
                instances.swap_remove(i);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Verbose = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Silent = 5,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "silent",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Verbose,
            2 => LogLevel::Info,
            3 => LogLevel::Warn,
            4 => LogLevel::Error,
            _ => LogLevel::Silent,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "verbose" => Ok(LogLevel::Verbose),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" => Ok(LogLevel::Silent),
            other => Err(LogError::InvalidLogLevel(other.to_string())),
        }
    }
}

pub trait IntoLogLevel {
    fn into_log_level(self) -> Result<LogLevel, LogError>;
}

impl IntoLogLevel for LogLevel {
    fn into_log_level(self) -> Result<LogLevel, LogError> {
        Ok(self)
    }
}

impl IntoLogLevel for &str {
    fn into_log_level(self) -> Result<LogLevel, LogError> {
        LogLevel::from_str(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogArgument {
    Text(String),
    Value(Value),
    Null,
}

impl LogArgument {
    pub fn to_message_fragment(&self) -> Option<String> {
        match self {
            LogArgument::Text(text) => Some(text.clone()),
            LogArgument::Value(Value::Null) | LogArgument::Null => None,
            LogArgument::Value(Value::String(text)) => Some(text.clone()),
            LogArgument::Value(other) => Some(other.to_string()),
        }
    }
}

pub trait IntoLogArgument {
    fn into_log_argument(self) -> LogArgument;
}

impl IntoLogArgument for LogArgument {
    fn into_log_argument(self) -> LogArgument {
        self
    }
}

impl IntoLogArgument for String {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Text(self)
    }
}

impl IntoLogArgument for &String {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Text(self.clone())
    }
}

impl IntoLogArgument for &str {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Text(self.to_owned())
    }
}

impl<'a> IntoLogArgument for Cow<'a, str> {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Text(self.into_owned())
    }
}

impl IntoLogArgument for Value {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Value(self)
    }
}

impl IntoLogArgument for &Value {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Value(self.clone())
    }
}

impl IntoLogArgument for u64 {
    fn into_log_argument(self) -> LogArgument {
        LogArgument::Value(Value::from(self))
    }
}

impl<T> IntoLogArgument for Option<T>
where
    T: IntoLogArgument,
{
    fn into_log_argument(self) -> LogArgument {
        match self {
            Some(value) => value.into_log_argument(),
            None => LogArgument::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LogError {
    InvalidLogLevel(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::InvalidLogLevel(level) => {
                write!(f, "Invalid value \"{level}\" assigned to `logLevel`")
            }
        }
    }
}

impl std::error::Error for LogError {}

/// Sets the level of every live logger and of loggers created afterwards.
pub fn set_log_level<L>(level: L) -> Result<(), LogError>
where
    L: IntoLogLevel,
{
    let level = level.into_log_level()?;
    GLOBAL_LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    with_instances(|logger| {
        let _ = logger.set_log_level(level);
    });
    Ok(())
}

//! Boundary between the compatibility layer and the native database client.
//!
//! Every operation of both call surfaces ends up as exactly one call on a
//! [`NativeDatabaseModule`]. The production client lives outside this crate;
//! [`InMemoryNativeModule`] stands in for it and [`RecordingNativeModule`]
//! records what was forwarded.

mod evaluate;
mod memory;
mod recording;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::database::error::{invalid_argument, DatabaseError, DatabaseResult};
use crate::database::modifiers::QueryModifiers;

pub use memory::InMemoryNativeModule;
pub use recording::{NativeCall, RecordingNativeModule};

pub(crate) use evaluate::query_view;

/// Database instance a native call is addressed to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NativeTarget {
    pub app_name: String,
    pub database_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NativeSetting {
    PersistenceEnabled(bool),
    LoggingEnabled(bool),
    PersistenceCacheSizeBytes(u64),
    Emulator { host: String, port: u16 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum NativeWrite {
    Set(Value),
    SetWithPriority { value: Value, priority: Value },
    /// Multi-location update; keys are paths relative to the write location.
    Update(Map<String, Value>),
    Remove,
    SetPriority(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub enum OnDisconnectOp {
    Write(NativeWrite),
    Cancel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    Value,
    ChildAdded,
    ChildChanged,
    ChildRemoved,
    ChildMoved,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::Value,
        EventType::ChildAdded,
        EventType::ChildChanged,
        EventType::ChildRemoved,
        EventType::ChildMoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Value => "value",
            EventType::ChildAdded => "child_added",
            EventType::ChildChanged => "child_changed",
            EventType::ChildRemoved => "child_removed",
            EventType::ChildMoved => "child_moved",
        }
    }

    pub fn is_child_event(&self) -> bool {
        !matches!(self, EventType::Value)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event| event.as_str() == value)
            .ok_or_else(|| {
                invalid_argument(format!(
                    "Unknown event type '{value}', expected one of value, child_added, \
                     child_changed, child_removed, child_moved"
                ))
            })
    }
}

/// One listener registration as seen by the native module.
#[derive(Clone, Debug, PartialEq)]
pub struct ListenSpec {
    /// Unique per registration; used to unlisten.
    pub registration_key: String,
    pub path: Vec<String>,
    pub modifiers: QueryModifiers,
    pub event: EventType,
    /// Remove the registration after its first delivered event.
    pub only_once: bool,
}

impl ListenSpec {
    pub fn query_key(&self) -> String {
        self.modifiers.canonical_key()
    }
}

/// Data at a location as the native module reports it. `value` keeps
/// `.priority` packing; `child_keys` lists the children in query order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NativeSnapshot {
    pub value: Value,
    pub child_keys: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NativeEvent {
    pub event: EventType,
    /// Location of `snapshot`: the query path for value events, the child's
    /// path for child events.
    pub path: Vec<String>,
    pub snapshot: NativeSnapshot,
    pub previous_child: Option<String>,
}

/// Receives events for one registration. An `Err` cancels the registration.
pub type NativeEventSink = Arc<dyn Fn(DatabaseResult<NativeEvent>) + Send + Sync>;

/// Transaction update: receives the current plain value, returns the new one or
/// `None` to abort.
pub type TransactionUpdate = Arc<dyn Fn(Value) -> Option<Value> + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub struct NativeTransactionOutcome {
    pub committed: bool,
    pub snapshot: NativeSnapshot,
}

#[async_trait(?Send)]
pub trait NativeDatabaseModule: Send + Sync {
    async fn set_online(&self, target: &NativeTarget, online: bool) -> DatabaseResult<()>;

    fn configure(&self, target: &NativeTarget, setting: NativeSetting) -> DatabaseResult<()>;

    /// Estimated difference between the server clock and the local clock, in
    /// milliseconds.
    fn server_time_offset(&self, target: &NativeTarget) -> DatabaseResult<i64>;

    async fn write(
        &self,
        target: &NativeTarget,
        path: &[String],
        write: NativeWrite,
    ) -> DatabaseResult<()>;

    async fn once(
        &self,
        target: &NativeTarget,
        path: &[String],
        modifiers: &QueryModifiers,
    ) -> DatabaseResult<NativeSnapshot>;

    /// Registers `spec`. Events for the current state may be delivered before
    /// this returns.
    fn listen(
        &self,
        target: &NativeTarget,
        spec: ListenSpec,
        sink: NativeEventSink,
    ) -> DatabaseResult<()>;

    fn unlisten(&self, target: &NativeTarget, registration_key: &str) -> DatabaseResult<()>;

    async fn keep_synced(
        &self,
        target: &NativeTarget,
        path: &[String],
        modifiers: &QueryModifiers,
        enabled: bool,
    ) -> DatabaseResult<()>;

    async fn transaction(
        &self,
        target: &NativeTarget,
        path: &[String],
        update: TransactionUpdate,
        apply_locally: bool,
    ) -> DatabaseResult<NativeTransactionOutcome>;

    async fn on_disconnect(
        &self,
        target: &NativeTarget,
        path: &[String],
        op: OnDisconnectOp,
    ) -> DatabaseResult<()>;
}

static DEFAULT_MODULE: LazyLock<Arc<InMemoryNativeModule>> =
    LazyLock::new(|| Arc::new(InMemoryNativeModule::new()));

static INSTALLED: LazyLock<RwLock<Option<Arc<dyn NativeDatabaseModule>>>> =
    LazyLock::new(|| RwLock::new(None));

/// Replaces the module used by databases created afterwards through
/// `get_database`. Existing instances keep the module they were built with.
pub fn install_native_module(module: Arc<dyn NativeDatabaseModule>) {
    let mut installed = INSTALLED
        .write()
        .unwrap_or_else(|poison| poison.into_inner());
    *installed = Some(module);
}

/// Restores the shared in-memory module.
pub fn reset_native_module() {
    let mut installed = INSTALLED
        .write()
        .unwrap_or_else(|poison| poison.into_inner());
    *installed = None;
}

pub fn native_module() -> Arc<dyn NativeDatabaseModule> {
    let installed = INSTALLED
        .read()
        .unwrap_or_else(|poison| poison.into_inner());
    match installed.as_ref() {
        Some(module) => module.clone(),
        None => DEFAULT_MODULE.clone(),
    }
}

/// The in-memory module `native_module` falls back to.
pub fn default_memory_module() -> Arc<InMemoryNativeModule> {
    DEFAULT_MODULE.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_round_trip_through_names() {
        for event in EventType::ALL {
            assert_eq!(event.as_str().parse::<EventType>().unwrap(), event);
        }
        assert!("child_exploded".parse::<EventType>().is_err());
    }

    #[test]
    fn only_value_is_not_a_child_event() {
        assert!(!EventType::Value.is_child_event());
        assert!(EventType::ChildMoved.is_child_event());
    }
}

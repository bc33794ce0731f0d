use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::database::error::{native_error, DatabaseError, DatabaseResult};
use crate::database::modifiers::QueryModifiers;
use crate::database::native::evaluate::{diff_events, view_at, QueryView};
use crate::database::native::{
    ListenSpec, NativeDatabaseModule, NativeEvent, NativeEventSink, NativeSetting, NativeSnapshot,
    NativeTarget, NativeTransactionOutcome, NativeWrite, OnDisconnectOp, TransactionUpdate,
};
use crate::database::path::{is_prefix, join_path, paths_related};
use crate::database::server_value::{contains_server_value, resolve_server_values};
use crate::database::tree::{
    data_of, get_at, normalize_priorities, pack_with_priority, set_at, strip_priorities,
    validate_value, value_at,
};
use crate::database::LOGGER;

const MAX_TRANSACTION_RETRIES: usize = 25;

/// Deterministic native module keeping one JSON tree per target.
///
/// Writes apply immediately and raise listener events synchronously on the
/// writing thread, after the internal lock is released. Queued on-disconnect
/// writes run when the target goes offline.
#[derive(Default)]
pub struct InMemoryNativeModule {
    targets: Mutex<HashMap<NativeTarget, TargetState>>,
}

struct TargetState {
    root: Value,
    online: bool,
    settings: Vec<NativeSetting>,
    server_time_offset: i64,
    listeners: Vec<Listener>,
    on_disconnect: Vec<(Vec<String>, NativeWrite)>,
    synced: BTreeSet<(String, String)>,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            root: Value::Null,
            online: true,
            settings: Vec::new(),
            server_time_offset: 0,
            listeners: Vec::new(),
            on_disconnect: Vec::new(),
            synced: BTreeSet::new(),
        }
    }
}

struct Listener {
    spec: ListenSpec,
    sink: NativeEventSink,
    view: QueryView,
}

type Delivery = (NativeEventSink, Vec<DatabaseResult<NativeEvent>>);

impl InMemoryNativeModule {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NativeTarget, TargetState>> {
        self.targets
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn with_state<R>(&self, target: &NativeTarget, f: impl FnOnce(&mut TargetState) -> R) -> R {
        let mut targets = self.lock();
        f(targets.entry(target.clone()).or_default())
    }

    /// Stored value at `path`, with `.priority` packing.
    pub fn value(&self, target: &NativeTarget, path: &[String]) -> Value {
        self.with_state(target, |state| value_at(&state.root, path))
    }

    pub fn is_online(&self, target: &NativeTarget) -> bool {
        self.with_state(target, |state| state.online)
    }

    /// Settings in the order they were configured.
    pub fn settings(&self, target: &NativeTarget) -> Vec<NativeSetting> {
        self.with_state(target, |state| state.settings.clone())
    }

    pub fn listener_count(&self, target: &NativeTarget) -> usize {
        self.with_state(target, |state| state.listeners.len())
    }

    pub fn pending_on_disconnect(&self, target: &NativeTarget) -> usize {
        self.with_state(target, |state| state.on_disconnect.len())
    }

    pub fn is_kept_synced(
        &self,
        target: &NativeTarget,
        path: &[String],
        modifiers: &QueryModifiers,
    ) -> bool {
        let entry = (join_path(path), modifiers.canonical_key());
        self.with_state(target, |state| state.synced.contains(&entry))
    }

    pub fn set_server_time_offset(&self, target: &NativeTarget, offset_millis: i64) {
        self.with_state(target, |state| state.server_time_offset = offset_millis);
    }

    /// Cancels every listener at or below `path` with `error`, the way the
    /// server revokes a listen after a rules change.
    pub fn cancel_listeners(&self, target: &NativeTarget, path: &[String], error: DatabaseError) {
        let cancelled: Vec<NativeEventSink> = self.with_state(target, |state| {
            let (cancelled, kept): (Vec<Listener>, Vec<Listener>) = state
                .listeners
                .drain(..)
                .partition(|listener| is_prefix(path, &listener.spec.path));
            state.listeners = kept;
            cancelled.into_iter().map(|listener| listener.sink).collect()
        });
        for sink in cancelled {
            sink(Err(error.clone()));
        }
    }

    fn apply_and_collect(
        &self,
        target: &NativeTarget,
        path: &[String],
        write: NativeWrite,
    ) -> DatabaseResult<()> {
        let deliveries = self.with_state(target, |state| {
            state.apply(path, write)?;
            Ok::<_, DatabaseError>(state.refresh_listeners(path))
        })?;
        deliver(deliveries);
        Ok(())
    }
}

impl TargetState {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis() + self.server_time_offset
    }

    /// Applies `write` to the tree. Every location is resolved before any of
    /// them is written, so a failing write leaves the tree untouched.
    fn apply(&mut self, path: &[String], write: NativeWrite) -> DatabaseResult<()> {
        for (location, value) in self.stage(path, write)? {
            set_at(&mut self.root, &location, value);
        }
        Ok(())
    }

    fn stage(&self, path: &[String], write: NativeWrite) -> DatabaseResult<Vec<(Vec<String>, Value)>> {
        let now = self.now_millis();
        let resolve_at = |location: &[String], value: Value| {
            resolve(value, get_at(&self.root, location), now)
        };
        let staged = match write {
            NativeWrite::Set(value) => vec![(path.to_vec(), resolve_at(path, value)?)],
            NativeWrite::SetWithPriority { value, priority } => {
                let resolved = resolve_at(path, value)?;
                let data = data_of(&resolved).clone();
                vec![(path.to_vec(), pack_with_priority(data, priority))]
            }
            NativeWrite::Update(values) => values
                .into_iter()
                .map(|(relative, value)| {
                    let mut location = path.to_vec();
                    location.extend(
                        relative
                            .split('/')
                            .filter(|segment| !segment.is_empty())
                            .map(str::to_string),
                    );
                    let resolved = resolve_at(&location, value)?;
                    Ok((location, resolved))
                })
                .collect::<DatabaseResult<Vec<_>>>()?,
            NativeWrite::Remove => vec![(path.to_vec(), Value::Null)],
            NativeWrite::SetPriority(priority) => match get_at(&self.root, path) {
                Some(current) => vec![(
                    path.to_vec(),
                    pack_with_priority(data_of(current).clone(), priority),
                )],
                None => Vec::new(),
            },
        };
        Ok(staged)
    }

    fn refresh_listeners(&mut self, changed: &[String]) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        let root = &self.root;
        self.listeners.retain_mut(|listener| {
            if !paths_related(&listener.spec.path, changed) {
                return true;
            }
            let view = view_at(root, &listener.spec.path, &listener.spec.modifiers);
            let mut events = diff_events(
                listener.spec.event,
                &listener.spec.path,
                Some(&listener.view),
                &view,
            );
            listener.view = view;
            if events.is_empty() {
                return true;
            }
            let keep = !listener.spec.only_once;
            if !keep {
                events.truncate(1);
            }
            deliveries.push((
                listener.sink.clone(),
                events.into_iter().map(Ok).collect(),
            ));
            keep
        });
        deliveries
    }

    /// Runs the on-disconnect queue. A failing entry is skipped and the rest
    /// still apply; the first failure is returned alongside the deliveries.
    fn go_offline(&mut self) -> (Vec<Delivery>, Option<DatabaseError>) {
        self.online = false;
        let mut deliveries = Vec::new();
        let mut failure = None;
        for (path, write) in std::mem::take(&mut self.on_disconnect) {
            match self.apply(&path, write) {
                Ok(()) => deliveries.extend(self.refresh_listeners(&path)),
                Err(err) => {
                    LOGGER.warn(format!(
                        "Skipped on-disconnect write at {}: {err}",
                        join_path(&path)
                    ));
                    failure.get_or_insert(err);
                }
            }
        }
        (deliveries, failure)
    }
}

fn resolve(value: Value, current: Option<&Value>, now: i64) -> DatabaseResult<Value> {
    let value = if contains_server_value(&value) {
        resolve_server_values(value, current, now)?
    } else {
        value
    };
    Ok(normalize_priorities(value))
}

fn deliver(deliveries: Vec<Delivery>) {
    for (sink, events) in deliveries {
        for event in events {
            sink(event);
        }
    }
}

#[async_trait(?Send)]
impl NativeDatabaseModule for InMemoryNativeModule {
    async fn set_online(&self, target: &NativeTarget, online: bool) -> DatabaseResult<()> {
        let (deliveries, failure) = self.with_state(target, |state| match (state.online, online) {
            (true, false) => state.go_offline(),
            _ => {
                state.online = online;
                (Vec::new(), None)
            }
        });
        LOGGER.debug(format!(
            "{} is now {}",
            target.database_url,
            if online { "online" } else { "offline" }
        ));
        deliver(deliveries);
        failure.map_or(Ok(()), Err)
    }

    fn configure(&self, target: &NativeTarget, setting: NativeSetting) -> DatabaseResult<()> {
        self.with_state(target, |state| state.settings.push(setting));
        Ok(())
    }

    fn server_time_offset(&self, target: &NativeTarget) -> DatabaseResult<i64> {
        Ok(self.with_state(target, |state| state.server_time_offset))
    }

    async fn write(
        &self,
        target: &NativeTarget,
        path: &[String],
        write: NativeWrite,
    ) -> DatabaseResult<()> {
        self.apply_and_collect(target, path, write)
    }

    async fn once(
        &self,
        target: &NativeTarget,
        path: &[String],
        modifiers: &QueryModifiers,
    ) -> DatabaseResult<NativeSnapshot> {
        Ok(self.with_state(target, |state| view_at(&state.root, path, modifiers).snapshot()))
    }

    fn listen(
        &self,
        target: &NativeTarget,
        spec: ListenSpec,
        sink: NativeEventSink,
    ) -> DatabaseResult<()> {
        let initial = self.with_state(target, |state| {
            let view = view_at(&state.root, &spec.path, &spec.modifiers);
            let mut events = diff_events(spec.event, &spec.path, None, &view);
            if spec.only_once && !events.is_empty() {
                events.truncate(1);
            } else {
                state.listeners.push(Listener {
                    spec,
                    sink: sink.clone(),
                    view,
                });
            }
            events
        });
        for event in initial {
            sink(Ok(event));
        }
        Ok(())
    }

    fn unlisten(&self, target: &NativeTarget, registration_key: &str) -> DatabaseResult<()> {
        self.with_state(target, |state| {
            state
                .listeners
                .retain(|listener| listener.spec.registration_key != registration_key)
        });
        Ok(())
    }

    async fn keep_synced(
        &self,
        target: &NativeTarget,
        path: &[String],
        modifiers: &QueryModifiers,
        enabled: bool,
    ) -> DatabaseResult<()> {
        let entry = (join_path(path), modifiers.canonical_key());
        self.with_state(target, |state| {
            if enabled {
                state.synced.insert(entry);
            } else {
                state.synced.remove(&entry);
            }
        });
        Ok(())
    }

    async fn transaction(
        &self,
        target: &NativeTarget,
        path: &[String],
        update: TransactionUpdate,
        _apply_locally: bool,
    ) -> DatabaseResult<NativeTransactionOutcome> {
        let unfiltered = QueryModifiers::default();
        for _ in 0..MAX_TRANSACTION_RETRIES {
            let current = self.value(target, path);
            let Some(next) = update(strip_priorities(&current)) else {
                return Ok(NativeTransactionOutcome {
                    committed: false,
                    snapshot: self.once(target, path, &unfiltered).await?,
                });
            };
            validate_value(&next)?;

            let committed = self.with_state(target, |state| {
                if value_at(&state.root, path) != current {
                    return Ok(None);
                }
                state.apply(path, NativeWrite::Set(next))?;
                let snapshot = view_at(&state.root, path, &unfiltered).snapshot();
                Ok::<_, DatabaseError>(Some((snapshot, state.refresh_listeners(path))))
            })?;
            if let Some((snapshot, deliveries)) = committed {
                deliver(deliveries);
                return Ok(NativeTransactionOutcome {
                    committed: true,
                    snapshot,
                });
            }
        }
        Err(native_error(format!(
            "Transaction at /{} exceeded {MAX_TRANSACTION_RETRIES} retries",
            path.join("/")
        )))
    }

    async fn on_disconnect(
        &self,
        target: &NativeTarget,
        path: &[String],
        op: OnDisconnectOp,
    ) -> DatabaseResult<()> {
        self.with_state(target, |state| match op {
            OnDisconnectOp::Write(write) => state.on_disconnect.push((path.to_vec(), write)),
            OnDisconnectOp::Cancel => state
                .on_disconnect
                .retain(|(queued, _)| !is_prefix(path, queued)),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::modifiers::Limit;
    use crate::database::native::EventType;
    use futures::executor::block_on;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn target(name: &str) -> NativeTarget {
        NativeTarget {
            app_name: name.to_string(),
            database_url: format!("https://{name}.firebaseio.com"),
        }
    }

    fn path(raw: &str) -> Vec<String> {
        raw.split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn spec(key: &str, at: &str, event: EventType, only_once: bool) -> ListenSpec {
        ListenSpec {
            registration_key: key.to_string(),
            path: path(at),
            modifiers: QueryModifiers::default(),
            event,
            only_once,
        }
    }

    fn recorder() -> (NativeEventSink, Arc<Mutex<Vec<NativeEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let sink: NativeEventSink = Arc::new(move |event: DatabaseResult<NativeEvent>| {
            if let Ok(event) = event {
                captured.lock().unwrap().push(event);
            }
        });
        (sink, events)
    }

    #[test]
    fn writes_and_reads_share_one_tree() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-rw");
        block_on(module.write(&target, &path("a/b"), NativeWrite::Set(json!(1)))).unwrap();
        let mut updates = serde_json::Map::new();
        updates.insert("c/d".into(), json!(true));
        updates.insert("b".into(), json!(2));
        block_on(module.write(&target, &path("a"), NativeWrite::Update(updates))).unwrap();

        let snapshot = block_on(module.once(&target, &path("a"), &QueryModifiers::default())).unwrap();
        assert_eq!(snapshot.value, json!({"b": 2, "c": {"d": true}}));
        assert_eq!(snapshot.child_keys, ["b", "c"]);
    }

    #[test]
    fn set_priority_only_touches_existing_nodes() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-priority");
        block_on(module.write(&target, &path("x"), NativeWrite::SetPriority(json!(1)))).unwrap();
        assert_eq!(module.value(&target, &path("x")), Value::Null);

        block_on(module.write(&target, &path("x"), NativeWrite::Set(json!("v")))).unwrap();
        block_on(module.write(&target, &path("x"), NativeWrite::SetPriority(json!(1)))).unwrap();
        assert_eq!(
            module.value(&target, &path("x")),
            json!({".value": "v", ".priority": 1})
        );
    }

    #[test]
    fn value_listener_receives_initial_and_changes() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-value");
        let (sink, events) = recorder();
        module
            .listen(&target, spec("l1", "counter", EventType::Value, false), sink)
            .unwrap();
        block_on(module.write(&target, &path("counter"), NativeWrite::Set(json!(1)))).unwrap();
        block_on(module.write(&target, &path("other"), NativeWrite::Set(json!(1)))).unwrap();
        block_on(module.write(&target, &path("counter"), NativeWrite::Set(json!(1)))).unwrap();

        let values: Vec<Value> = events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.snapshot.value.clone())
            .collect();
        assert_eq!(values, [Value::Null, json!(1)]);

        module.unlisten(&target, "l1").unwrap();
        assert_eq!(module.listener_count(&target), 0);
    }

    #[test]
    fn only_once_child_listener_waits_for_first_child() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-once");
        let (sink, events) = recorder();
        module
            .listen(&target, spec("l1", "list", EventType::ChildAdded, true), sink)
            .unwrap();
        assert_eq!(module.listener_count(&target), 1);

        let mut both = serde_json::Map::new();
        both.insert("a".into(), json!(1));
        both.insert("b".into(), json!(2));
        block_on(module.write(&target, &path("list"), NativeWrite::Update(both))).unwrap();

        assert_eq!(events.lock().unwrap().len(), 1);
        assert_eq!(module.listener_count(&target), 0);
    }

    #[test]
    fn limited_listener_reports_evictions() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-limit");
        block_on(module.write(&target, &path("l/a"), NativeWrite::Set(json!(1)))).unwrap();
        let mut modifiers = QueryModifiers::default();
        modifiers.set_limit(Limit::Last(1)).unwrap();
        let (sink, events) = recorder();
        module
            .listen(
                &target,
                ListenSpec {
                    modifiers,
                    ..spec("l1", "l", EventType::ChildRemoved, false)
                },
                sink,
            )
            .unwrap();
        block_on(module.write(&target, &path("l/b"), NativeWrite::Set(json!(2)))).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, path("l/a"));
    }

    #[test]
    fn transactions_commit_and_abort() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-transaction");
        let increment: TransactionUpdate =
            Arc::new(|current| Some(json!(current.as_i64().unwrap_or(0) + 1)));
        for _ in 0..3 {
            let outcome =
                block_on(module.transaction(&target, &path("n"), increment.clone(), true)).unwrap();
            assert!(outcome.committed);
        }
        assert_eq!(module.value(&target, &path("n")), json!(3));

        let abort: TransactionUpdate = Arc::new(|_| None);
        let outcome = block_on(module.transaction(&target, &path("n"), abort, true)).unwrap();
        assert!(!outcome.committed);
        assert_eq!(outcome.snapshot.value, json!(3));
    }

    #[test]
    fn on_disconnect_queue_runs_when_going_offline() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-disconnect");
        let status = path("status");
        block_on(module.on_disconnect(
            &target,
            &status,
            OnDisconnectOp::Write(NativeWrite::Set(json!("offline"))),
        ))
        .unwrap();
        block_on(module.on_disconnect(
            &target,
            &path("status/extra"),
            OnDisconnectOp::Write(NativeWrite::Remove),
        ))
        .unwrap();
        block_on(module.on_disconnect(&target, &path("status/extra"), OnDisconnectOp::Cancel))
            .unwrap();
        assert_eq!(module.pending_on_disconnect(&target), 1);

        block_on(module.set_online(&target, false)).unwrap();
        assert!(!module.is_online(&target));
        assert_eq!(module.value(&target, &status), json!("offline"));
        assert_eq!(module.pending_on_disconnect(&target), 0);
    }

    #[test]
    fn failing_update_leaves_tree_and_listeners_unchanged() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-update-atomic");
        let (sink, events) = recorder();
        module
            .listen(&target, spec("l1", "r", EventType::Value, false), sink)
            .unwrap();

        let mut updates = serde_json::Map::new();
        updates.insert("a".into(), json!(1));
        updates.insert("b".into(), json!({".sv": "bogus"}));
        let err = block_on(module.write(&target, &path("r"), NativeWrite::Update(updates)))
            .unwrap_err();
        assert_eq!(err.code_str(), "database/invalid-argument");
        assert_eq!(module.value(&target, &path("r")), Value::Null);

        block_on(module.write(&target, &path("r/a"), NativeWrite::Set(json!(1)))).unwrap();
        let values: Vec<Value> = events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.snapshot.value.clone())
            .collect();
        assert_eq!(values, [Value::Null, json!({"a": 1})]);
    }

    #[test]
    fn inline_priority_is_stored_as_a_wrapper() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-inline-priority");
        block_on(module.write(
            &target,
            &path("p"),
            NativeWrite::Set(json!({"x": 2, ".priority": 1})),
        ))
        .unwrap();
        assert_eq!(
            module.value(&target, &path("p")),
            json!({".value": {"x": 2}, ".priority": 1})
        );
        let snapshot =
            block_on(module.once(&target, &path("p"), &QueryModifiers::default())).unwrap();
        assert_eq!(snapshot.child_keys, ["x"]);
    }

    #[test]
    fn bad_on_disconnect_entry_does_not_drop_the_rest() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-disconnect-partial");
        let (sink, events) = recorder();
        module
            .listen(&target, spec("l1", "b", EventType::Value, false), sink)
            .unwrap();
        block_on(module.on_disconnect(
            &target,
            &path("a"),
            OnDisconnectOp::Write(NativeWrite::Set(json!({".sv": "bogus"}))),
        ))
        .unwrap();
        block_on(module.on_disconnect(
            &target,
            &path("b"),
            OnDisconnectOp::Write(NativeWrite::Set(json!("gone"))),
        ))
        .unwrap();

        let err = block_on(module.set_online(&target, false)).unwrap_err();
        assert_eq!(err.code_str(), "database/invalid-argument");
        assert!(!module.is_online(&target));
        assert_eq!(module.value(&target, &path("a")), Value::Null);
        assert_eq!(module.value(&target, &path("b")), json!("gone"));
        assert_eq!(module.pending_on_disconnect(&target), 0);
        let values: Vec<Value> = events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.snapshot.value.clone())
            .collect();
        assert_eq!(values, [Value::Null, json!("gone")]);
    }

    #[test]
    fn cancelled_listeners_get_the_error() {
        let module = InMemoryNativeModule::new();
        let target = target("memory-cancel");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let captured = errors.clone();
        let sink: NativeEventSink = Arc::new(move |event: DatabaseResult<NativeEvent>| {
            if let Err(err) = event {
                captured.lock().unwrap().push(err.code_str());
            }
        });
        module
            .listen(&target, spec("l1", "secret/doc", EventType::Value, false), sink)
            .unwrap();
        module.cancel_listeners(
            &target,
            &path("secret"),
            crate::database::error::permission_denied("revoked"),
        );
        assert_eq!(*errors.lock().unwrap(), ["database/permission-denied"]);
        assert_eq!(module.listener_count(&target), 0);
    }
}

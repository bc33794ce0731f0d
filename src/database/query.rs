use std::fmt;
use std::sync::{Arc, Mutex};

use futures::channel::oneshot;
use serde_json::Value;

use crate::database::api::{Database, TrackedListener};
use crate::database::error::{internal_error, ready, DatabaseFuture, DatabaseResult};
use crate::database::modifiers::{validate_order_by_child, Bound, Limit, OrderBy, QueryModifiers};
use crate::database::native::{EventType, ListenSpec, NativeEvent, NativeEventSink};
use crate::database::path::join_path;
use crate::database::reference::DatabaseReference;
use crate::database::snapshot::DataSnapshot;
use crate::database::LOGGER;
use crate::deprecation::replacements::QUERY_INSTANCE;

/// A location plus ordering, range and limit modifiers.
#[derive(Clone, Debug)]
pub struct DatabaseQuery {
    database: Database,
    path: Vec<String>,
    modifiers: QueryModifiers,
}

impl PartialEq for DatabaseQuery {
    fn eq(&self, other: &Self) -> bool {
        self.database == other.database
            && self.path == other.path
            && self.modifiers == other.modifiers
    }
}

/// Event delivered to child listeners and to [`DatabaseQuery::on`].
///
/// `previous_name` is the key of the sibling ordered before the child, when
/// there is one; value events never carry it.
#[derive(Clone, Debug)]
pub struct ChildEvent {
    pub event_type: EventType,
    pub snapshot: DataSnapshot,
    pub previous_name: Option<String>,
}

impl ChildEvent {
    fn value(snapshot: DataSnapshot) -> Self {
        Self {
            event_type: EventType::Value,
            snapshot,
            previous_name: None,
        }
    }

    fn from_native(database: &Database, event: NativeEvent) -> Self {
        let reference = DatabaseReference::new(database.clone(), event.path);
        Self {
            event_type: event.event,
            snapshot: DataSnapshot::from_native(reference, event.snapshot),
            previous_name: event.previous_child,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenOptions {
    /// Remove the listener after the first event.
    pub only_once: bool,
}

/// Handle to an active listener.
///
/// Dropping the handle keeps the listener; call [`detach`](Self::detach) or
/// [`off`] to remove it.
#[derive(Clone, Debug)]
pub struct ListenerRegistration {
    database: Database,
    key: String,
}

impl ListenerRegistration {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn detach(self) {
        if !self.database.untrack_listener(&self.key) {
            return;
        }
        if let Err(err) = self
            .database
            .native()
            .unlisten(self.database.target(), &self.key)
        {
            LOGGER.warn(format!("failed to detach listener {}: {err}", self.key));
        }
    }
}

/// One step of a modular [`query`] composition.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryConstraint {
    kind: QueryConstraintKind,
}

#[derive(Clone, Debug, PartialEq)]
enum QueryConstraintKind {
    OrderByChild(String),
    OrderByKey,
    OrderByPriority,
    OrderByValue,
    Start(Bound),
    End(Bound),
    EqualTo { value: Value, key: Option<String> },
    Limit(Limit),
}

impl QueryConstraint {
    fn new(kind: QueryConstraintKind) -> Self {
        Self { kind }
    }

    fn apply(self, modifiers: &mut QueryModifiers) -> DatabaseResult<()> {
        match self.kind {
            QueryConstraintKind::OrderByChild(path) => {
                let path = validate_order_by_child(&path)?;
                modifiers.set_order(OrderBy::Child(path))
            }
            QueryConstraintKind::OrderByKey => modifiers.set_order(OrderBy::Key),
            QueryConstraintKind::OrderByPriority => modifiers.set_order(OrderBy::Priority),
            QueryConstraintKind::OrderByValue => modifiers.set_order(OrderBy::Value),
            QueryConstraintKind::Start(bound) => modifiers.set_start(bound),
            QueryConstraintKind::End(bound) => modifiers.set_end(bound),
            QueryConstraintKind::EqualTo { value, key } => modifiers.set_equal(value, key),
            QueryConstraintKind::Limit(limit) => modifiers.set_limit(limit),
        }
    }
}

fn bound<V: Into<Value>>(value: V, key: Option<String>, inclusive: bool) -> Bound {
    Bound {
        value: value.into(),
        key,
        inclusive,
    }
}

pub fn order_by_child(path: impl Into<String>) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::OrderByChild(path.into()))
}

pub fn order_by_key() -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::OrderByKey)
}

pub fn order_by_priority() -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::OrderByPriority)
}

pub fn order_by_value() -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::OrderByValue)
}

pub fn start_at<V: Into<Value>>(value: V) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::Start(bound(value, None, true)))
}

pub fn start_at_with_key<V: Into<Value>, S: Into<String>>(value: V, key: S) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::Start(bound(value, Some(key.into()), true)))
}

pub fn start_after<V: Into<Value>>(value: V) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::Start(bound(value, None, false)))
}

pub fn start_after_with_key<V: Into<Value>, S: Into<String>>(value: V, key: S) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::Start(bound(value, Some(key.into()), false)))
}

pub fn end_at<V: Into<Value>>(value: V) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::End(bound(value, None, true)))
}

pub fn end_at_with_key<V: Into<Value>, S: Into<String>>(value: V, key: S) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::End(bound(value, Some(key.into()), true)))
}

pub fn end_before<V: Into<Value>>(value: V) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::End(bound(value, None, false)))
}

pub fn end_before_with_key<V: Into<Value>, S: Into<String>>(value: V, key: S) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::End(bound(value, Some(key.into()), false)))
}

pub fn equal_to<V: Into<Value>>(value: V) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::EqualTo {
        value: value.into(),
        key: None,
    })
}

pub fn equal_to_with_key<V: Into<Value>, S: Into<String>>(value: V, key: S) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::EqualTo {
        value: value.into(),
        key: Some(key.into()),
    })
}

pub fn limit_to_first(limit: u32) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::Limit(Limit::First(limit)))
}

pub fn limit_to_last(limit: u32) -> QueryConstraint {
    QueryConstraint::new(QueryConstraintKind::Limit(Limit::Last(limit)))
}

/// Applies `constraints` in order on top of `query`'s modifiers.
pub fn query<I>(query: &DatabaseQuery, constraints: I) -> DatabaseResult<DatabaseQuery>
where
    I: IntoIterator<Item = QueryConstraint>,
{
    let mut modifiers = query.modifiers.clone();
    for constraint in constraints {
        constraint.apply(&mut modifiers)?;
    }
    Ok(DatabaseQuery::new(
        query.database.clone(),
        query.path.clone(),
        modifiers,
    ))
}

/// Suffix appended to the `on`/`once` warning for child events, naming the
/// modular function that replaces that overload.
pub fn overload_hint(method: &str, event: EventType) -> Option<String> {
    if !event.is_child_event() {
        return None;
    }
    let replacement = match method {
        "once" => "listen()` with `only_once".to_string(),
        _ => format!("on_{}()", event.as_str()),
    };
    Some(format!("Use `{replacement}` for `{event}` events."))
}

impl DatabaseQuery {
    pub(crate) fn new(database: Database, path: Vec<String>, modifiers: QueryModifiers) -> Self {
        Self {
            database,
            path,
            modifiers,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Last path segment; `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    /// `"/"` for the root, `"a/b"` otherwise.
    pub fn path(&self) -> String {
        join_path(&self.path)
    }

    pub fn modifiers(&self) -> &QueryModifiers {
        &self.modifiers
    }

    /// Reference to the location this query reads.
    pub fn reference(&self) -> DatabaseReference {
        DatabaseReference::new(self.database.clone(), self.path.clone())
    }

    pub(crate) fn segments(&self) -> &[String] {
        &self.path
    }

    fn deprecated(&self, method: &str) {
        self.database.emitter().warn(QUERY_INSTANCE, method);
    }

    fn deprecated_overload(&self, method: &str, event: EventType) {
        let emitter = self.database.emitter();
        match overload_hint(method, event) {
            Some(hint) => emitter.warn_with(QUERY_INSTANCE, method, &hint),
            None => emitter.warn(QUERY_INSTANCE, method),
        };
    }

    fn constrained(&self, constraint: QueryConstraint) -> DatabaseResult<DatabaseQuery> {
        query(self, [constraint])
    }

    #[deprecated(note = "use the modular `query()` with `order_by_child()`")]
    pub fn order_by_child(&self, path: &str) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("order_by_child");
        self.constrained(order_by_child(path))
    }

    #[deprecated(note = "use the modular `query()` with `order_by_key()`")]
    pub fn order_by_key(&self) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("order_by_key");
        self.constrained(order_by_key())
    }

    #[deprecated(note = "use the modular `query()` with `order_by_priority()`")]
    pub fn order_by_priority(&self) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("order_by_priority");
        self.constrained(order_by_priority())
    }

    #[deprecated(note = "use the modular `query()` with `order_by_value()`")]
    pub fn order_by_value(&self) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("order_by_value");
        self.constrained(order_by_value())
    }

    #[deprecated(note = "use the modular `query()` with `start_at()`")]
    pub fn start_at<V: Into<Value>>(&self, value: V, key: Option<&str>) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("start_at");
        self.constrained(match key {
            Some(key) => start_at_with_key(value, key),
            None => start_at(value),
        })
    }

    #[deprecated(note = "use the modular `query()` with `start_after()`")]
    pub fn start_after<V: Into<Value>>(
        &self,
        value: V,
        key: Option<&str>,
    ) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("start_after");
        self.constrained(match key {
            Some(key) => start_after_with_key(value, key),
            None => start_after(value),
        })
    }

    #[deprecated(note = "use the modular `query()` with `end_at()`")]
    pub fn end_at<V: Into<Value>>(&self, value: V, key: Option<&str>) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("end_at");
        self.constrained(match key {
            Some(key) => end_at_with_key(value, key),
            None => end_at(value),
        })
    }

    #[deprecated(note = "use the modular `query()` with `end_before()`")]
    pub fn end_before<V: Into<Value>>(
        &self,
        value: V,
        key: Option<&str>,
    ) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("end_before");
        self.constrained(match key {
            Some(key) => end_before_with_key(value, key),
            None => end_before(value),
        })
    }

    #[deprecated(note = "use the modular `query()` with `equal_to()`")]
    pub fn equal_to<V: Into<Value>>(&self, value: V, key: Option<&str>) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("equal_to");
        self.constrained(match key {
            Some(key) => equal_to_with_key(value, key),
            None => equal_to(value),
        })
    }

    #[deprecated(note = "use the modular `query()` with `limit_to_first()`")]
    pub fn limit_to_first(&self, limit: u32) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("limit_to_first");
        self.constrained(limit_to_first(limit))
    }

    #[deprecated(note = "use the modular `query()` with `limit_to_last()`")]
    pub fn limit_to_last(&self, limit: u32) -> DatabaseResult<DatabaseQuery> {
        self.deprecated("limit_to_last");
        self.constrained(limit_to_last(limit))
    }

    #[deprecated(note = "use the modular `get()` function")]
    pub fn get(&self) -> DatabaseFuture<DataSnapshot> {
        self.deprecated("get");
        get(self)
    }

    /// Resolves with the first `event`. Value events read the current data;
    /// child events wait for the first matching child.
    #[deprecated(note = "use the modular `get()` or `listen()` with `only_once`")]
    pub fn once(&self, event: EventType) -> DatabaseFuture<DataSnapshot> {
        self.deprecated_overload("once", event);
        if event == EventType::Value {
            return get(self);
        }

        let (sender, receiver) = oneshot::channel();
        let sender = Mutex::new(Some(sender));
        let registered = listen(
            self,
            event,
            move |result| {
                let pending = sender
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner())
                    .take();
                if let Some(sender) = pending {
                    let _ = sender.send(result.map(|event| event.snapshot));
                }
            },
            ListenOptions { only_once: true },
        );
        if let Err(err) = registered {
            return ready(Err(err));
        }
        Box::pin(async move {
            receiver
                .await
                .map_err(|_| internal_error("once() listener was removed before an event arrived"))?
        })
    }

    /// Listens for `event`. Value events are delivered as [`ChildEvent`]s with
    /// `event_type` set to [`EventType::Value`].
    #[deprecated(note = "use the modular `on_value()` or `on_child_*()` functions")]
    pub fn on<F>(&self, event: EventType, callback: F) -> DatabaseResult<ListenerRegistration>
    where
        F: Fn(DatabaseResult<ChildEvent>) + Send + Sync + 'static,
    {
        self.deprecated_overload("on", event);
        match event {
            EventType::Value => on_value(self, move |result| callback(result.map(ChildEvent::value))),
            EventType::ChildAdded => on_child_added(self, callback),
            EventType::ChildChanged => on_child_changed(self, callback),
            EventType::ChildRemoved => on_child_removed(self, callback),
            EventType::ChildMoved => on_child_moved(self, callback),
        }
    }

    #[deprecated(note = "use the modular `off()` function")]
    pub fn off(&self, event: Option<EventType>) -> DatabaseResult<()> {
        self.deprecated("off");
        off(self, event)
    }

    #[deprecated(note = "use the modular `keep_synced()` function")]
    pub fn keep_synced(&self, enabled: bool) -> DatabaseFuture<()> {
        self.deprecated("keep_synced");
        keep_synced(self, enabled)
    }

    /// Same database, location and modifiers. Compare with `==` instead.
    #[deprecated(note = "compare queries with `==`")]
    pub fn is_equal(&self, other: &DatabaseQuery) -> bool {
        self.deprecated("is_equal");
        self == other
    }
}

impl fmt::Display for DatabaseQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference())?;
        if !self.modifiers.is_default() {
            write!(f, "?{}", self.modifiers.canonical_key())?;
        }
        Ok(())
    }
}

/// Reads the data the query currently matches.
pub fn get(query: &DatabaseQuery) -> DatabaseFuture<DataSnapshot> {
    let reference = query.reference();
    let modifiers = query.modifiers.clone();
    Box::pin(async move {
        let database = reference.database();
        let snapshot = database
            .native()
            .once(database.target(), reference.segments(), &modifiers)
            .await?;
        Ok(DataSnapshot::from_native(reference.clone(), snapshot))
    })
}

/// Registers a listener for `event` on `query`.
pub fn listen<F>(
    query: &DatabaseQuery,
    event: EventType,
    callback: F,
    options: ListenOptions,
) -> DatabaseResult<ListenerRegistration>
where
    F: Fn(DatabaseResult<ChildEvent>) + Send + Sync + 'static,
{
    let database = query.database.clone();
    let key = database.next_registration_key();
    database.track_listener(
        key.clone(),
        TrackedListener {
            path: query.path.clone(),
            query_key: query.modifiers.canonical_key(),
            event,
        },
    );

    let owner = database.downgrade();
    let sink_key = key.clone();
    let only_once = options.only_once;
    let sink: NativeEventSink = Arc::new(move |result: DatabaseResult<NativeEvent>| {
        let Some(database) = Database::upgrade(&owner) else {
            return;
        };
        if only_once || result.is_err() {
            database.untrack_listener(&sink_key);
        }
        callback(result.map(|event| ChildEvent::from_native(&database, event)));
    });

    let spec = ListenSpec {
        registration_key: key.clone(),
        path: query.path.clone(),
        modifiers: query.modifiers.clone(),
        event,
        only_once,
    };
    if let Err(err) = database.native().listen(database.target(), spec, sink) {
        database.untrack_listener(&key);
        return Err(err);
    }
    Ok(ListenerRegistration { database, key })
}

/// Listens for the value at `query`. The first event carries the current data.
pub fn on_value<F>(query: &DatabaseQuery, callback: F) -> DatabaseResult<ListenerRegistration>
where
    F: Fn(DatabaseResult<DataSnapshot>) + Send + Sync + 'static,
{
    listen(
        query,
        EventType::Value,
        move |result| callback(result.map(|event| event.snapshot)),
        ListenOptions::default(),
    )
}

pub fn on_child_added<F>(query: &DatabaseQuery, callback: F) -> DatabaseResult<ListenerRegistration>
where
    F: Fn(DatabaseResult<ChildEvent>) + Send + Sync + 'static,
{
    listen(query, EventType::ChildAdded, callback, ListenOptions::default())
}

pub fn on_child_changed<F>(query: &DatabaseQuery, callback: F) -> DatabaseResult<ListenerRegistration>
where
    F: Fn(DatabaseResult<ChildEvent>) + Send + Sync + 'static,
{
    listen(query, EventType::ChildChanged, callback, ListenOptions::default())
}

pub fn on_child_removed<F>(query: &DatabaseQuery, callback: F) -> DatabaseResult<ListenerRegistration>
where
    F: Fn(DatabaseResult<ChildEvent>) + Send + Sync + 'static,
{
    listen(query, EventType::ChildRemoved, callback, ListenOptions::default())
}

pub fn on_child_moved<F>(query: &DatabaseQuery, callback: F) -> DatabaseResult<ListenerRegistration>
where
    F: Fn(DatabaseResult<ChildEvent>) + Send + Sync + 'static,
{
    listen(query, EventType::ChildMoved, callback, ListenOptions::default())
}

/// Removes listeners registered at `query`'s location, limited to `event` when
/// given. An unfiltered query removes the listeners of every query at the
/// location; a filtered one only its own.
pub fn off(query: &DatabaseQuery, event: Option<EventType>) -> DatabaseResult<()> {
    let database = &query.database;
    let every_query = query.modifiers.is_default();
    let query_key = query.modifiers.canonical_key();
    let keys = database.take_listeners(|listener| {
        listener.path == query.path
            && (every_query || listener.query_key == query_key)
            && event.map_or(true, |event| listener.event == event)
    });
    let native = database.native();
    for key in keys {
        native.unlisten(database.target(), &key)?;
    }
    Ok(())
}

/// Keeps the data at `query` cached and up to date even without listeners.
pub fn keep_synced(query: &DatabaseQuery, enabled: bool) -> DatabaseFuture<()> {
    let database = query.database.clone();
    let path = query.path.clone();
    let modifiers = query.modifiers.clone();
    Box::pin(async move {
        database
            .native()
            .keep_synced(database.target(), &path, &modifiers, enabled)
            .await
    })
}

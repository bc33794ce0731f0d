use std::fmt;
use std::future::IntoFuture;
use std::ops::Deref;
use std::sync::Arc;

use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::{Map, Value};

use crate::database::api::Database;
use crate::database::error::{invalid_argument, ready, DatabaseFuture, DatabaseResult};
use crate::database::modifiers::QueryModifiers;
use crate::database::native::{NativeWrite, TransactionUpdate};
use crate::database::on_disconnect::OnDisconnect;
use crate::database::path::{is_prefix, normalize_path};
use crate::database::push_id::next_push_id;
use crate::database::query::DatabaseQuery;
use crate::database::snapshot::DataSnapshot;
use crate::database::tree::{validate_priority, validate_value};
use crate::deprecation::replacements::REFERENCE_INSTANCE;

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A location in the database.
///
/// A reference is also the unfiltered query at its location, so every
/// [`DatabaseQuery`] method is available on it.
#[derive(Clone, Debug, PartialEq)]
pub struct DatabaseReference {
    query: DatabaseQuery,
}

impl Deref for DatabaseReference {
    type Target = DatabaseQuery;

    fn deref(&self) -> &Self::Target {
        &self.query
    }
}

impl fmt::Display for DatabaseReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

/// Options for [`run_transaction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Raise local events for intermediate states. Defaults to `true`.
    pub apply_locally: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            apply_locally: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransactionResult {
    pub committed: bool,
    pub snapshot: DataSnapshot,
}

/// Result of [`push`]: the new child reference, available immediately, plus
/// the pending write when a value was supplied. Awaiting it runs the write and
/// yields the reference.
pub struct ThenableReference {
    reference: DatabaseReference,
    pending: Option<DatabaseFuture<()>>,
}

impl ThenableReference {
    pub fn reference(&self) -> &DatabaseReference {
        &self.reference
    }
}

impl Deref for ThenableReference {
    type Target = DatabaseReference;

    fn deref(&self) -> &Self::Target {
        &self.reference
    }
}

impl fmt::Debug for ThenableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThenableReference")
            .field("reference", &self.reference)
            .field("pending_write", &self.pending.is_some())
            .finish()
    }
}

impl IntoFuture for ThenableReference {
    type Output = DatabaseResult<DatabaseReference>;
    type IntoFuture = DatabaseFuture<DatabaseReference>;

    fn into_future(self) -> Self::IntoFuture {
        let ThenableReference { reference, pending } = self;
        Box::pin(async move {
            if let Some(write) = pending {
                write.await?;
            }
            Ok(reference)
        })
    }
}

impl DatabaseReference {
    pub(crate) fn new(database: Database, path: Vec<String>) -> Self {
        Self {
            query: DatabaseQuery::new(database, path, QueryModifiers::default()),
        }
    }

    pub(crate) fn with_segments(&self, path: Vec<String>) -> Self {
        Self::new(self.database().clone(), path)
    }

    /// `None` for the root.
    pub fn parent(&self) -> Option<DatabaseReference> {
        let (_, parent) = self.segments().split_last()?;
        Some(self.with_segments(parent.to_vec()))
    }

    pub fn root(&self) -> DatabaseReference {
        self.with_segments(Vec::new())
    }

    /// Absolute URL of this location.
    pub fn to_url(&self) -> String {
        let mut url = self.database().url().to_string();
        url.push('/');
        let encoded: Vec<String> = self
            .segments()
            .iter()
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect();
        url.push_str(&encoded.join("/"));
        url
    }

    fn deprecated(&self, method: &str) {
        self.database().emitter().warn(REFERENCE_INSTANCE, method);
    }

    #[deprecated(note = "use the modular `child()` function")]
    pub fn child(&self, path: &str) -> DatabaseResult<DatabaseReference> {
        self.deprecated("child");
        child(self, path)
    }

    #[deprecated(note = "use the modular `set()` function")]
    pub fn set(&self, value: Value) -> DatabaseFuture<()> {
        self.deprecated("set");
        set(self, value)
    }

    #[deprecated(note = "use the modular `update()` function")]
    pub fn update(&self, values: Value) -> DatabaseFuture<()> {
        self.deprecated("update");
        update(self, values)
    }

    #[deprecated(note = "use the modular `set_with_priority()` function")]
    pub fn set_with_priority(&self, value: Value, priority: Value) -> DatabaseFuture<()> {
        self.deprecated("set_with_priority");
        set_with_priority(self, value, priority)
    }

    #[deprecated(note = "use the modular `remove()` function")]
    pub fn remove(&self) -> DatabaseFuture<()> {
        self.deprecated("remove");
        remove(self)
    }

    #[deprecated(note = "use the modular `run_transaction()` function")]
    pub fn transaction<F>(&self, update: F, apply_locally: bool) -> DatabaseFuture<TransactionResult>
    where
        F: Fn(Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.deprecated("transaction");
        run_transaction(self, update, TransactionOptions { apply_locally })
    }

    #[deprecated(note = "use the modular `set_priority()` function")]
    pub fn set_priority(&self, priority: Value) -> DatabaseFuture<()> {
        self.deprecated("set_priority");
        set_priority(self, priority)
    }

    #[deprecated(note = "use the modular `push()` function")]
    pub fn push(&self, value: Option<Value>) -> DatabaseResult<ThenableReference> {
        self.deprecated("push");
        push(self, value)
    }

    /// Namespaced handle; its methods warn as `DatabaseOnDisconnect`.
    #[deprecated(note = "use the modular `on_disconnect()` function")]
    pub fn on_disconnect(&self) -> OnDisconnect {
        self.deprecated("on_disconnect");
        OnDisconnect::new(self.clone(), true)
    }
}

pub fn child(reference: &DatabaseReference, path: &str) -> DatabaseResult<DatabaseReference> {
    let relative = normalize_path(path)?;
    if relative.is_empty() {
        return Err(invalid_argument("child() requires a non-empty path"));
    }
    let mut segments = reference.segments().to_vec();
    segments.extend(relative);
    Ok(reference.with_segments(segments))
}

pub(crate) fn write(reference: &DatabaseReference, write: NativeWrite) -> DatabaseFuture<()> {
    let database = reference.database();
    let native = database.native();
    let target = database.target().clone();
    let path = reference.segments().to_vec();
    Box::pin(async move { native.write(&target, &path, write).await })
}

/// Checks an update payload and normalises its keys.
///
/// Keys are relative paths; one key may not address a location inside another.
pub(crate) fn prepare_update(values: Value) -> DatabaseResult<Map<String, Value>> {
    let Value::Object(values) = values else {
        return Err(invalid_argument(
            "update() requires an object containing the children to replace",
        ));
    };
    let mut prepared: Vec<(Vec<String>, Value)> = Vec::with_capacity(values.len());
    for (key, value) in values {
        let segments = normalize_path(&key)?;
        if segments.is_empty() {
            return Err(invalid_argument("update() keys must not be empty"));
        }
        validate_value(&value)?;
        prepared.push((segments, value));
    }
    for (index, (path, _)) in prepared.iter().enumerate() {
        for (other, _) in &prepared[index + 1..] {
            if is_prefix(path, other) || is_prefix(other, path) {
                return Err(invalid_argument(format!(
                    "update(): path '{}' overlaps path '{}'",
                    path.join("/"),
                    other.join("/")
                )));
            }
        }
    }
    Ok(prepared
        .into_iter()
        .map(|(path, value)| (path.join("/"), value))
        .collect())
}

/// Replaces the data at `reference`. Writing `null` removes it.
pub fn set(reference: &DatabaseReference, value: Value) -> DatabaseFuture<()> {
    if let Err(err) = validate_value(&value) {
        return ready(Err(err));
    }
    write(reference, NativeWrite::Set(value))
}

/// Writes several children at once. Keys may be nested paths (`"a/b"`).
pub fn update(reference: &DatabaseReference, values: Value) -> DatabaseFuture<()> {
    match prepare_update(values) {
        Ok(values) => write(reference, NativeWrite::Update(values)),
        Err(err) => ready(Err(err)),
    }
}

pub fn set_with_priority(
    reference: &DatabaseReference,
    value: Value,
    priority: Value,
) -> DatabaseFuture<()> {
    if let Err(err) = validate_value(&value).and_then(|_| validate_priority(&priority)) {
        return ready(Err(err));
    }
    write(reference, NativeWrite::SetWithPriority { value, priority })
}

pub fn remove(reference: &DatabaseReference) -> DatabaseFuture<()> {
    write(reference, NativeWrite::Remove)
}

pub fn set_priority(reference: &DatabaseReference, priority: Value) -> DatabaseFuture<()> {
    if let Err(err) = validate_priority(&priority) {
        return ready(Err(err));
    }
    write(reference, NativeWrite::SetPriority(priority))
}

/// Atomically modifies the data at `reference`.
///
/// `update` receives the current value (without priorities) and returns the
/// new value, or `None` to abort. It may run several times when the data
/// changes concurrently.
pub fn run_transaction<F>(
    reference: &DatabaseReference,
    update: F,
    options: TransactionOptions,
) -> DatabaseFuture<TransactionResult>
where
    F: Fn(Value) -> Option<Value> + Send + Sync + 'static,
{
    let update: TransactionUpdate = Arc::new(update);
    let reference = reference.clone();
    Box::pin(async move {
        let database = reference.database();
        let outcome = database
            .native()
            .transaction(
                database.target(),
                reference.segments(),
                update,
                options.apply_locally,
            )
            .await?;
        Ok(TransactionResult {
            committed: outcome.committed,
            snapshot: DataSnapshot::from_native(reference.clone(), outcome.snapshot),
        })
    })
}

/// Creates a child with a generated, chronologically ordered key. With a
/// value, the returned handle also carries the write.
pub fn push(reference: &DatabaseReference, value: Option<Value>) -> DatabaseResult<ThenableReference> {
    if let Some(value) = &value {
        validate_value(value)?;
    }
    let database = reference.database();
    let offset = database.native().server_time_offset(database.target())?;
    let now = u64::try_from(Utc::now().timestamp_millis() + offset).unwrap_or_default();
    let mut segments = reference.segments().to_vec();
    segments.push(next_push_id(now));
    let child = reference.with_segments(segments);
    let pending = value.map(|value| write(&child, NativeWrite::Set(value)));
    Ok(ThenableReference {
        reference: child,
        pending,
    })
}

/// Handle for writes the server runs when this client disconnects.
pub fn on_disconnect(reference: &DatabaseReference) -> OnDisconnect {
    OnDisconnect::new(reference.clone(), false)
}

use serde_json::Value;

use crate::database::error::{ready, DatabaseFuture, DatabaseResult};
use crate::database::native::{NativeWrite, OnDisconnectOp};
use crate::database::reference::{prepare_update, DatabaseReference};
use crate::database::tree::{validate_priority, validate_value};
use crate::deprecation::replacements::ON_DISCONNECT_INSTANCE;

/// Writes the server applies when this client disconnects.
///
/// Obtained from [`on_disconnect`](crate::database::on_disconnect) or from the
/// namespaced `DatabaseReference::on_disconnect`; handles from the latter log a
/// deprecation warning on every call.
#[derive(Clone, Debug)]
pub struct OnDisconnect {
    reference: DatabaseReference,
    namespaced: bool,
}

impl OnDisconnect {
    pub(crate) fn new(reference: DatabaseReference, namespaced: bool) -> Self {
        Self {
            reference,
            namespaced,
        }
    }

    pub fn reference(&self) -> &DatabaseReference {
        &self.reference
    }

    fn deprecated(&self, method: &str) {
        if self.namespaced {
            self.reference
                .database()
                .emitter()
                .warn(ON_DISCONNECT_INSTANCE, method);
        }
    }

    fn queue(&self, op: DatabaseResult<OnDisconnectOp>) -> DatabaseFuture<()> {
        let op = match op {
            Ok(op) => op,
            Err(err) => return ready(Err(err)),
        };
        let reference = self.reference.clone();
        Box::pin(async move {
            let database = reference.database();
            database
                .native()
                .on_disconnect(database.target(), reference.segments(), op)
                .await
        })
    }

    pub fn set(&self, value: Value) -> DatabaseFuture<()> {
        self.deprecated("set");
        self.queue(validate_value(&value).map(|_| OnDisconnectOp::Write(NativeWrite::Set(value))))
    }

    pub fn set_with_priority(&self, value: Value, priority: Value) -> DatabaseFuture<()> {
        self.deprecated("set_with_priority");
        let op = validate_value(&value)
            .and_then(|_| validate_priority(&priority))
            .map(|_| OnDisconnectOp::Write(NativeWrite::SetWithPriority { value, priority }));
        self.queue(op)
    }

    pub fn update(&self, values: Value) -> DatabaseFuture<()> {
        self.deprecated("update");
        self.queue(prepare_update(values).map(|values| OnDisconnectOp::Write(NativeWrite::Update(values))))
    }

    pub fn remove(&self) -> DatabaseFuture<()> {
        self.deprecated("remove");
        self.queue(Ok(OnDisconnectOp::Write(NativeWrite::Remove)))
    }

    /// Drops every queued write at or below this location.
    pub fn cancel(&self) -> DatabaseFuture<()> {
        self.deprecated("cancel");
        self.queue(Ok(OnDisconnectOp::Cancel))
    }
}

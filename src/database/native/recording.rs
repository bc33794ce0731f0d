use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::database::error::DatabaseResult;
use crate::database::modifiers::QueryModifiers;
use crate::database::native::{
    EventType, InMemoryNativeModule, ListenSpec, NativeDatabaseModule, NativeEventSink,
    NativeSetting, NativeSnapshot, NativeTarget, NativeTransactionOutcome, NativeWrite,
    OnDisconnectOp, TransactionUpdate,
};
use crate::database::path::join_path;

/// A call observed by [`RecordingNativeModule`]. Paths are rendered as in
/// `DatabaseReference::path` and queries by their canonical key, so calls made
/// through different handles to the same location compare equal.
#[derive(Clone, Debug, PartialEq)]
pub enum NativeCall {
    SetOnline {
        target: NativeTarget,
        online: bool,
    },
    Configure {
        target: NativeTarget,
        setting: NativeSetting,
    },
    ServerTimeOffset {
        target: NativeTarget,
    },
    Write {
        target: NativeTarget,
        path: String,
        write: NativeWrite,
    },
    Once {
        target: NativeTarget,
        path: String,
        query: String,
    },
    Listen {
        target: NativeTarget,
        path: String,
        query: String,
        event: EventType,
        only_once: bool,
    },
    Unlisten {
        target: NativeTarget,
        path: String,
        query: String,
        event: EventType,
    },
    KeepSynced {
        target: NativeTarget,
        path: String,
        query: String,
        enabled: bool,
    },
    Transaction {
        target: NativeTarget,
        path: String,
        apply_locally: bool,
    },
    OnDisconnect {
        target: NativeTarget,
        path: String,
        op: OnDisconnectOp,
    },
}

/// Forwards to an inner module and records every call it receives.
pub struct RecordingNativeModule {
    inner: Arc<dyn NativeDatabaseModule>,
    calls: Mutex<Vec<NativeCall>>,
    registrations: Mutex<HashMap<String, (String, String, EventType)>>,
}

impl Default for RecordingNativeModule {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryNativeModule::new()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl RecordingNativeModule {
    pub fn new(inner: Arc<dyn NativeDatabaseModule>) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            registrations: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self) -> Vec<NativeCall> {
        lock(&self.calls).clone()
    }

    /// Returns the recorded calls and starts a fresh log.
    pub fn take_calls(&self) -> Vec<NativeCall> {
        std::mem::take(&mut *lock(&self.calls))
    }

    fn record(&self, call: NativeCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait(?Send)]
impl NativeDatabaseModule for RecordingNativeModule {
    async fn set_online(&self, target: &NativeTarget, online: bool) -> DatabaseResult<()> {
        self.record(NativeCall::SetOnline {
            target: target.clone(),
            online,
        });
        self.inner.set_online(target, online).await
    }

    fn configure(&self, target: &NativeTarget, setting: NativeSetting) -> DatabaseResult<()> {
        self.record(NativeCall::Configure {
            target: target.clone(),
            setting: setting.clone(),
        });
        self.inner.configure(target, setting)
    }

    fn server_time_offset(&self, target: &NativeTarget) -> DatabaseResult<i64> {
        self.record(NativeCall::ServerTimeOffset {
            target: target.clone(),
        });
        self.inner.server_time_offset(target)
    }

    async fn write(
        &self,
        target: &NativeTarget,
        path: &[String],
        write: NativeWrite,
    ) -> DatabaseResult<()> {
        self.record(NativeCall::Write {
            target: target.clone(),
            path: join_path(path),
            write: write.clone(),
        });
        self.inner.write(target, path, write).await
    }

    async fn once(
        &self,
        target: &NativeTarget,
        path: &[String],
        modifiers: &QueryModifiers,
    ) -> DatabaseResult<NativeSnapshot> {
        self.record(NativeCall::Once {
            target: target.clone(),
            path: join_path(path),
            query: modifiers.canonical_key(),
        });
        self.inner.once(target, path, modifiers).await
    }

    fn listen(
        &self,
        target: &NativeTarget,
        spec: ListenSpec,
        sink: NativeEventSink,
    ) -> DatabaseResult<()> {
        let path = join_path(&spec.path);
        let query = spec.query_key();
        lock(&self.registrations).insert(
            spec.registration_key.clone(),
            (path.clone(), query.clone(), spec.event),
        );
        self.record(NativeCall::Listen {
            target: target.clone(),
            path,
            query,
            event: spec.event,
            only_once: spec.only_once,
        });
        self.inner.listen(target, spec, sink)
    }

    fn unlisten(&self, target: &NativeTarget, registration_key: &str) -> DatabaseResult<()> {
        if let Some((path, query, event)) = lock(&self.registrations).remove(registration_key) {
            self.record(NativeCall::Unlisten {
                target: target.clone(),
                path,
                query,
                event,
            });
        }
        self.inner.unlisten(target, registration_key)
    }

    async fn keep_synced(
        &self,
        target: &NativeTarget,
        path: &[String],
        modifiers: &QueryModifiers,
        enabled: bool,
    ) -> DatabaseResult<()> {
        self.record(NativeCall::KeepSynced {
            target: target.clone(),
            path: join_path(path),
            query: modifiers.canonical_key(),
            enabled,
        });
        self.inner.keep_synced(target, path, modifiers, enabled).await
    }

    async fn transaction(
        &self,
        target: &NativeTarget,
        path: &[String],
        update: TransactionUpdate,
        apply_locally: bool,
    ) -> DatabaseResult<NativeTransactionOutcome> {
        self.record(NativeCall::Transaction {
            target: target.clone(),
            path: join_path(path),
            apply_locally,
        });
        self.inner
            .transaction(target, path, update, apply_locally)
            .await
    }

    async fn on_disconnect(
        &self,
        target: &NativeTarget,
        path: &[String],
        op: OnDisconnectOp,
    ) -> DatabaseResult<()> {
        self.record(NativeCall::OnDisconnect {
            target: target.clone(),
            path: join_path(path),
            op: op.clone(),
        });
        self.inner.on_disconnect(target, path, op).await
    }
}

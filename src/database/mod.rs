//! # Realtime Database compatibility layer
//!
//! Two call surfaces over one implementation:
//!
//! - the namespaced surface: methods on [`Database`], [`DatabaseReference`],
//!   [`DatabaseQuery`] and [`OnDisconnect`] obtained through the namespaced
//!   `on_disconnect()` method. Each of these is `#[deprecated]` and logs one
//!   warning through the [`deprecation`](crate::deprecation) channel before
//!   forwarding;
//! - the modular surface: free functions such as [`reference`], [`set`],
//!   [`query`] and [`on_value`] that take the handle as their first argument
//!   and never warn.
//!
//! Both end up in the same [`NativeDatabaseModule`](native::NativeDatabaseModule)
//! calls, so migrating a call site changes nothing but the warning. The
//! process-wide module defaults to [`InMemoryNativeModule`](native::InMemoryNativeModule);
//! [`get_database_with`] binds an instance to any other implementation.
//!
//! ## Example
//!
//! ```
//! use firebase_database_compat::app::{initialize_app, FirebaseAppSettings, FirebaseOptions};
//! use firebase_database_compat::database::*;
//! use futures::executor::block_on;
//! use serde_json::json;
//!
//! let options = FirebaseOptions {
//!     project_id: Some("demo-project".into()),
//!     ..Default::default()
//! };
//! let settings = FirebaseAppSettings {
//!     name: Some("database-doc".into()),
//!     ..Default::default()
//! };
//! let app = initialize_app(options, Some(settings)).unwrap();
//! let database = get_database(Some(&app), None).unwrap();
//!
//! let messages = reference(&database, "messages").unwrap();
//! block_on(set(&messages, json!({"m1": {"ts": 2}, "m2": {"ts": 1}}))).unwrap();
//!
//! let oldest = query(&messages, [order_by_child("ts"), limit_to_first(1)]).unwrap();
//! let snapshot = block_on(get(&oldest)).unwrap();
//! assert_eq!(snapshot.val(), json!({"m2": {"ts": 1}}));
//! ```

mod api;
pub mod error;
mod modifiers;
pub mod native;
mod on_disconnect;
mod path;
mod push_id;
mod query;
mod reference;
mod server_value;
mod snapshot;
mod tree;

use std::sync::LazyLock;

use crate::logger::Logger;

/// Channel for the database layer's own diagnostics.
pub static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@firebase/database"));

pub(crate) use api::forget_app_instances;

#[doc(inline)]
pub use api::{
    connect_database_emulator, enable_logging, get_database, get_database_with, get_server_time,
    go_offline, go_online, reference, reference_from_url, set_persistence_cache_size_bytes,
    set_persistence_enabled, Database, DatabaseSettings,
};

#[doc(inline)]
pub use error::{DatabaseError, DatabaseErrorCode, DatabaseFuture, DatabaseResult};

#[doc(inline)]
pub use modifiers::{Bound, Limit, OrderBy, QueryModifiers};

#[doc(inline)]
pub use native::EventType;

#[doc(inline)]
pub use on_disconnect::OnDisconnect;

#[doc(inline)]
pub use query::{
    end_at, end_at_with_key, end_before, end_before_with_key, equal_to, equal_to_with_key, get,
    keep_synced, limit_to_first, limit_to_last, listen, off, on_child_added, on_child_changed,
    on_child_moved, on_child_removed, on_value, order_by_child, order_by_key, order_by_priority,
    order_by_value, overload_hint, query, start_after, start_after_with_key, start_at,
    start_at_with_key, ChildEvent, DatabaseQuery, ListenOptions, ListenerRegistration,
    QueryConstraint,
};

#[doc(inline)]
pub use reference::{
    child, on_disconnect, push, remove, run_transaction, set, set_priority, set_with_priority,
    update, DatabaseReference, ThenableReference, TransactionOptions, TransactionResult,
};

#[doc(inline)]
pub use server_value::{increment, server_timestamp};

#[doc(inline)]
pub use snapshot::DataSnapshot;

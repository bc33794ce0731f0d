/// What a deprecated namespaced method should be migrated to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Replacement {
    /// Name of the modular function, e.g. `"on_value()"`.
    Modular(&'static str),
    /// Deprecated without a modular counterpart.
    None,
}

pub const DATABASE_MODULE: &str = "database";

/// Module-level methods on `Database`.
pub const DATABASE_INSTANCE: &str = "default";
pub const REFERENCE_INSTANCE: &str = "DatabaseReference";
pub const QUERY_INSTANCE: &str = "DatabaseQuery";
pub const ON_DISCONNECT_INSTANCE: &str = "DatabaseOnDisconnect";

type MethodTable = &'static [(&'static str, Replacement)];
type InstanceTable = &'static [(&'static str, MethodTable)];

use Replacement::Modular;

const DATABASE_DEFAULT: MethodTable = &[
    ("reference", Modular("reference()")),
    ("reference_from_url", Modular("reference_from_url()")),
    ("go_online", Modular("go_online()")),
    ("go_offline", Modular("go_offline()")),
    ("use_emulator", Modular("connect_database_emulator()")),
    ("set_persistence_enabled", Modular("set_persistence_enabled()")),
    ("set_logging_enabled", Modular("enable_logging()")),
    (
        "set_persistence_cache_size_bytes",
        Modular("set_persistence_cache_size_bytes()"),
    ),
    ("get_server_time", Modular("get_server_time()")),
];

const DATABASE_REFERENCE: MethodTable = &[
    ("child", Modular("child()")),
    ("set", Modular("set()")),
    ("update", Modular("update()")),
    ("set_with_priority", Modular("set_with_priority()")),
    ("remove", Modular("remove()")),
    ("transaction", Modular("run_transaction()")),
    ("set_priority", Modular("set_priority()")),
    ("push", Modular("push()")),
    ("on_disconnect", Modular("on_disconnect()")),
];

const DATABASE_QUERY: MethodTable = &[
    ("end_at", Modular("end_at()")),
    ("end_before", Modular("end_before()")),
    ("start_at", Modular("start_at()")),
    ("start_after", Modular("start_after()")),
    ("equal_to", Modular("equal_to()")),
    ("limit_to_first", Modular("limit_to_first()")),
    ("limit_to_last", Modular("limit_to_last()")),
    ("order_by_child", Modular("order_by_child()")),
    ("order_by_key", Modular("order_by_key()")),
    ("order_by_priority", Modular("order_by_priority()")),
    ("order_by_value", Modular("order_by_value()")),
    ("get", Modular("get()")),
    ("once", Modular("get()")),
    ("on", Modular("on_value()")),
    ("off", Modular("off()")),
    ("keep_synced", Modular("keep_synced()")),
    ("is_equal", Replacement::None),
];

const DATABASE_ON_DISCONNECT: MethodTable = &[
    ("set", Modular("on_disconnect(reference).set()")),
    (
        "set_with_priority",
        Modular("on_disconnect(reference).set_with_priority()"),
    ),
    ("update", Modular("on_disconnect(reference).update()")),
    ("remove", Modular("on_disconnect(reference).remove()")),
    ("cancel", Modular("on_disconnect(reference).cancel()")),
];

const DATABASE: InstanceTable = &[
    (DATABASE_INSTANCE, DATABASE_DEFAULT),
    (REFERENCE_INSTANCE, DATABASE_REFERENCE),
    (QUERY_INSTANCE, DATABASE_QUERY),
    (ON_DISCONNECT_INSTANCE, DATABASE_ON_DISCONNECT),
];

const REPLACEMENTS: &[(&str, InstanceTable)] = &[(DATABASE_MODULE, DATABASE)];

fn methods(module: &str, instance: &str) -> Option<MethodTable> {
    let (_, instances) = REPLACEMENTS.iter().find(|(name, _)| *name == module)?;
    let (_, methods) = instances.iter().find(|(name, _)| *name == instance)?;
    Some(methods)
}

/// Returns the replacement registered for `module`/`instance`/`method`, or
/// `None` when the method is not tracked as deprecated.
pub fn lookup_replacement(module: &str, instance: &str, method: &str) -> Option<Replacement> {
    methods(module, instance)?
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, replacement)| *replacement)
}

/// Every deprecated method key registered for `module`/`instance`.
pub fn deprecated_methods(module: &str, instance: &str) -> Vec<&'static str> {
    methods(module, instance)
        .map(|table| table.iter().map(|(name, _)| *name).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_known_methods() {
        assert_eq!(
            lookup_replacement(DATABASE_MODULE, REFERENCE_INSTANCE, "transaction"),
            Some(Modular("run_transaction()"))
        );
        assert_eq!(
            lookup_replacement(DATABASE_MODULE, QUERY_INSTANCE, "is_equal"),
            Some(Replacement::None)
        );
    }

    #[test]
    fn unknown_entries_are_absent() {
        assert_eq!(lookup_replacement("storage", DATABASE_INSTANCE, "set"), None);
        assert_eq!(lookup_replacement(DATABASE_MODULE, "Unknown", "set"), None);
        assert_eq!(
            lookup_replacement(DATABASE_MODULE, REFERENCE_INSTANCE, "key"),
            None
        );
    }

    #[test]
    fn method_keys_are_unique_per_instance() {
        for instance in [
            DATABASE_INSTANCE,
            REFERENCE_INSTANCE,
            QUERY_INSTANCE,
            ON_DISCONNECT_INSTANCE,
        ] {
            let mut keys = deprecated_methods(DATABASE_MODULE, instance);
            let total = keys.len();
            keys.sort_unstable();
            keys.dedup();
            assert_eq!(keys.len(), total, "duplicate key under {instance}");
        }
    }
}

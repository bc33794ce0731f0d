use firebase_database_compat::deprecation::replacements::{
    deprecated_methods, DATABASE_INSTANCE, DATABASE_MODULE, ON_DISCONNECT_INSTANCE, QUERY_INSTANCE,
    REFERENCE_INSTANCE,
};
use firebase_database_compat::deprecation::{
    check_deprecation, create_deprecation_checker, create_message, lookup_replacement,
    verify_deprecation, CheckOptions, DeprecationCheckError, DeprecationEmitter, Replacement,
    DEPRECATION_PREAMBLE,
};
use firebase_database_compat::logger::Logger;
use std::panic::{catch_unwind, AssertUnwindSafe};

#[test]
fn every_registered_method_has_a_message() {
    for instance in [
        DATABASE_INSTANCE,
        REFERENCE_INSTANCE,
        QUERY_INSTANCE,
        ON_DISCONNECT_INSTANCE,
    ] {
        let methods = deprecated_methods(DATABASE_MODULE, instance);
        assert!(!methods.is_empty(), "no methods registered for {instance}");
        for method in methods {
            let message = create_message(DATABASE_MODULE, method, instance, None);
            assert!(message.contains(&format!("`{instance}.{method}()`")));
            assert!(message.contains(DEPRECATION_PREAMBLE));
            match lookup_replacement(DATABASE_MODULE, instance, method) {
                Some(Replacement::Modular(name)) => {
                    assert!(message.contains(&format!("Please use `{name}` instead.")))
                }
                _ => assert!(!message.contains("Please use")),
            }
        }
    }
}

#[test]
fn unique_suffix_is_appended_once() {
    let plain = create_message(DATABASE_MODULE, "on", QUERY_INSTANCE, None);
    let blank = create_message(DATABASE_MODULE, "on", QUERY_INSTANCE, Some("   "));
    let hinted = create_message(
        DATABASE_MODULE,
        "on",
        QUERY_INSTANCE,
        Some("Use `on_child_added()` for `child_added` events."),
    );
    assert_eq!(plain, blank);
    assert!(hinted.starts_with(&plain));
    assert!(hinted.ends_with("for `child_added` events."));
}

#[test]
fn checker_accepts_a_well_behaved_pair() {
    let logger = Logger::new("@firebase/checker-integration");
    let emitter = DeprecationEmitter::new(DATABASE_MODULE)
        .with_logger(logger.clone())
        .with_silenced(false);
    let checker =
        create_deprecation_checker(&[DATABASE_MODULE, REFERENCE_INSTANCE]).with_logger(logger);

    checker.check_method(|| 1 + 1, || emitter.warn(REFERENCE_INSTANCE, "set"), "set");
    checker.check(
        || (),
        || emitter.warn_with(REFERENCE_INSTANCE, "push", "extra detail"),
        "push",
        CheckOptions::with_unique_message("extra detail"),
    );
}

#[test]
fn checker_reports_wrong_method_in_message() {
    let logger = Logger::new("@firebase/checker-mismatch");
    let emitter = DeprecationEmitter::new(DATABASE_MODULE)
        .with_logger(logger.clone())
        .with_silenced(false);
    let checker =
        create_deprecation_checker(&[DATABASE_MODULE, REFERENCE_INSTANCE]).with_logger(logger);

    let err = checker
        .verify(
            || (),
            || emitter.warn(REFERENCE_INSTANCE, "remove"),
            "set",
            &CheckOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, DeprecationCheckError::MessageMismatch { .. }));
    assert!(err.to_string().contains("`set`"));
}

#[test]
fn module_only_checks_use_the_shared_channel() {
    let emitter = DeprecationEmitter::new(DATABASE_MODULE).with_silenced(false);
    check_deprecation(|| (), || emitter.warn(DATABASE_INSTANCE, "go_online"));

    let silent = DeprecationEmitter::new(DATABASE_MODULE).with_silenced(true);
    assert!(matches!(
        verify_deprecation(|| (), || silent.warn(DATABASE_INSTANCE, "go_online")),
        Err(DeprecationCheckError::LegacyWarningCount { .. })
    ));
}

#[test]
fn failed_check_panics_with_the_reason() {
    let result = catch_unwind(AssertUnwindSafe(|| {
        check_deprecation(|| (), || ());
    }));
    let payload = result.unwrap_err();
    let reason = payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_default();
    assert!(reason.contains("expected exactly one"));
}

use firebase_database_compat::app::initialize_app;
use firebase_database_compat::app::{FirebaseAppSettings, FirebaseOptions};
use firebase_database_compat::database::native::InMemoryNativeModule;
use firebase_database_compat::database::{
    child, get_database_with, go_offline, on_child_added, on_child_changed, on_child_moved,
    on_child_removed, on_disconnect, on_value, query, reference, remove, run_transaction, set,
    set_with_priority, increment, limit_to_first, order_by_child, server_timestamp, update,
    Database, DatabaseResult, DatabaseSettings, TransactionOptions,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn unique_settings(name: &str) -> FirebaseAppSettings {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    FirebaseAppSettings {
        name: Some(format!("{name}-{}", COUNTER.fetch_add(1, Ordering::SeqCst))),
        ..Default::default()
    }
}

fn init_database(suffix: &str) -> DatabaseResult<Database> {
    let options = FirebaseOptions {
        project_id: Some(format!("listener-tests-{suffix}")),
        ..Default::default()
    };
    let app = initialize_app(options, Some(unique_settings("database-listener")))
        .expect("initialize app");
    get_database_with(
        &app,
        None,
        Arc::new(InMemoryNativeModule::new()),
        DatabaseSettings::default(),
    )
}

fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Vec<T>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    (events.clone(), events)
}

#[tokio::test(flavor = "current_thread")]
async fn value_listener_emits_initial_and_updates() {
    let database = init_database("value").unwrap();
    let reference = reference(&database, "counters/main").unwrap();

    let (events, captured) = recorder::<Value>();
    let registration = on_value(&reference, move |result| {
        if let Ok(snapshot) = result {
            captured.lock().unwrap().push(snapshot.val());
        }
    })
    .expect("register on_value listener");

    set(&reference, json!(1)).await.unwrap();
    set(&reference, json!(2)).await.unwrap();
    set(&reference, json!(2)).await.unwrap();

    {
        let events = events.lock().unwrap();
        assert_eq!(events.as_slice(), &[Value::Null, json!(1), json!(2)]);
    }

    registration.detach();
    assert_eq!(database.active_listener_count(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn child_added_listener_reports_new_children() {
    let database = init_database("child").unwrap();
    let list = reference(&database, "lists/default").unwrap();

    let (events, captured) = recorder::<(Value, Option<String>)>();
    let registration = on_child_added(&list, move |result| {
        if let Ok(event) = result {
            captured
                .lock()
                .unwrap()
                .push((event.snapshot.into_value(), event.previous_name));
        }
    })
    .expect("register child_added listener");

    set(&child(&list, "first").unwrap(), json!("alpha")).await.unwrap();
    set(&child(&list, "second").unwrap(), json!("beta")).await.unwrap();

    {
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (json!("alpha"), None));
        assert_eq!(events[1], (json!("beta"), Some("first".to_string())));
    }

    registration.detach();
}

#[tokio::test(flavor = "current_thread")]
async fn changed_and_removed_children_are_reported() {
    let database = init_database("changed").unwrap();
    let list = reference(&database, "items").unwrap();
    set(&list, json!({"a": 1, "b": 2})).await.unwrap();

    let (events, captured) = recorder::<String>();
    let changed = captured.clone();
    on_child_changed(&list, move |result| {
        let event = result.unwrap();
        changed
            .lock()
            .unwrap()
            .push(format!("changed:{}", event.snapshot.key().unwrap()));
    })
    .unwrap();
    on_child_removed(&list, move |result| {
        let event = result.unwrap();
        captured
            .lock()
            .unwrap()
            .push(format!("removed:{}", event.snapshot.key().unwrap()));
    })
    .unwrap();

    update(&list, json!({"a": 10})).await.unwrap();
    remove(&child(&list, "b").unwrap()).await.unwrap();

    assert_eq!(*events.lock().unwrap(), ["changed:a", "removed:b"]);
}

#[tokio::test(flavor = "current_thread")]
async fn moved_children_follow_priority_changes() {
    let database = init_database("moved").unwrap();
    let list = reference(&database, "ranked").unwrap();
    set_with_priority(&child(&list, "a").unwrap(), json!("A"), json!(1))
        .await
        .unwrap();
    set_with_priority(&child(&list, "b").unwrap(), json!("B"), json!(2))
        .await
        .unwrap();

    let (events, captured) = recorder::<(String, Option<String>)>();
    on_child_moved(&list, move |result| {
        let event = result.unwrap();
        captured.lock().unwrap().push((
            event.snapshot.key().unwrap().to_string(),
            event.previous_name,
        ));
    })
    .unwrap();

    set_with_priority(&child(&list, "a").unwrap(), json!("A"), json!(3))
        .await
        .unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        [("a".to_string(), Some("b".to_string()))]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn limited_query_tracks_window() {
    let database = init_database("window").unwrap();
    let scores = reference(&database, "scores").unwrap();
    set(&scores, json!({"x": {"n": 3}, "y": {"n": 1}})).await.unwrap();

    let lowest = query(&scores, [order_by_child("n"), limit_to_first(1)]).unwrap();
    let (events, captured) = recorder::<Value>();
    on_value(&lowest, move |result| {
        captured.lock().unwrap().push(result.unwrap().val());
    })
    .unwrap();

    set(&child(&scores, "z").unwrap(), json!({"n": 0})).await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        [json!({"y": {"n": 1}}), json!({"z": {"n": 0}})]
    );
}

#[tokio::test(flavor = "current_thread")]
async fn server_values_resolve_on_write() {
    let database = init_database("server-values").unwrap();
    let stats = reference(&database, "stats").unwrap();
    set(&stats, json!({"visits": 1})).await.unwrap();
    update(
        &stats,
        json!({"visits": increment(2.0), "updated_at": server_timestamp()}),
    )
    .await
    .unwrap();

    let (events, captured) = recorder::<Value>();
    on_value(&stats, move |result| {
        captured.lock().unwrap().push(result.unwrap().val());
    })
    .unwrap();

    let value = events.lock().unwrap()[0].clone();
    assert_eq!(value["visits"], json!(3));
    assert!(value["updated_at"].as_i64().unwrap() > 0);
}

#[tokio::test(flavor = "current_thread")]
async fn transactions_and_on_disconnect_notify_listeners() {
    let database = init_database("transaction").unwrap();
    let presence = reference(&database, "presence/ada").unwrap();
    let counter = reference(&database, "counter").unwrap();

    let (events, captured) = recorder::<Value>();
    on_value(&presence, move |result| {
        captured.lock().unwrap().push(result.unwrap().val());
    })
    .unwrap();

    set(&presence, json!("online")).await.unwrap();
    on_disconnect(&presence).set(json!("offline")).await.unwrap();
    let outcome = run_transaction(
        &counter,
        |current| Some(json!(current.as_i64().unwrap_or(0) + 1)),
        TransactionOptions::default(),
    )
    .await
    .unwrap();
    assert!(outcome.committed);
    go_offline(&database).await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        [Value::Null, json!("online"), json!("offline")]
    );
}

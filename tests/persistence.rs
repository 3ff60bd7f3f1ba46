use amani_core::capabilities::{StorageError, StorageOperation, StorageOutput};
use amani_core::{
    App, AppConfig, DiaryEntryKind, Effect, Event, Locale, Model, StoreHealth, ToastKind,
};
use crux_core::testing::AppTester;
use crux_core::Request;

fn saved_document(effects: Vec<Effect>) -> Option<String> {
    effects.into_iter().find_map(|effect| match effect {
        Effect::Storage(request) => match &request.operation {
            StorageOperation::Save { document, .. } => Some(document.clone()),
            _ => None,
        },
        _ => None,
    })
}

fn save_requests(effects: Vec<Effect>) -> Vec<Request<StorageOperation>> {
    effects
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Storage(request)
                if matches!(request.operation, StorageOperation::Save { .. }) =>
            {
                Some(request)
            }
            _ => None,
        })
        .collect()
}

fn drain(app: &AppTester<App, Effect>, model: &mut Model, events: Vec<Event>) -> Vec<Effect> {
    let mut effects = Vec::new();
    for event in events {
        effects.extend(app.update(event, model).effects);
    }
    effects
}

/// Boots the app and returns the load request startup issued.
fn start(app: &AppTester<App, Effect>, model: &mut Model) -> Request<StorageOperation> {
    let update = app.update(
        Event::Started {
            config: AppConfig::default(),
        },
        model,
    );
    let mut loads: Vec<_> = update
        .effects
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Storage(request)
                if matches!(request.operation, StorageOperation::Load { .. }) =>
            {
                Some(request)
            }
            _ => None,
        })
        .collect();
    assert_eq!(loads.len(), 1, "startup should load exactly once");
    loads.remove(0)
}

#[test]
fn restore_rebuilds_state_from_saved_document() {
    // A previous session builds up state worth keeping.
    let source = AppTester::<App, Effect>::default();
    let mut source_model = Model::default();
    source.update(
        Event::PinSetSubmitted {
            pin: "2468".into(),
            confirm: "2468".into(),
        },
        &mut source_model,
    );
    source.update(
        Event::ContactAddRequested {
            name: "Asha".into(),
            phone: "+254712000001".into(),
        },
        &mut source_model,
    );
    source.update(
        Event::DiaryEntryAddRequested {
            kind: DiaryEntryKind::Text,
            title: "day one".into(),
            content: Some("he came back tonight".into()),
            data_url: None,
        },
        &mut source_model,
    );
    let update = source.update(
        Event::SosMessageChanged {
            message: "Njoo haraka tafadhali.".into(),
        },
        &mut source_model,
    );
    let document = saved_document(update.effects).expect("settings change persists");

    // A new session restores it all.
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut load = start(&app, &mut model);
    let resolved = app
        .resolve(
            &mut load,
            Ok(StorageOutput::Loaded {
                document: Some(document),
            }),
        )
        .expect("load resolves");
    drain(&app, &mut model, resolved.events);

    assert!(model.hydrated);
    assert_eq!(model.store_health, StoreHealth::Healthy);
    assert!(model.is_unlocked());
    assert!(model.pin.as_ref().is_some_and(|pin| pin.matches("2468")));
    assert_eq!(model.contacts.len(), 1);
    assert_eq!(model.contacts[0].name, "Asha");
    assert_eq!(model.contacts[0].phone, "+254712000001");
    assert_eq!(model.diary_entries.len(), 1);
    assert_eq!(model.diary_entries[0].title, "day one");
    assert_eq!(model.sos_message, "Njoo haraka tafadhali.");
}

#[test]
fn corrupt_document_degrades_and_keeps_defaults() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut load = start(&app, &mut model);
    let resolved = app
        .resolve(
            &mut load,
            Ok(StorageOutput::Loaded {
                document: Some("{ definitely not json".into()),
            }),
        )
        .expect("load resolves");
    drain(&app, &mut model, resolved.events);

    assert!(model.hydrated);
    assert_eq!(model.store_health, StoreHealth::Degraded);
    assert!(model.pin.is_none());
    assert!(model.contacts.is_empty());

    let toast = model.active_toast.as_ref().expect("user is told");
    assert_eq!(toast.kind, ToastKind::Warning);
    assert_eq!(toast.message, "Saved data could not be read and has been reset.");
}

#[test]
fn future_schema_version_is_not_migrated() {
    let document = r#"{"schemaVersion":2,"pin":"1234","isPinSet":true,"isUnlocked":true,"sosMessage":"hi","contacts":[],"diaryEntries":[]}"#;

    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut load = start(&app, &mut model);
    let resolved = app
        .resolve(
            &mut load,
            Ok(StorageOutput::Loaded {
                document: Some(document.into()),
            }),
        )
        .expect("load resolves");
    drain(&app, &mut model, resolved.events);

    assert_eq!(model.store_health, StoreHealth::Degraded);
    assert!(model.pin.is_none());
    assert!(!model.is_unlocked());
}

#[test]
fn first_run_with_no_document_is_healthy() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut load = start(&app, &mut model);
    let resolved = app
        .resolve(&mut load, Ok(StorageOutput::Loaded { document: None }))
        .expect("load resolves");
    drain(&app, &mut model, resolved.events);

    assert!(model.hydrated);
    assert_eq!(model.store_health, StoreHealth::Healthy);
    assert!(model.active_toast.is_none());
    assert!(model.active_error.is_none());
}

#[test]
fn unavailable_store_runs_in_memory_silently() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let mut load = start(&app, &mut model);
    let resolved = app
        .resolve(
            &mut load,
            Err(StorageError::Unavailable {
                reason: "private browsing".into(),
            }),
        )
        .expect("load resolves");
    drain(&app, &mut model, resolved.events);

    // The app keeps working in memory without nagging the user.
    assert_eq!(model.store_health, StoreHealth::Unavailable);
    assert!(model.active_toast.is_none());
    assert!(model.active_error.is_none());
}

#[test]
fn save_failures_mark_health_until_one_succeeds() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(
        Event::SosMessageChanged {
            message: "first".into(),
        },
        &mut model,
    );
    let mut saves = save_requests(update.effects);
    let resolved = app
        .resolve(&mut saves[0], Err(StorageError::QuotaExceeded))
        .expect("save resolves");
    drain(&app, &mut model, resolved.events);
    assert_eq!(model.store_health, StoreHealth::Degraded);

    let update = app.update(
        Event::SosMessageChanged {
            message: "second".into(),
        },
        &mut model,
    );
    let mut saves = save_requests(update.effects);
    let resolved = app
        .resolve(
            &mut saves[0],
            Err(StorageError::Unavailable {
                reason: "backend gone".into(),
            }),
        )
        .expect("save resolves");
    drain(&app, &mut model, resolved.events);
    assert_eq!(model.store_health, StoreHealth::Unavailable);

    let update = app.update(
        Event::SosMessageChanged {
            message: "third".into(),
        },
        &mut model,
    );
    let mut saves = save_requests(update.effects);
    let resolved = app
        .resolve(&mut saves[0], Ok(StorageOutput::Saved))
        .expect("save resolves");
    drain(&app, &mut model, resolved.events);
    assert_eq!(model.store_health, StoreHealth::Healthy);
}

#[test]
fn locale_changes_are_session_only() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(
        Event::LocaleChanged { locale: Locale::Sw },
        &mut model,
    );
    assert_eq!(model.locale, Locale::Sw);
    assert!(
        !update
            .effects
            .iter()
            .any(|effect| matches!(effect, Effect::Storage(_))),
        "locale changes must not touch storage"
    );

    let update = app.update(
        Event::SosMessageChanged {
            message: "updated".into(),
        },
        &mut model,
    );
    let document = saved_document(update.effects).expect("settings change persists");
    assert!(!document.contains("locale"));
    assert!(!document.contains("\"sw\""));
}

#[test]
fn transient_ui_state_never_reaches_the_document() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    app.update(
        Event::PinSetSubmitted {
            pin: "1234".into(),
            confirm: "1234".into(),
        },
        &mut model,
    );
    let update = app.update(
        Event::ContactAddRequested {
            name: "Asha".into(),
            phone: "+254712000001".into(),
        },
        &mut model,
    );

    let document = saved_document(update.effects).expect("contact add persists");
    assert!(document.contains("\"schemaVersion\":1"));
    assert!(!document.contains("\"route\""));
    assert!(!document.contains("\"gate\""));
    assert!(!document.contains("\"toast\""));
    assert!(!document.contains("\"disguiseStats\""));
    assert!(!document.contains("\"storeHealth\""));
}

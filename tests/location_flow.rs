use amani_core::capabilities::{
    AvailabilityReport, FetchOptions, GeolocationError, GeolocationOperation, GeolocationOutput,
    PermissionProbe, PositionSample, StorageOperation,
};
use amani_core::{App, AppConfig, Effect, Event, Model, PermissionState};
use crux_core::testing::AppTester;
use crux_core::Request;

fn report(secure: bool, origin: &str, permission: PermissionProbe) -> AvailabilityReport {
    AvailabilityReport {
        secure_context: secure,
        origin: origin.into(),
        geolocation_supported: true,
        permission,
    }
}

fn geolocation_requests(effects: Vec<Effect>) -> Vec<Request<GeolocationOperation>> {
    effects
        .into_iter()
        .filter_map(|effect| match effect {
            Effect::Geolocation(request) => Some(request),
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

/// Issues a refresh and resolves the availability check with `availability`,
/// returning the effects the availability outcome produced.
fn refresh_with_availability(
    app: &AppTester<App, Effect>,
    model: &mut Model,
    availability: AvailabilityReport,
) -> Vec<Effect> {
    let update = app.update(Event::LocationRefreshRequested, model);
    let mut checks = geolocation_requests(update.effects);
    assert_eq!(checks.len(), 1, "expected exactly one availability check");
    let resolved = app
        .resolve(
            &mut checks[0],
            Ok(GeolocationOutput::Availability(availability)),
        )
        .expect("availability resolves");
    drain(app, model, resolved.events)
}

#[test]
fn startup_restores_state_and_probes_availability() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = app.update(
        Event::Started {
            config: AppConfig::default(),
        },
        &mut model,
    );

    let mut load_seen = false;
    let mut check_seen = false;
    let mut fetch_seen = false;
    for effect in &update.effects {
        match effect {
            Effect::Storage(request) => {
                if matches!(request.operation, StorageOperation::Load { .. }) {
                    load_seen = true;
                }
            }
            Effect::Geolocation(request) => match request.operation {
                GeolocationOperation::CheckAvailability => check_seen = true,
                GeolocationOperation::FetchPosition { .. } => fetch_seen = true,
            },
            _ => {}
        }
    }
    assert!(load_seen, "startup should request the stored document");
    assert!(check_seen, "startup should probe the environment");
    // No fetch until the environment ladder passes.
    assert!(!fetch_seen);
}

#[test]
fn granted_environment_fetches_with_the_passive_profile() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let effects = refresh_with_availability(
        &app,
        &mut model,
        report(true, "https://amani.example", PermissionProbe::Granted),
    );
    assert_eq!(model.location_permission, PermissionState::Granted);

    let mut fetches = geolocation_requests(effects);
    assert_eq!(fetches.len(), 1);
    assert_eq!(
        fetches[0].operation,
        GeolocationOperation::FetchPosition {
            options: FetchOptions::passive()
        }
    );

    let resolved = app
        .resolve(
            &mut fetches[0],
            Ok(GeolocationOutput::Position(PositionSample {
                lat: -1.2921,
                lon: 36.8219,
                accuracy_m: Some(15.0),
            })),
        )
        .expect("fix resolves");
    let effects = drain(&app, &mut model, resolved.events);

    let fix = model.current_location.expect("fix recorded");
    assert!((fix.coordinate.lat() - -1.2921).abs() < f64::EPSILON);
    assert!(fix.fetched_at.is_some());
    assert_eq!(model.location_permission, PermissionState::Granted);

    // The fix is persisted for the next session.
    assert!(effects.iter().any(|effect| match effect {
        Effect::Storage(request) =>
            matches!(request.operation, StorageOperation::Save { .. }),
        _ => false,
    }));
}

#[test]
fn insecure_origin_blocks_without_fetching() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let effects = refresh_with_availability(
        &app,
        &mut model,
        report(false, "http://amani.example", PermissionProbe::Granted),
    );

    assert!(geolocation_requests(effects).is_empty());
    assert_eq!(model.location_permission, PermissionState::Restricted);
    assert_eq!(
        model.active_error.as_ref().unwrap().code(),
        "INSECURE_CONTEXT"
    );
}

#[test]
fn loopback_origin_is_exempt_from_secure_context() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let effects = refresh_with_availability(
        &app,
        &mut model,
        report(false, "http://localhost:9002", PermissionProbe::Granted),
    );

    assert_eq!(geolocation_requests(effects).len(), 1);
    assert!(model.active_error.is_none());
}

#[test]
fn denied_probe_marks_permission_denied() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let effects = refresh_with_availability(
        &app,
        &mut model,
        report(true, "https://amani.example", PermissionProbe::Denied),
    );

    assert!(geolocation_requests(effects).is_empty());
    assert_eq!(model.location_permission, PermissionState::Denied);
    assert_eq!(
        model.active_error.as_ref().unwrap().code(),
        "LOCATION_PERMISSION_DENIED"
    );
}

#[test]
fn prompt_probe_proceeds_and_marks_requesting() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let effects = refresh_with_availability(
        &app,
        &mut model,
        report(true, "https://amani.example", PermissionProbe::Prompt),
    );

    assert_eq!(geolocation_requests(effects).len(), 1);
    assert_eq!(model.location_permission, PermissionState::Requesting);
}

#[test]
fn permission_denied_during_fetch_is_recorded() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let effects = refresh_with_availability(
        &app,
        &mut model,
        report(true, "https://amani.example", PermissionProbe::Prompt),
    );
    let mut fetches = geolocation_requests(effects);
    let resolved = app
        .resolve(&mut fetches[0], Err(GeolocationError::PermissionDenied))
        .expect("failure resolves");
    drain(&app, &mut model, resolved.events);

    assert!(model.current_location.is_none());
    assert_eq!(model.location_permission, PermissionState::Denied);
    assert_eq!(
        model.active_error.as_ref().unwrap().code(),
        "LOCATION_PERMISSION_DENIED"
    );
}

#[test]
fn superseded_passive_fetch_is_discarded() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let granted = report(true, "https://amani.example", PermissionProbe::Granted);

    let effects = refresh_with_availability(&app, &mut model, granted.clone());
    let mut first = geolocation_requests(effects);

    let effects = refresh_with_availability(&app, &mut model, granted);
    let mut second = geolocation_requests(effects);

    // The older fetch completes after a newer one was issued; its fix must
    // not overwrite anything.
    let resolved = app
        .resolve(
            &mut first[0],
            Ok(GeolocationOutput::Position(PositionSample {
                lat: -1.0,
                lon: 36.0,
                accuracy_m: None,
            })),
        )
        .expect("stale fix resolves");
    drain(&app, &mut model, resolved.events);
    assert!(model.current_location.is_none());

    let resolved = app
        .resolve(
            &mut second[0],
            Ok(GeolocationOutput::Position(PositionSample {
                lat: -1.2921,
                lon: 36.8219,
                accuracy_m: None,
            })),
        )
        .expect("current fix resolves");
    drain(&app, &mut model, resolved.events);
    let fix = model.current_location.expect("current fix recorded");
    assert!((fix.coordinate.lat() - -1.2921).abs() < f64::EPSILON);
}

#[test]
fn successful_fix_clears_an_earlier_location_error() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    refresh_with_availability(
        &app,
        &mut model,
        report(true, "https://amani.example", PermissionProbe::Denied),
    );
    assert!(model.active_error.is_some());

    let effects = refresh_with_availability(
        &app,
        &mut model,
        report(true, "https://amani.example", PermissionProbe::Granted),
    );
    let mut fetches = geolocation_requests(effects);
    let resolved = app
        .resolve(
            &mut fetches[0],
            Ok(GeolocationOutput::Position(PositionSample {
                lat: -1.29,
                lon: 36.82,
                accuracy_m: None,
            })),
        )
        .expect("fix resolves");
    drain(&app, &mut model, resolved.events);

    assert!(model.active_error.is_none());
    assert_eq!(model.location_permission, PermissionState::Granted);
}

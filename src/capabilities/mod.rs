//! Capabilities connecting the core to the shell.
//!
//! The core never performs IO. Every externally visible action is described
//! by one of the operations in this module and executed by the shell, which
//! reports back through the event named at the call site.

mod alert;
mod geolocation;
mod storage;
mod telemetry;

pub use self::alert::{Alert, AlertOperation, AlertPayload};
pub use self::geolocation::{
    evaluate_availability, AvailabilityReport, FetchOptions, Geolocation, GeolocationError,
    GeolocationOperation, GeolocationOutput, GeolocationResult, PermissionProbe, PositionSample,
};
pub use self::storage::{
    Storage, StorageError, StorageOperation, StorageOutput, StorageResult, StoreKey,
};
pub use self::telemetry::{Telemetry, TelemetryOperation};

pub use crux_core::render::Render;

use crate::app::App;
use crate::Event;

pub type AppRender = Render<Event>;
pub type AppStorage = Storage<Event>;
pub type AppGeolocation = Geolocation<Event>;
pub type AppAlert = Alert<Event>;
pub type AppTelemetry = Telemetry<Event>;

#[derive(crux_core::macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub render: Render<Event>,
    pub storage: Storage<Event>,
    pub geolocation: Geolocation<Event>,
    pub alert: Alert<Event>,
    pub telemetry: Telemetry<Event>,
}

impl Capabilities {
    #[must_use]
    pub fn render(&self) -> &AppRender {
        &self.render
    }

    #[must_use]
    pub fn storage(&self) -> &AppStorage {
        &self.storage
    }

    #[must_use]
    pub fn geolocation(&self) -> &AppGeolocation {
        &self.geolocation
    }

    #[must_use]
    pub fn alert(&self) -> &AppAlert {
        &self.alert
    }

    #[must_use]
    pub fn telemetry(&self) -> &AppTelemetry {
        &self.telemetry
    }
}

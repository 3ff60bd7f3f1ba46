//! Counters, gauges, and structured events forwarded to the shell.
//!
//! The shell decides where these land (console, an analytics backend, or
//! nowhere at all in privacy builds). Nothing sent through here may contain
//! PINs, contact details, diary content, or coordinates.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryOperation {
    Counter {
        name: String,
        value: u64,
    },
    Gauge {
        name: String,
        value: f64,
    },
    Event {
        name: String,
        attributes: Vec<(String, String)>,
    },
    Error {
        name: String,
        message: String,
    },
}

impl Operation for TelemetryOperation {
    type Output = ();
}

pub struct Telemetry<E> {
    context: CapabilityContext<TelemetryOperation, E>,
}

impl<E> Telemetry<E>
where
    E: Send + 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<TelemetryOperation, E>) -> Self {
        Self { context }
    }

    pub fn counter(&self, name: &str, value: u64) {
        self.notify(TelemetryOperation::Counter {
            name: name.to_string(),
            value,
        });
    }

    pub fn gauge(&self, name: &str, value: f64) {
        self.notify(TelemetryOperation::Gauge {
            name: name.to_string(),
            value,
        });
    }

    pub fn event(&self, name: &str, attributes: &[(&str, &str)]) {
        self.notify(TelemetryOperation::Event {
            name: name.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        });
    }

    pub fn error(&self, name: &str, message: &str) {
        self.notify(TelemetryOperation::Error {
            name: name.to_string(),
            message: message.to_string(),
        });
    }

    fn notify(&self, operation: TelemetryOperation) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.notify_shell(operation).await;
        });
    }
}

impl<E> Capability<E> for Telemetry<E> {
    type Operation = TelemetryOperation;
    type MappedSelf<MappedEv> = Telemetry<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> E + Send + Sync + 'static,
        E: 'static,
        NewEv: 'static + Send,
    {
        Telemetry::new(self.context.map_event(f))
    }
}

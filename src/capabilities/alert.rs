//! Emergency alert dispatch.
//!
//! The core composes the full alert text and hands it to the shell together
//! with the recipient list. How the shell delivers it (SMS intent, share
//! sheet, messaging deep link) is its own business. Delivery is
//! fire-and-forget: by the time an SOS is dispatched the core has already
//! committed to the outcome it reports.

use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub message: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertOperation {
    Deliver { payload: AlertPayload },
}

impl Operation for AlertOperation {
    type Output = ();
}

pub struct Alert<E> {
    context: CapabilityContext<AlertOperation, E>,
}

impl<E> Alert<E>
where
    E: Send + 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<AlertOperation, E>) -> Self {
        Self { context }
    }

    pub fn deliver(&self, payload: AlertPayload) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context
                .notify_shell(AlertOperation::Deliver { payload })
                .await;
        });
    }
}

impl<E> Capability<E> for Alert<E> {
    type Operation = AlertOperation;
    type MappedSelf<MappedEv> = Alert<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> E + Send + Sync + 'static,
        E: 'static,
        NewEv: 'static + Send,
    {
        Alert::new(self.context.map_event(f))
    }
}

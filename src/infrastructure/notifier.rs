use crate::domain::events::{PaymentEvent, PaymentEventKind};
use crate::domain::ports::EventNotifier;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

/// Hands events to a consumer task through an unbounded tokio channel.
///
/// Publishing never blocks the payment flow; if the consumer is gone the
/// event is dropped with a warning.
pub struct QueueNotifier {
    sender: mpsc::UnboundedSender<PaymentEvent>,
}

impl QueueNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PaymentEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventNotifier for QueueNotifier {
    fn publish(&self, event: PaymentEvent) {
        if let Err(err) = self.sender.send(event) {
            warn!(
                payment = %err.0.payment_code,
                event = %err.0.kind,
                "event consumer is gone, dropping event"
            );
        }
    }
}

/// Keeps every published event in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<PaymentEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PaymentEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<PaymentEventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }
}

impl EventNotifier for RecordingNotifier {
    fn publish(&self, event: PaymentEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

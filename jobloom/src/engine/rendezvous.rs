//! Form-data rendezvous.
//!
//! Each rendezvous id is a single-shot, one-producer/one-consumer channel
//! kept in a guarded map. `provide` delivered before its `wait` is buffered;
//! a second `provide` with the same id is ignored; each id is consumed at
//! most once.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::document::FormMap;

enum Slot {
    /// A waiter arrived first and parks on the receiver.
    Waiting(oneshot::Sender<FormMap>),
    /// Data arrived first and waits for its consumer.
    Buffered(FormMap),
    /// The rendezvous completed; the id is spent.
    Taken,
}

/// Engine-wide rendezvous table.
#[derive(Default)]
pub struct FormBroker {
    slots: Mutex<FxHashMap<String, Slot>>,
}

impl FormBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver form data for a rendezvous id.
    ///
    /// Returns `true` when the data was accepted (handed to a waiter or
    /// buffered for one); `false` when the id was already fulfilled.
    pub fn provide(&self, unique_id: &str, data: FormMap) -> bool {
        let mut slots = self.slots.lock();
        match slots.remove(unique_id) {
            None => {
                slots.insert(unique_id.to_string(), Slot::Buffered(data));
                true
            }
            Some(Slot::Waiting(sender)) => {
                slots.insert(unique_id.to_string(), Slot::Taken);
                // The waiter may have been cancelled; the id stays spent.
                let _ = sender.send(data);
                true
            }
            Some(occupied) => {
                slots.insert(unique_id.to_string(), occupied);
                false
            }
        }
    }

    /// Wait for form data for a rendezvous id.
    ///
    /// Returns `None` when the id was already consumed, or when a second
    /// waiter races for the same id.
    pub async fn wait(&self, unique_id: &str) -> Option<FormMap> {
        let receiver = {
            let mut slots = self.slots.lock();
            match slots.remove(unique_id) {
                Some(Slot::Buffered(data)) => {
                    slots.insert(unique_id.to_string(), Slot::Taken);
                    return Some(data);
                }
                Some(occupied @ (Slot::Taken | Slot::Waiting(_))) => {
                    slots.insert(unique_id.to_string(), occupied);
                    return None;
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    slots.insert(unique_id.to_string(), Slot::Waiting(tx));
                    rx
                }
            }
        };
        receiver.await.ok()
    }
}

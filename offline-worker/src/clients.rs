//! Client Notification Channel
//!
//! Explicit registry of open application instances and a fire-and-forget
//! broadcast to them. Clients that connect later get nothing retroactively.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use spin::Mutex;
use tokio::sync::mpsc;

use crate::fetch::RequestMethod;

// ── Messages ────────────────────────────────────────────────

/// Lifecycle event pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "queued-action")]
    QueuedAction { url: String, method: RequestMethod },
    #[serde(rename = "sync-start")]
    SyncStart { total: usize },
    #[serde(rename = "sync-progress")]
    SyncProgress { remaining: usize },
    #[serde(rename = "sync-complete")]
    SyncComplete,
}

impl ClientMessage {
    /// JSON form posted to the page.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Receiving end held by one application instance.
pub type ClientReceiver = mpsc::UnboundedReceiver<ClientMessage>;

// ── Directory ───────────────────────────────────────────────

/// Description of a connecting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: String,
    pub url: String,
    /// Whether this worker controls the client.
    pub controlled: bool,
}

#[derive(Debug)]
struct ClientSlot {
    info: ClientInfo,
    sender: mpsc::UnboundedSender<ClientMessage>,
}

/// Registry of active client connections.
#[derive(Debug, Default)]
pub struct ClientDirectory {
    clients: Mutex<BTreeMap<String, ClientSlot>>,
}

impl ClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. Reconnecting with the same id replaces the old
    /// channel.
    pub fn connect(&self, info: ClientInfo) -> ClientReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        log::debug!("[sw:clients] connect {} ({})", info.id, info.url);
        self.clients
            .lock()
            .insert(info.id.clone(), ClientSlot { info, sender });
        receiver
    }

    pub fn disconnect(&self, id: &str) -> bool {
        self.clients.lock().remove(id).is_some()
    }

    /// Take control of every connected client.
    pub fn claim(&self) -> usize {
        let mut clients = self.clients.lock();
        for slot in clients.values_mut() {
            slot.info.controlled = true;
        }
        clients.len()
    }

    pub fn match_all(&self, include_uncontrolled: bool) -> Vec<ClientInfo> {
        self.clients
            .lock()
            .values()
            .filter(|slot| include_uncontrolled || slot.info.controlled)
            .map(|slot| slot.info.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver to every client, controlled or not. Clients whose receiver is
    /// gone are pruned. Returns the number of deliveries.
    pub fn broadcast(&self, message: &ClientMessage) -> usize {
        let mut clients = self.clients.lock();
        let mut delivered = 0;
        clients.retain(|id, slot| match slot.sender.send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                log::debug!("[sw:clients] pruning closed client {}", id);
                false
            }
        });
        delivered
    }
}

// ── Tests ───────────────────────────────────────────────────

//! Broadcasting worker events to connected clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use metrics::gauge;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::messages::WorkerMessage;

pub(crate) const METRIC_CLIENTS: &str = "offline_cache_clients";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("client {0} disconnected")]
    Disconnected(Uuid),
}

/// A recipient of worker messages.
pub trait Client: Send + Sync {
    fn id(&self) -> Uuid;
    fn post_message(&self, message: &WorkerMessage) -> Result<(), DeliveryError>;
}

/// Client backed by an unbounded channel, drained by its connection task.
pub struct ChannelClient {
    id: Uuid,
    sender: mpsc::UnboundedSender<WorkerMessage>,
}

impl ChannelClient {
    pub fn new(sender: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
        }
    }
}

impl Client for ChannelClient {
    fn id(&self) -> Uuid {
        self.id
    }

    fn post_message(&self, message: &WorkerMessage) -> Result<(), DeliveryError> {
        self.sender
            .send(message.clone())
            .map_err(|_| DeliveryError::Disconnected(self.id))
    }
}

/// Registry of connected clients.
#[derive(Default)]
pub struct ClientNotifier {
    clients: DashMap<Uuid, Arc<dyn Client>>,
    claimed: AtomicBool,
}

impl ClientNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel client and return its id and receiving end.
    pub fn connect(&self) -> (Uuid, mpsc::UnboundedReceiver<WorkerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let client = Arc::new(ChannelClient::new(sender));
        let id = client.id();
        self.register(client);
        (id, receiver)
    }

    pub fn register(&self, client: Arc<dyn Client>) {
        debug!(client = %client.id(), "client connected");
        self.clients.insert(client.id(), client);
        self.record_len();
    }

    pub fn disconnect(&self, id: Uuid) -> bool {
        let removed = self.clients.remove(&id).is_some();
        if removed {
            debug!(client = %id, "client disconnected");
            self.record_len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Deliver to every client. Returns how many received the message.
    ///
    /// Failing clients are logged and dropped; the rest still receive it.
    pub fn broadcast(&self, message: &WorkerMessage) -> usize {
        if self.clients.is_empty() {
            debug!(kind = message.kind(), "no clients to notify");
            return 0;
        }

        let recipients: Vec<Arc<dyn Client>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut delivered = 0;
        for client in recipients {
            match client.post_message(message) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(client = %client.id(), kind = message.kind(), error = %err, "dropping unreachable client");
                    self.clients.remove(&client.id());
                    self.record_len();
                }
            }
        }
        debug!(kind = message.kind(), delivered, "broadcast message");
        delivered
    }

    /// Take control of every connected client.
    pub fn claim(&self) -> usize {
        self.claimed.store(true, Ordering::Release);
        let count = self.clients.len();
        info!(clients = count, "claimed clients");
        count
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    fn record_len(&self) {
        gauge!(METRIC_CLIENTS).set(self.clients.len() as f64);
    }
}

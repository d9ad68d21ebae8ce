//! Client hub - routes outbound messages to connected sockets

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::ids::{ActorId, IdAllocator, ObserverId};
use crate::game::session::Transport;

use super::protocol::ServerMsg;

/// Per-connection outbound queue depth
pub const CLIENT_QUEUE_DEPTH: usize = 128;

/// Outbound half of one game connection
#[derive(Debug, Clone)]
pub struct ClientLink {
    /// Distinguishes this socket from any later holder of the same actor id
    pub conn_id: Uuid,
    pub tx: mpsc::Sender<ServerMsg>,
    /// Signalled when the server closes the connection
    pub closed: Arc<Notify>,
}

impl ClientLink {
    /// A link plus the receiver its writer task drains
    pub fn channel() -> (Self, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
        let link = Self {
            conn_id: Uuid::new_v4(),
            tx,
            closed: Arc::new(Notify::new()),
        };
        (link, rx)
    }
}

/// Connected game pages and stats pages
pub struct ClientHub {
    clients: DashMap<ActorId, ClientLink>,
    observers: DashMap<ObserverId, mpsc::Sender<ServerMsg>>,
    observer_ids: Mutex<IdAllocator<ObserverId>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            observers: DashMap::new(),
            observer_ids: Mutex::new(IdAllocator::new()),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Register a stats page and hand back its id and receiver
    pub fn add_observer(&self) -> (ObserverId, mpsc::Receiver<ServerMsg>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
        let id = self.observer_ids.lock().allocate();
        self.observers.insert(id, tx);
        (id, rx)
    }

    pub fn remove_observer(&self, id: ObserverId) {
        if self.observers.remove(&id).is_some() {
            if let Err(e) = self.observer_ids.lock().release(id) {
                warn!(observer_id = %id, error = %e, "Observer id release failed");
            }
        }
    }

    fn deliver(tx: &mpsc::Sender<ServerMsg>, msg: ServerMsg) -> bool {
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Client queue full, dropping message");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ClientHub {
    fn attach(&self, actor_id: ActorId, link: ClientLink) {
        if let Some(old) = self.clients.insert(actor_id, link) {
            warn!(actor_id = %actor_id, "Replaced a live client link");
            old.closed.notify_one();
        }
    }

    fn detach(&self, actor_id: ActorId) {
        if let Some((_, link)) = self.clients.remove(&actor_id) {
            link.closed.notify_one();
        }
    }

    fn send(&self, to: ActorId, msg: ServerMsg) {
        let delivered = match self.clients.get(&to) {
            Some(link) => Self::deliver(&link.tx, msg),
            None => return,
        };
        if !delivered {
            debug!(actor_id = %to, "Client queue closed");
        }
    }

    fn send_observer(&self, to: ObserverId, msg: ServerMsg) {
        if let Some(tx) = self.observers.get(&to) {
            Self::deliver(&tx, msg);
        }
    }

    fn broadcast_observers(&self, msg: ServerMsg) {
        for entry in self.observers.iter() {
            Self::deliver(entry.value(), msg.clone());
        }
    }
}

//! Connection bookkeeping for UDP peers
//!
//! Tracks who is connected from which address, when we last heard from them,
//! and the last reliable request each client made together with our reply.
//! Room-management messages are retried by clients until answered, so a
//! duplicate request id is answered from this cache instead of running the
//! request a second time.

use log::info;
use shared::{Packet, PlayerId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct Client {
    pub id: PlayerId,
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Most recent reliable request id and the reply we sent for it
    last_reply: Option<(u32, Packet)>,
}

impl Client {
    /// Fresh session, seen just now
    pub fn new(id: PlayerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            last_reply: None,
        }
    }

    /// Marks the client as heard from
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// True once nothing has arrived for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Connected clients keyed by id, with capacity and timeout policy
pub struct ClientManager {
    clients: HashMap<PlayerId, Client>,
    next_client_id: PlayerId,
    max_clients: usize,
    timeout: Duration,
}

impl ClientManager {
    /// Creates a manager with the default client timeout
    pub fn new(max_clients: usize) -> Self {
        Self::with_timeout(max_clients, DEFAULT_CLIENT_TIMEOUT)
    }

    /// Creates a manager that drops clients silent for longer than `timeout`
    pub fn with_timeout(max_clients: usize, timeout: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
            timeout,
        }
    }

    /// Returns `Some(client_id)` if accepted, `None` if the server is full
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<PlayerId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Removes a client and its cached reply.
    ///
    /// Returns false if the client was not connected.
    pub fn remove_client(&mut self, client_id: &PlayerId) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    /// Finds the client id for a socket address
    ///
    /// Used to associate incoming packets with existing client connections.
    /// Returns None if no client is connected from the given address.
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<PlayerId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Address replies and snapshots for `client_id` are sent to
    pub fn addr_of(&self, client_id: PlayerId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|c| c.addr)
    }

    /// Marks the client as alive; returns false for unknown ids
    pub fn touch(&mut self, client_id: PlayerId) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.touch();
                true
            }
            None => false,
        }
    }

    /// The reply already sent for `request_id`, if it was the client's last request
    pub fn cached_reply(&self, client_id: PlayerId, request_id: u32) -> Option<&Packet> {
        self.clients
            .get(&client_id)
            .and_then(|c| c.last_reply.as_ref())
            .filter(|(id, _)| *id == request_id)
            .map(|(_, reply)| reply)
    }

    /// Stores the reply to `request_id`, replacing the previous one.
    ///
    /// Only the latest request is kept: clients send one reliable request at a time.
    pub fn remember_reply(&mut self, client_id: PlayerId, request_id: u32, reply: Packet) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_reply = Some((request_id, reply));
        }
    }

    /// Removes and returns clients silent for longer than the timeout
    pub fn check_timeouts(&mut self) -> Vec<PlayerId> {
        let timeout = self.timeout;
        let timed_out: Vec<PlayerId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            info!("Client {} timed out", client_id);
            self.remove_client(client_id);
        }

        timed_out
    }

    /// Addresses for the given ids, skipping any that are gone
    pub fn addrs_for(&self, client_ids: &[PlayerId]) -> Vec<(PlayerId, SocketAddr)> {
        client_ids
            .iter()
            .filter_map(|id| self.clients.get(id).map(|c| (*id, c.addr)))
            .collect()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

//! Server network layer: UDP I/O tasks and the fixed-rate room tick loop

use crate::client_manager::{ClientManager, DEFAULT_CLIENT_TIMEOUT};
use crate::error::RoomError;
use crate::room_manager::{RoomBroadcast, RoomDeparture, RoomManager};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{ControlInput, Packet, PlayerId, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { client_id: PlayerId },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    SendToClients {
        packet: Packet,
        client_ids: Vec<PlayerId>,
    },
}

/// Stops a running [`Server`] from another task
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ShutdownHandle {
    /// Asks the main loop to exit after the message it is handling
    pub fn shutdown(&self) {
        let _ = self.server_tx.send(ServerMessage::Shutdown);
    }
}

/// Authoritative relay: owns every room and drives them at a fixed rate
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    rooms: RoomManager,
    tick_duration: Duration,
    ticks: u64,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    /// Binds the UDP socket with the default client timeout.
    ///
    /// `tick_duration` is both the tick period and the fixed step handed to every room.
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_client_timeout(addr, tick_duration, max_clients, DEFAULT_CLIENT_TIMEOUT).await
    }

    /// Binds the UDP socket and prepares the task channels
    pub async fn with_client_timeout(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        client_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::with_timeout(
                max_clients,
                client_timeout,
            ))),
            rooms: RoomManager::new(),
            tick_duration,
            ticks: 0,
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    /// Address actually bound, useful when binding to port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle that stops [`Server::run`] from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    GameMessage::SendToClients { packet, client_ids } => {
                        let targets = {
                            let clients_guard = clients.read().await;
                            clients_guard.addrs_for(&client_ids)
                        };

                        // Serialize once for the whole room.
                        let data = match serialize(&packet) {
                            Ok(data) => data,
                            Err(e) => {
                                error!("Failed to serialize packet: {}", e);
                                continue;
                            }
                        };

                        for (client_id, addr) in targets {
                            if let Err(e) = socket.send_to(&data, addr).await {
                                error!("Failed to send to client {}: {}", client_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts()
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn send_to_clients(&self, packet: Packet, client_ids: Vec<PlayerId>) {
        if client_ids.is_empty() {
            return;
        }
        if let Err(e) = self
            .game_tx
            .send(GameMessage::SendToClients { packet, client_ids })
        {
            error!("Failed to queue room packet: {}", e);
        }
    }

    /// Processes one datagram from `addr`
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        let client_id = {
            let mut clients = self.clients.write().await;
            let id = clients.find_client_by_addr(addr);
            if let Some(id) = id {
                clients.touch(id);
            }
            id
        };

        match packet {
            Packet::Connect { client_version } => {
                self.handle_connect(client_version, client_id, addr).await;
            }

            Packet::Input {
                sequence,
                steer,
                gas,
                brake,
            } => {
                if let Some(client_id) = client_id {
                    let input = ControlInput { steer, gas, brake };
                    self.rooms.submit_input(client_id, sequence, input);
                }
            }

            Packet::Disconnect => {
                if let Some(client_id) = client_id {
                    self.clients.write().await.remove_client(&client_id);
                    self.drop_from_room(client_id);
                }
            }

            request @ (Packet::CreateRoom { .. }
            | Packet::JoinRoom { .. }
            | Packet::ListRooms { .. }
            | Packet::LeaveRoom { .. }
            | Packet::UpdateRules { .. }) => match client_id {
                Some(client_id) => self.handle_request(client_id, request, addr).await,
                None => {
                    warn!("Room request from unconnected address {}", addr);
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Not connected".to_string(),
                        },
                        addr,
                    );
                }
            },

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    async fn handle_connect(
        &mut self,
        client_version: u32,
        existing: Option<PlayerId>,
        addr: SocketAddr,
    ) {
        info!(
            "Client connecting from {} (version: {})",
            addr, client_version
        );

        if client_version != PROTOCOL_VERSION {
            self.send_packet(
                Packet::Disconnected {
                    reason: "Protocol version mismatch".to_string(),
                },
                addr,
            );
            return;
        }

        // Connect is retried by clients, so a known address gets its id again.
        let client_id = match existing {
            Some(id) => Some(id),
            None => self.clients.write().await.add_client(addr),
        };

        let response = match client_id {
            Some(client_id) => Packet::Connected { client_id },
            None => Packet::Disconnected {
                reason: "Server full".to_string(),
            },
        };
        self.send_packet(response, addr);
    }

    /// Runs a reliable room request once, answering retries from the reply cache
    async fn handle_request(&mut self, client_id: PlayerId, request: Packet, addr: SocketAddr) {
        let Some(request_id) = request.request_id() else {
            return;
        };

        let cached = {
            let clients = self.clients.read().await;
            clients.cached_reply(client_id, request_id).cloned()
        };
        if let Some(reply) = cached {
            debug!("Replaying reply to request {} from client {}", request_id, client_id);
            self.send_packet(reply, addr);
            return;
        }

        let reply = match self.execute_request(client_id, request) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Request {} from client {} rejected: {}", request_id, client_id, e);
                Packet::RequestFailed {
                    request_id,
                    error: e.to_string(),
                }
            }
        };

        self.clients
            .write()
            .await
            .remember_reply(client_id, request_id, reply.clone());
        self.send_packet(reply, addr);
    }

    fn execute_request(&mut self, client_id: PlayerId, request: Packet) -> Result<Packet, RoomError> {
        match request {
            Packet::CreateRoom { request_id, rules } => {
                let join = self.rooms.create_room(client_id, rules);
                if let Some(departure) = join.left {
                    self.announce_departure(client_id, departure);
                }
                Ok(Packet::RoomCreated {
                    request_id,
                    room_id: join.room_id,
                    seed: join.seed,
                })
            }
            Packet::JoinRoom {
                request_id,
                room_id,
            } => {
                let join = self.rooms.join_room(client_id, &room_id)?;
                if let Some(departure) = join.left {
                    self.announce_departure(client_id, departure);
                }
                Ok(Packet::RoomJoined {
                    request_id,
                    room_id: join.room_id,
                    seed: join.seed,
                    rules: join.rules,
                })
            }
            Packet::ListRooms { request_id } => Ok(Packet::RoomList {
                request_id,
                rooms: self.rooms.list_rooms(),
            }),
            Packet::LeaveRoom { request_id } => {
                let departure = self.rooms.leave(client_id)?;
                self.announce_departure(client_id, departure);
                Ok(Packet::RoomLeft { request_id })
            }
            Packet::UpdateRules { request_id, rules } => {
                let (rules, members) = self.rooms.update_rules(client_id, rules)?;
                self.send_to_clients(Packet::RulesChanged { rules }, members);
                Ok(Packet::RulesUpdated { request_id, rules })
            }
            _ => Err(RoomError::NotInRoom),
        }
    }

    /// Removes a player from whatever room they are in and tells the others
    fn drop_from_room(&mut self, client_id: PlayerId) {
        if let Ok(departure) = self.rooms.leave(client_id) {
            self.announce_departure(client_id, departure);
        }
    }

    fn announce_departure(&self, client_id: PlayerId, departure: RoomDeparture) {
        self.send_to_clients(
            Packet::PlayerLeft {
                player_id: client_id,
            },
            departure.remaining,
        );
    }

    fn tick_rooms(&mut self, dt: f64) {
        for RoomBroadcast { recipients, packet } in self.rooms.tick_all(dt) {
            self.send_to_clients(packet, recipients);
        }
        self.ticks += 1;
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let dt = self.tick_duration.as_secs_f64();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            self.drop_from_room(client_id);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick_rooms(dt);

                    if self.ticks % 60 == 0 {
                        let client_count = {
                            let clients = self.clients.read().await;
                            clients.len()
                        };

                        if client_count > 0 {
                            debug!("Tick {}: {} clients, {} rooms",
                                   self.ticks, client_count, self.rooms.len());
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

/// Unit tests for packet handling in the server main loop
///
/// Drive `handle_packet` directly and read what it queued for the sender task.
#[cfg(test)]
mod tests {
    use super::*;
    use shared::RoomRules;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::time::timeout;

    async fn test_server() -> Server {
        Server::new("127.0.0.1:0", Duration::from_millis(16), 8)
            .await
            .unwrap()
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn next_outgoing(server: &mut Server) -> GameMessage {
        server.game_rx.as_mut().unwrap().try_recv().unwrap()
    }

    async fn connect(server: &mut Server, port: u16) -> PlayerId {
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(port),
            )
            .await;
        match next_outgoing(server) {
            GameMessage::SendPacket {
                packet: Packet::Connected { client_id },
                ..
            } => client_id,
            other => panic!("Unexpected message {:?}", other),
        }
    }

    fn expect_reply(message: GameMessage) -> Packet {
        match message {
            GameMessage::SendPacket { packet, .. } => packet,
            other => panic!("Expected direct reply, got {:?}", other),
        }
    }

    #[test]
    fn test_channel_communication() {
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
        let packet = Packet::Connect { client_version: 1 };

        assert!(tx
            .send(ServerMessage::PacketReceived {
                packet,
                addr: addr(8080),
            })
            .is_ok());

        match rx.try_recv().unwrap() {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr(8080));
                assert_eq!(p, Packet::Connect { client_version: 1 });
            }
            _ => panic!("Unexpected message type"),
        }
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_per_address() {
        let mut server = test_server().await;
        let first = connect(&mut server, 4000).await;
        let again = connect(&mut server, 4000).await;
        let other = connect(&mut server, 4001).await;

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(server.clients.read().await.len(), 2);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let mut server = test_server().await;
        server
            .handle_packet(Packet::Connect { client_version: 999 }, addr(4000))
            .await;
        match expect_reply(next_outgoing(&mut server)) {
            Packet::Disconnected { reason } => assert_eq!(reason, "Protocol version mismatch"),
            other => panic!("Unexpected reply {:?}", other),
        }
        assert!(server.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_request_is_not_reexecuted() {
        let mut server = test_server().await;
        connect(&mut server, 4000).await;

        let request = Packet::CreateRoom {
            request_id: 1,
            rules: RoomRules::default(),
        };
        server.handle_packet(request.clone(), addr(4000)).await;
        let first = expect_reply(next_outgoing(&mut server));
        server.handle_packet(request, addr(4000)).await;
        let second = expect_reply(next_outgoing(&mut server));

        assert_eq!(first, second);
        assert_eq!(server.rooms.len(), 1);
    }

    #[tokio::test]
    async fn test_join_unknown_room_fails() {
        let mut server = test_server().await;
        connect(&mut server, 4000).await;

        server
            .handle_packet(
                Packet::JoinRoom {
                    request_id: 3,
                    room_id: "NOPE1".to_string(),
                },
                addr(4000),
            )
            .await;

        match expect_reply(next_outgoing(&mut server)) {
            Packet::RequestFailed { request_id, error } => {
                assert_eq!(request_id, 3);
                assert!(error.contains("NOPE1"));
            }
            other => panic!("Unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_from_unknown_address() {
        let mut server = test_server().await;
        server
            .handle_packet(Packet::ListRooms { request_id: 1 }, addr(4555))
            .await;
        match expect_reply(next_outgoing(&mut server)) {
            Packet::Disconnected { .. } => {}
            other => panic!("Unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_members() {
        let mut server = test_server().await;
        let host = connect(&mut server, 4000).await;
        let guest = connect(&mut server, 4001).await;

        server
            .handle_packet(
                Packet::CreateRoom {
                    request_id: 1,
                    rules: RoomRules::default(),
                },
                addr(4000),
            )
            .await;
        let room_id = match expect_reply(next_outgoing(&mut server)) {
            Packet::RoomCreated { room_id, .. } => room_id,
            other => panic!("Unexpected reply {:?}", other),
        };

        server
            .handle_packet(
                Packet::JoinRoom {
                    request_id: 1,
                    room_id,
                },
                addr(4001),
            )
            .await;
        next_outgoing(&mut server);

        server.handle_packet(Packet::Disconnect, addr(4000)).await;
        match next_outgoing(&mut server) {
            GameMessage::SendToClients { packet, client_ids } => {
                assert_eq!(packet, Packet::PlayerLeft { player_id: host });
                assert_eq!(client_ids, vec![guest]);
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_creating_a_room_announces_leaving_the_old_one() {
        let mut server = test_server().await;
        let host = connect(&mut server, 4000).await;
        let guest = connect(&mut server, 4001).await;

        server
            .handle_packet(
                Packet::CreateRoom {
                    request_id: 1,
                    rules: RoomRules::default(),
                },
                addr(4000),
            )
            .await;
        let room_id = match expect_reply(next_outgoing(&mut server)) {
            Packet::RoomCreated { room_id, .. } => room_id,
            other => panic!("Unexpected reply {:?}", other),
        };
        server
            .handle_packet(
                Packet::JoinRoom {
                    request_id: 1,
                    room_id,
                },
                addr(4001),
            )
            .await;
        next_outgoing(&mut server);

        server
            .handle_packet(
                Packet::CreateRoom {
                    request_id: 2,
                    rules: RoomRules::default(),
                },
                addr(4001),
            )
            .await;
        match next_outgoing(&mut server) {
            GameMessage::SendToClients { packet, client_ids } => {
                assert_eq!(packet, Packet::PlayerLeft { player_id: guest });
                assert_eq!(client_ids, vec![host]);
            }
            other => panic!("Unexpected message {:?}", other),
        }
        assert!(matches!(
            expect_reply(next_outgoing(&mut server)),
            Packet::RoomCreated { request_id: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_tick_sends_snapshot_to_members() {
        let mut server = test_server().await;
        let host = connect(&mut server, 4000).await;
        server
            .handle_packet(
                Packet::CreateRoom {
                    request_id: 1,
                    rules: RoomRules::default(),
                },
                addr(4000),
            )
            .await;
        next_outgoing(&mut server);

        server.tick_rooms(1.0 / 60.0);
        match next_outgoing(&mut server) {
            GameMessage::SendToClients {
                packet: Packet::Snapshot { tick, players, .. },
                client_ids,
            } => {
                assert_eq!(tick, 1);
                assert_eq!(players.len(), 1);
                assert_eq!(client_ids, vec![host]);
            }
            other => panic!("Unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_handle_stops_run() {
        let mut server = test_server().await;
        let handle = server.shutdown_handle();
        handle.shutdown();
        let result = timeout(Duration::from_secs(2), server.run()).await;
        assert!(result.is_ok());
    }
}

use crate::input::{Autopilot, InputManager, SteeringConfig};
use crate::reconciler::ClientReconciler;
use crate::rendering::PoseSink;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    Packet, PlayerId, RoomRules, RoomSummary, TrackQuery, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Unanswered connects and room requests are resent this often
pub const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// What the client does once connected
#[derive(Debug, Clone, PartialEq)]
pub enum SessionGoal {
    Create(RoomRules),
    Join(String),
    List,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    pub goal: SessionGoal,
    pub fake_ping_ms: u64,
    /// Stop after this long; `None` runs until Ctrl-C
    pub duration: Option<Duration>,
    pub steering: SteeringConfig,
    pub autopilot: Autopilot,
}

impl ClientConfig {
    /// Config with no latency simulation, no time limit and default driving
    pub fn new(server: &str, goal: SessionGoal) -> Self {
        Self {
            server: server.to_string(),
            goal,
            fake_ping_ms: 0,
            duration: None,
            steering: SteeringConfig::default(),
            autopilot: Autopilot::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomSession {
    pub room_id: String,
    pub seed: u32,
}

struct PendingRequest {
    request_id: u32,
    packet: Packet,
    last_sent: Instant,
}

/// Headless participant: one UDP socket, one session goal, one room at a time
pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    client_id: Option<PlayerId>,
    connected: bool,
    finished: bool,

    goal: SessionGoal,
    room: Option<RoomSession>,
    room_list: Option<Vec<RoomSummary>>,
    pending: Option<PendingRequest>,
    next_request_id: u32,
    snapshots_received: u64,

    reconciler: ClientReconciler,
    input_manager: InputManager,
    autopilot: Autopilot,
    sink: Box<dyn PoseSink + Send + Sync>,

    fake_ping_ms: u64,
    duration: Option<Duration>,
}

impl Client {
    /// Binds an ephemeral socket and parses the server address.
    ///
    /// Nothing is sent until [`Client::run`].
    pub async fn new(
        config: ClientConfig,
        sink: Box<dyn PoseSink + Send + Sync>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = config.server.parse()?;

        Ok(Client {
            socket,
            server_addr,
            client_id: None,
            connected: false,
            finished: false,
            goal: config.goal,
            room: None,
            room_list: None,
            pending: None,
            next_request_id: 1,
            snapshots_received: 0,
            reconciler: ClientReconciler::default(),
            input_manager: InputManager::new(config.steering),
            autopilot: config.autopilot,
            sink,
            fake_ping_ms: config.fake_ping_ms,
            duration: config.duration,
        })
    }

    /// Id assigned by the server once connected
    pub fn client_id(&self) -> Option<PlayerId> {
        self.client_id
    }

    /// The room joined or created, if any
    pub fn room(&self) -> Option<&RoomSession> {
        self.room.as_ref()
    }

    /// Rooms reported by the server for a list session
    pub fn room_list(&self) -> Option<&[RoomSummary]> {
        self.room_list.as_deref()
    }

    pub fn reconciler(&self) -> &ClientReconciler {
        &self.reconciler
    }

    /// Snapshots applied so far; out-of-order ones are not counted
    pub fn snapshots_received(&self) -> u64 {
        self.snapshots_received
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Sends a room request and keeps resending it until its reply arrives
    async fn request(&mut self, make: impl FnOnce(u32) -> Packet) -> Result<(), Box<dyn std::error::Error>> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let packet = make(request_id);
        self.send_packet(&packet).await?;
        self.pending = Some(PendingRequest {
            request_id,
            packet,
            last_sent: Instant::now(),
        });
        Ok(())
    }

    async fn retry_pending(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            info!("Connecting to server...");
            return self
                .send_packet(&Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                })
                .await;
        }

        let due = match &self.pending {
            Some(pending) if pending.last_sent.elapsed() >= RETRY_INTERVAL => {
                debug!("Resending request {}", pending.request_id);
                Some(pending.packet.clone())
            }
            _ => None,
        };

        if let Some(packet) = due {
            self.send_packet(&packet).await?;
            if let Some(pending) = self.pending.as_mut() {
                pending.last_sent = Instant::now();
            }
        }
        Ok(())
    }

    async fn start_goal(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        match self.goal.clone() {
            SessionGoal::Create(rules) => {
                self.request(|request_id| Packet::CreateRoom { request_id, rules })
                    .await
            }
            SessionGoal::Join(room_id) => {
                self.request(|request_id| Packet::JoinRoom {
                    request_id,
                    room_id,
                })
                .await
            }
            SessionGoal::List => self.request(|request_id| Packet::ListRooms { request_id }).await,
        }
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(request_id) = packet.request_id() {
            let expected = self.pending.as_ref().map(|p| p.request_id);
            if expected != Some(request_id) {
                debug!("Ignoring reply to stale request {}", request_id);
                return Ok(());
            }
            self.pending = None;
        }

        match packet {
            Packet::Connected { client_id } => {
                if self.connected {
                    return Ok(());
                }
                info!("Connected! Client ID: {}", client_id);
                self.client_id = Some(client_id);
                self.connected = true;
                self.reconciler.set_local_player(client_id);
                self.start_goal().await?;
            }

            Packet::RoomCreated { room_id, seed, .. } => {
                let rules = match &self.goal {
                    SessionGoal::Create(rules) => rules.sanitized(),
                    _ => RoomRules::default(),
                };
                info!("Created room {} (seed {})", room_id, seed);
                self.enter_room(room_id, seed, rules);
            }

            Packet::RoomJoined {
                room_id,
                seed,
                rules,
                ..
            } => {
                info!("Joined room {} (seed {})", room_id, seed);
                self.enter_room(room_id, seed, rules);
            }

            Packet::RoomList { rooms, .. } => {
                if rooms.is_empty() {
                    info!("No open rooms");
                }
                for room in &rooms {
                    info!("Room {}: {} players", room.room_id, room.player_count);
                }
                self.room_list = Some(rooms);
                self.finished = true;
            }

            Packet::RoomLeft { .. } => {
                self.room = None;
                self.reconciler.leave_room();
            }

            Packet::RulesUpdated { rules, .. } | Packet::RulesChanged { rules } => {
                info!(
                    "Rules: {:.0} km/h max, {:.0} km/h/s",
                    rules.max_speed, rules.accel
                );
                self.reconciler.set_rules(rules);
            }

            Packet::RequestFailed { error, .. } => {
                return Err(format!("Request failed: {}", error).into());
            }

            Packet::PlayerLeft { player_id } => {
                info!("Player {} left the room", player_id);
                self.reconciler.remove_player(player_id);
            }

            Packet::Snapshot {
                tick,
                rules,
                players,
            } => {
                if self.reconciler.apply_snapshot(tick, rules, players) {
                    self.snapshots_received += 1;
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.client_id = None;
                self.finished = true;
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }

        Ok(())
    }

    fn enter_room(&mut self, room_id: String, seed: u32, rules: RoomRules) {
        self.reconciler.enter_room(seed, rules);
        self.room = Some(RoomSession { room_id, seed });
    }

    async fn send_input(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected || self.room.is_none() {
            return Ok(());
        }

        let raw = match (self.reconciler.local_vehicle(), self.reconciler.window()) {
            (Some(vehicle), Some(window)) => {
                let road_heading = window
                    .locate(vehicle.distance)
                    .map(|frame| frame.road_heading)
                    .unwrap_or(vehicle.heading);
                self.autopilot
                    .drive(vehicle.lateral, vehicle.heading, road_heading, vehicle.speed_kmh)
            }
            _ => return Ok(()),
        };

        if let Some((sequence, input)) = self.input_manager.update(raw) {
            let packet = Packet::Input {
                sequence,
                steer: input.steer,
                gas: input.gas,
                brake: input.brake,
            };
            self.send_packet(&packet).await?;
        }

        Ok(())
    }

    /// Main client loop.
    ///
    /// Connects, pursues the session goal, then streams input and presents poses
    /// until the goal is done, the duration elapses or Ctrl-C arrives. A failed
    /// room request ends the loop with an error.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.retry_pending().await?;

        let mut retry_interval = interval(RETRY_INTERVAL);
        let mut input_interval = interval(Duration::from_millis(16));
        let mut render_interval = interval(Duration::from_millis(16));
        render_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let deadline = sleep(self.duration.unwrap_or(Duration::from_secs(86_400)));
        tokio::pin!(deadline);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut failure: Option<String> = None;

        while !self.finished {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => {
                                    if let Err(e) = self.handle_packet(packet).await {
                                        error!("{}", e);
                                        failure = Some(e.to_string());
                                        break;
                                    }
                                }
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = retry_interval.tick() => {
                    if let Err(e) = self.retry_pending().await {
                        error!("Error resending: {}", e);
                    }
                },

                _ = input_interval.tick() => {
                    if let Err(e) = self.send_input().await {
                        error!("Error sending input: {}", e);
                    }
                },

                _ = render_interval.tick() => {
                    self.reconciler.advance();
                    let poses = self.reconciler.poses();
                    self.sink.present(&poses);
                },

                _ = &mut deadline, if self.duration.is_some() => {
                    info!("Session time elapsed");
                    break;
                },

                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, leaving");
                    break;
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        match failure {
            Some(message) => Err(message.into()),
            None => Ok(()),
        }
    }
}

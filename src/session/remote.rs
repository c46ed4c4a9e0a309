//! Network session: newline-delimited JSON over TCP

use std::collections::BTreeMap;
use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::game::action::Action;
use crate::game::config::GameConfig;
use crate::game::state::{AgentId, AgentState, Position};
use crate::util::time::unix_millis;
use crate::wire::protocol::{encode_actions, ClientMsg, ServerMsg};

use super::{expect_phase, validate_actions, Session, SessionError, SessionPhase};

/// Session backed by a live engine connection
pub struct RemoteSession<T = TcpStream> {
    stream: BufReader<T>,
    config: GameConfig,
    phase: SessionPhase,
    session_id: Uuid,
    request_timeout: Duration,
    /// A request was abandoned between write and reply, so the stream is out of step
    in_flight: bool,
}

impl RemoteSession<TcpStream> {
    /// Connect to the engine, retrying while it boots
    pub async fn connect(
        addr: &str,
        config: GameConfig,
        settings: &Config,
    ) -> Result<Self, SessionError> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let remaining = settings.connect_timeout.saturating_sub(started.elapsed());
            let attempt = match timeout(remaining, TcpStream::connect(addr)).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connect attempt timed out",
                )),
            };

            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    info!(addr = %addr, attempts, "Connected to engine");
                    return Ok(Self::with_transport(
                        stream,
                        config,
                        settings.request_timeout,
                    ));
                }
                Err(e) if started.elapsed() + settings.connect_retry < settings.connect_timeout => {
                    debug!(
                        addr = %addr,
                        attempts,
                        error = %e,
                        "Engine not reachable yet, retrying"
                    );
                    sleep(settings.connect_retry).await;
                }
                Err(e) => {
                    return Err(SessionError::Connect {
                        addr: addr.to_string(),
                        waited: started.elapsed(),
                        source: e,
                    });
                }
            }
        }
    }
}

impl<T> RemoteSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-open transport
    pub fn with_transport(transport: T, config: GameConfig, request_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(transport),
            config,
            phase: SessionPhase::Created,
            session_id: Uuid::new_v4(),
            request_timeout,
            in_flight: false,
        }
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Measure one round trip to the engine
    pub async fn ping(&mut self) -> Result<Duration, SessionError> {
        if self.phase == SessionPhase::Closed {
            return Err(SessionError::InvalidState {
                op: "ping",
                phase: self.phase,
            });
        }

        let sent = Instant::now();
        let t = unix_millis();
        match self.request(&ClientMsg::Ping { t }).await? {
            ServerMsg::Pong { t: echoed } if echoed == t => Ok(sent.elapsed()),
            ServerMsg::Pong { t: echoed } => Err(SessionError::Protocol(format!(
                "pong echoed {} for ping {}",
                echoed, t
            ))),
            other => Err(unexpected("pong", &other)),
        }
    }

    /// Send one request and wait for its reply
    ///
    /// Any transport or decoding failure leaves the stream unusable, so the
    /// session is marked closed. The same holds when a previous request future
    /// was dropped before its reply was read.
    async fn request(&mut self, msg: &ClientMsg) -> Result<ServerMsg, SessionError> {
        let op = msg.kind();
        if self.in_flight {
            self.phase = SessionPhase::Closed;
            return Err(SessionError::Protocol(format!(
                "cannot send {}: an earlier request was abandoned before its reply",
                op
            )));
        }

        let after = self.request_timeout;
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');

        debug!(session_id = %self.session_id, op, bytes = line.len(), "Engine request");

        self.in_flight = true;
        let outcome = timeout(after, self.round_trip(&line)).await;
        self.in_flight = false;

        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                self.phase = SessionPhase::Closed;
                return Err(e);
            }
            Err(_) => {
                self.phase = SessionPhase::Closed;
                return Err(SessionError::Timeout { op, after });
            }
        };

        match reply {
            ServerMsg::Error { code, message } => {
                warn!(
                    session_id = %self.session_id,
                    op,
                    code = %code,
                    message = %message,
                    "Engine rejected request"
                );
                Err(SessionError::Engine { code, message })
            }
            other => Ok(other),
        }
    }

    async fn round_trip(&mut self, line: &str) -> Result<ServerMsg, SessionError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;

        let mut buf = String::new();
        if self.stream.read_line(&mut buf).await? == 0 {
            return Err(SessionError::Disconnected);
        }

        Ok(serde_json::from_str(buf.trim_end())?)
    }
}

fn unexpected(expected: &'static str, got: &ServerMsg) -> SessionError {
    SessionError::UnexpectedReply {
        expected,
        got: got.kind(),
    }
}

impl<T> Session for RemoteSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn config(&self) -> &GameConfig {
        &self.config
    }

    fn config_mut(&mut self) -> Result<&mut GameConfig, SessionError> {
        expect_phase(
            "configure",
            self.phase,
            &[SessionPhase::Created, SessionPhase::Ready, SessionPhase::Finished],
        )?;
        Ok(&mut self.config)
    }

    fn phase(&self) -> SessionPhase {
        self.phase
    }

    async fn init(&mut self) -> Result<(), SessionError> {
        expect_phase("init", self.phase, &[SessionPhase::Created])?;

        let msg = ClientMsg::Init {
            session_id: self.session_id,
            config: self.config.clone(),
        };
        match self.request(&msg).await? {
            ServerMsg::Ready {
                server_time,
                engine_version,
            } => {
                info!(
                    session_id = %self.session_id,
                    server_time,
                    engine_version = %engine_version,
                    agents = self.config.num_agents(),
                    "Session initialized"
                );
                self.phase = SessionPhase::Ready;
                Ok(())
            }
            other => Err(unexpected("ready", &other)),
        }
    }

    async fn new_episode(&mut self) -> Result<(), SessionError> {
        expect_phase(
            "new_episode",
            self.phase,
            &[SessionPhase::Ready, SessionPhase::Finished],
        )?;

        let msg = ClientMsg::NewEpisode {
            config: self.config.clone(),
        };
        match self.request(&msg).await? {
            ServerMsg::EpisodeStarted { episode } => {
                self.phase = SessionPhase::InEpisode;
                debug!(session_id = %self.session_id, episode, "Episode started");
                Ok(())
            }
            other => Err(unexpected("episode_started", &other)),
        }
    }

    async fn get_state_all(&mut self) -> Result<BTreeMap<AgentId, AgentState>, SessionError> {
        expect_phase(
            "get_state_all",
            self.phase,
            &[SessionPhase::InEpisode, SessionPhase::Finished],
        )?;

        let (observations, finished) = match self.request(&ClientMsg::GetStateAll).await? {
            ServerMsg::States { states, finished } => (states, finished),
            other => return Err(unexpected("states", &other)),
        };

        let mut states = BTreeMap::new();
        for observation in observations {
            if let Some(depth_map) = &observation.state.depth_map {
                if !depth_map.is_consistent() {
                    return Err(SessionError::Protocol(format!(
                        "depth map for agent {} has {} values, expected {}x{}",
                        observation.agent_id,
                        depth_map.data.len(),
                        depth_map.height,
                        depth_map.width
                    )));
                }
            }
            if states
                .insert(observation.agent_id, observation.state)
                .is_some()
            {
                return Err(SessionError::Protocol(format!(
                    "duplicate state for agent {}",
                    observation.agent_id
                )));
            }
        }

        if finished {
            self.phase = SessionPhase::Finished;
        }
        Ok(states)
    }

    async fn make_action(
        &mut self,
        actions: &BTreeMap<AgentId, Action>,
    ) -> Result<(), SessionError> {
        expect_phase("make_action", self.phase, &[SessionPhase::InEpisode])?;
        validate_actions(&self.config, actions)?;

        let msg = ClientMsg::MakeAction {
            actions: encode_actions(actions),
        };
        match self.request(&msg).await? {
            ServerMsg::Stepped {
                time_step,
                finished,
            } => {
                debug!(session_id = %self.session_id, time_step, finished, "Actions applied");
                if finished {
                    self.phase = SessionPhase::Finished;
                }
                Ok(())
            }
            other => Err(unexpected("stepped", &other)),
        }
    }

    fn abandon_episode(&mut self) {
        if self.phase == SessionPhase::InEpisode {
            self.phase = SessionPhase::Finished;
        }
    }

    async fn random_start_location(
        &mut self,
        agent_id: AgentId,
    ) -> Result<Position, SessionError> {
        expect_phase(
            "random_start_location",
            self.phase,
            &[SessionPhase::Ready, SessionPhase::Finished],
        )?;
        if agent_id as usize >= self.config.num_agents() {
            return Err(SessionError::UnknownAgent(agent_id));
        }

        match self
            .request(&ClientMsg::RandomStartLocation { agent_id })
            .await?
        {
            ServerMsg::StartLocation {
                agent_id: placed,
                location,
            } if placed == agent_id => {
                self.config
                    .set_agent_start_location(agent_id, location)
                    .map_err(|e| SessionError::Protocol(e.to_string()))?;
                debug!(
                    agent_id,
                    x = location.x,
                    y = location.y,
                    z = location.z,
                    "Random start location"
                );
                Ok(location)
            }
            ServerMsg::StartLocation { agent_id: placed, .. } => Err(SessionError::Protocol(
                format!("asked to place agent {}, engine placed {}", agent_id, placed),
            )),
            other => Err(unexpected("start_location", &other)),
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Closed {
            return Ok(());
        }

        let result = if self.in_flight {
            // The engine's reply to the abandoned request is still pending
            warn!(session_id = %self.session_id, "Dropping connection without close handshake");
            Ok(())
        } else {
            self.close_handshake().await
        };

        self.phase = SessionPhase::Closed;
        if let Err(e) = self.stream.get_mut().shutdown().await {
            debug!(session_id = %self.session_id, error = %e, "Transport shutdown failed");
        }
        info!(session_id = %self.session_id, "Session closed");
        result
    }
}

impl<T> RemoteSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    async fn close_handshake(&mut self) -> Result<(), SessionError> {
        match self.request(&ClientMsg::Close).await {
            Ok(ServerMsg::Closed) => Ok(()),
            Ok(other) => Err(unexpected("closed", &other)),
            Err(e) => Err(e),
        }
    }
}

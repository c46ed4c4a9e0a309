//! Episode loop: observe, decide, act until the engine ends the episode

use std::collections::BTreeMap;
use std::num::NonZeroU32;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::game::action::ActionError;
use crate::game::policy::Policy;
use crate::game::state::AgentId;
use crate::session::{Session, SessionError};
use crate::telemetry::{EpisodeReport, RunSummary, StepReport, StepStats};
use crate::util::rate_limit::StepLimiter;
use crate::util::time::Timer;

/// How many episodes to play and how to pace them
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub num_episodes: u32,
    /// Ask the engine for a fresh spawn point per agent before every episode
    pub random_start_location: bool,
    /// Base of the per-episode replay suffix
    pub replay_suffix: String,
    /// Stop an episode after this many steps even if the engine has not ended it
    pub max_steps: Option<u64>,
    pub max_step_rate: Option<NonZeroU32>,
    /// Log a step report for agent 0 every n steps
    pub log_every: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            num_episodes: 1,
            random_start_location: false,
            replay_suffix: String::new(),
            max_steps: None,
            max_step_rate: None,
            log_every: 1,
        }
    }
}

/// Episode loop errors
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Policy produced an invalid action for agent {agent_id}: {source}")]
    Policy {
        agent_id: AgentId,
        #[source]
        source: ActionError,
    },
}

/// Drives a session through a series of episodes
pub struct EpisodeRunner {
    options: RunOptions,
    limiter: Option<StepLimiter>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl EpisodeRunner {
    pub fn new(options: RunOptions) -> Self {
        let limiter = options.max_step_rate.map(StepLimiter::new);
        Self {
            options,
            limiter,
            shutdown: None,
        }
    }

    /// Stop at the next step boundary once the flag turns true
    ///
    /// The flag is only looked at between requests, so a request already
    /// sent always gets its reply read.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn stop_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Wait for the step limiter, giving up early on shutdown
    async fn pace(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        let Some(mut shutdown) = self.shutdown.clone() else {
            return limiter.wait().await;
        };

        tokio::select! {
            _ = limiter.wait() => {}
            Ok(_) = shutdown.wait_for(|stop| *stop) => {}
        }
    }

    /// Play every configured episode, appending one report per episode
    ///
    /// A shutdown request ends the run early with `summary.interrupted` set.
    pub async fn run<S, P>(
        &self,
        session: &mut S,
        policy: &mut P,
        summary: &mut RunSummary,
    ) -> Result<(), RunError>
    where
        S: Session,
        P: Policy + ?Sized,
    {
        if let Some(limiter) = &self.limiter {
            info!(steps_per_second = limiter.steps_per_second().get(), "Step pacing on");
        }

        for episode in 0..self.options.num_episodes {
            if self.stop_requested() {
                summary.interrupted = true;
                break;
            }

            let (report, interrupted) = self.play_episode(session, policy, episode).await?;
            summary.episodes.push(report);
            if interrupted {
                summary.interrupted = true;
                break;
            }
        }
        Ok(())
    }

    /// Play one episode until the engine ends it, the step cap or a shutdown
    ///
    /// The flag is true when the episode was cut short by a shutdown.
    async fn play_episode<S, P>(
        &self,
        session: &mut S,
        policy: &mut P,
        episode: u32,
    ) -> Result<(EpisodeReport, bool), RunError>
    where
        S: Session,
        P: Policy + ?Sized,
    {
        if self.options.random_start_location {
            let agents: Vec<AgentId> = session.config().agent_ids().collect();
            for agent_id in agents {
                session.random_start_location(agent_id).await?;
            }
        }

        let replay_suffix = format!("{}_episode_{}", self.options.replay_suffix, episode);
        session
            .config_mut()?
            .set_game_replay_suffix(replay_suffix.clone());

        let config_hash = session.config().fingerprint();
        let config_json = serde_json::to_string(session.config()).unwrap_or_default();
        info!(
            episode,
            replay_suffix = %replay_suffix,
            config_hash = %config_hash,
            config = %config_json,
            "Starting episode"
        );

        session.new_episode().await?;

        let space = session.config().available_actions.clone();
        let log_every = self.options.log_every.max(1);
        let mut stats = StepStats::default();
        let mut truncated = false;
        let mut interrupted = false;

        while !session.is_episode_finished() {
            if let Some(max_steps) = self.options.max_steps {
                if stats.steps >= max_steps {
                    warn!(episode, max_steps, "Step cap reached, abandoning episode");
                    session.abandon_episode();
                    truncated = true;
                    break;
                }
            }

            self.pace().await;
            if self.stop_requested() {
                info!(episode, steps = stats.steps, "Shutdown requested, abandoning episode");
                session.abandon_episode();
                truncated = true;
                interrupted = true;
                break;
            }

            let timer = Timer::new();
            let states = session.get_state_all().await?;
            if session.is_episode_finished() {
                break;
            }

            let mut actions = BTreeMap::new();
            for (&agent_id, state) in &states {
                let action = policy.act(state, &space);
                space
                    .check(&action)
                    .map_err(|source| RunError::Policy { agent_id, source })?;
                actions.insert(agent_id, action);
            }

            session.make_action(&actions).await?;

            let dt = timer.elapsed();
            stats.record(dt);

            if stats.steps % log_every == 0 {
                if let (Some(state), Some(action)) = (states.get(&0), actions.get(&0)) {
                    StepReport::new(episode, 0, state, &space, action, dt).log();
                }
            }
        }

        let report = EpisodeReport::new(episode, replay_suffix, config_hash, &stats, truncated);
        info!(
            episode,
            steps = report.steps,
            truncated,
            duration_ms = report.duration_ms,
            slowest_step_ms = report.slowest_step_ms,
            throughput = report.throughput,
            "Episode finished"
        );
        Ok((report, interrupted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::action::{Action, ActionSpace, ActionValue};
    use crate::game::config::GameConfig;
    use crate::game::policy::RandomPolicy;
    use std::time::Duration;

    use serde::Serialize;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio_test::io::Builder;
    use uuid::Uuid;

    use crate::game::state::{AgentState, Position};
    use crate::session::scripted::{Call, ScriptedSession};
    use crate::session::RemoteSession;
    use crate::wire::protocol::{AgentObservation, ClientMsg, ServerMsg};

    async fn ready_session(config: GameConfig, episode_len: u64) -> ScriptedSession {
        let mut session = ScriptedSession::new(config, episode_len);
        session.init().await.unwrap();
        session
    }

    fn options(num_episodes: u32) -> RunOptions {
        RunOptions {
            num_episodes,
            replay_suffix: "run".into(),
            ..RunOptions::default()
        }
    }

    #[tokio::test]
    async fn one_observation_and_one_submission_per_step() {
        let mut session = ready_session(GameConfig::default(), 5).await;
        let mut policy = RandomPolicy::new(1);
        let mut summary = RunSummary::start();

        EpisodeRunner::new(options(2))
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap();

        assert_eq!(session.count(|c| *c == Call::GetStateAll), 10);
        assert_eq!(session.count(|c| matches!(c, Call::MakeAction(_))), 10);
        assert_eq!(summary.episodes.len(), 2);
        assert_eq!(summary.total_steps(), 10);
        assert!(summary.episodes.iter().all(|e| !e.truncated));
    }

    #[tokio::test]
    async fn calls_follow_observe_then_act_order() {
        let mut session = ready_session(GameConfig::default(), 2).await;
        let mut policy = RandomPolicy::new(1);
        let mut summary = RunSummary::start();

        EpisodeRunner::new(options(1))
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap();

        let kinds: Vec<&str> = session
            .calls
            .iter()
            .map(|c| match c {
                Call::Init => "init",
                Call::NewEpisode { .. } => "new_episode",
                Call::GetStateAll => "get",
                Call::MakeAction(_) => "act",
                Call::RandomStartLocation(_) => "random_start",
                Call::Close => "close",
            })
            .collect();
        assert_eq!(kinds, ["init", "new_episode", "get", "act", "get", "act"]);
    }

    #[tokio::test]
    async fn replay_suffix_is_numbered_per_episode() {
        let mut session = ready_session(GameConfig::default(), 1).await;
        let mut policy = RandomPolicy::new(1);
        let mut summary = RunSummary::start();

        EpisodeRunner::new(options(3))
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap();

        let suffixes: Vec<String> = session
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::NewEpisode { replay_suffix } => Some(replay_suffix.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(suffixes, ["run_episode_0", "run_episode_1", "run_episode_2"]);
        assert_eq!(summary.episodes[2].replay_suffix, "run_episode_2");
    }

    #[tokio::test]
    async fn random_start_is_requested_for_every_agent_before_each_episode() {
        let mut config = GameConfig::default();
        config.add_agent();
        config.add_agent();
        let mut session = ready_session(config, 1).await;
        let mut policy = RandomPolicy::new(3);
        let mut summary = RunSummary::start();

        let runner = EpisodeRunner::new(RunOptions {
            random_start_location: true,
            ..options(2)
        });
        runner
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap();

        assert_eq!(
            session.count(|c| matches!(c, Call::RandomStartLocation(_))),
            6
        );
        assert_eq!(session.calls[1], Call::RandomStartLocation(0));
        assert_eq!(session.calls[3], Call::RandomStartLocation(2));
        assert!(matches!(session.calls[4], Call::NewEpisode { .. }));
        assert_eq!(session.config().agents[2].start_location.x, 20.0);
    }

    #[tokio::test]
    async fn every_agent_gets_an_action_each_step() {
        let mut config = GameConfig::default();
        config.add_agent();
        let mut session = ready_session(config, 3).await;
        let mut policy = RandomPolicy::new(9);
        let mut summary = RunSummary::start();

        EpisodeRunner::new(options(1))
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap();

        for call in &session.calls {
            if let Call::MakeAction(actions) = call {
                assert_eq!(actions.keys().copied().collect::<Vec<_>>(), [0, 1]);
            }
        }
    }

    #[tokio::test]
    async fn step_cap_truncates_and_next_episode_still_starts() {
        let mut session = ready_session(GameConfig::default(), 100).await;
        let mut policy = RandomPolicy::new(1);
        let mut summary = RunSummary::start();

        let runner = EpisodeRunner::new(RunOptions {
            max_steps: Some(4),
            ..options(2)
        });
        runner
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap();

        assert_eq!(session.count(|c| matches!(c, Call::MakeAction(_))), 8);
        assert_eq!(session.count(|c| matches!(c, Call::NewEpisode { .. })), 2);
        assert!(summary.episodes.iter().all(|e| e.truncated && e.steps == 4));
    }

    #[tokio::test]
    async fn episode_finished_at_start_submits_nothing() {
        let mut session = ready_session(GameConfig::default(), 0).await;
        let mut policy = RandomPolicy::new(1);
        let mut summary = RunSummary::start();

        EpisodeRunner::new(options(1))
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap();

        assert_eq!(session.count(|c| *c == Call::GetStateAll), 0);
        assert_eq!(session.count(|c| matches!(c, Call::MakeAction(_))), 0);
        assert_eq!(summary.episodes[0].steps, 0);
    }

    #[tokio::test]
    async fn session_failure_stops_the_run_and_keeps_finished_episodes() {
        let mut session = ready_session(GameConfig::default(), 2).await;
        session.fail_state_at = Some(3);
        let mut policy = RandomPolicy::new(1);
        let mut summary = RunSummary::start();

        let err = EpisodeRunner::new(options(3))
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Session(SessionError::Disconnected)));
        assert_eq!(summary.episodes.len(), 1);
        assert_eq!(session.count(|c| matches!(c, Call::MakeAction(_))), 3);
    }

    #[tokio::test]
    async fn invalid_policy_output_is_never_submitted() {
        let mut session = ready_session(GameConfig::default(), 3).await;
        let mut policy = |_: &AgentState, _: &ActionSpace| -> Action {
            Action::new(vec![ActionValue::Int(400)])
        };
        let mut summary = RunSummary::start();

        let err = EpisodeRunner::new(options(1))
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Policy { agent_id: 0, .. }));
        assert_eq!(session.count(|c| matches!(c, Call::MakeAction(_))), 0);
    }

    #[tokio::test]
    async fn boxed_policies_drive_the_loop() {
        let mut session = ready_session(GameConfig::default(), 2).await;
        let mut policy: Box<dyn Policy> = Box::new(RandomPolicy::new(5));
        let mut summary = RunSummary::start();

        EpisodeRunner::new(options(1))
            .run(&mut session, policy.as_mut(), &mut summary)
            .await
            .unwrap();

        assert_eq!(summary.total_steps(), 2);
    }

    fn wire_line<M: Serialize>(msg: &M) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(msg).unwrap();
        bytes.push(b'\n');
        bytes
    }

    fn states_reply(time_step: u64, finished: bool) -> ServerMsg {
        ServerMsg::States {
            states: vec![AgentObservation {
                agent_id: 0,
                state: AgentState {
                    game_state: 1,
                    time_step,
                    position: Position::new(0.0, 0.0, time_step as f64),
                    supply_states: vec![],
                    enemy_states: vec![],
                    depth_map: None,
                    health: 100.0,
                    num_supply: 0,
                },
            }],
            finished,
        }
    }

    /// Engine on the far end of an in-memory pipe that never ends an episode
    ///
    /// Raises the stop flag while handling the `stop_after`-th action and
    /// returns the request kinds it saw once the client hangs up.
    async fn serve_engine(
        io: DuplexStream,
        stop_after: u64,
        stop: watch::Sender<bool>,
    ) -> Vec<&'static str> {
        let (read, mut write) = tokio::io::split(io);
        let mut lines = BufReader::new(read).lines();
        let mut seen = Vec::new();
        let mut steps = 0;

        while let Some(raw) = lines.next_line().await.unwrap() {
            let msg: ClientMsg = serde_json::from_str(&raw).unwrap();
            seen.push(msg.kind());
            let reply = match msg {
                ClientMsg::Init { .. } => ServerMsg::Ready {
                    server_time: 0,
                    engine_version: String::new(),
                },
                ClientMsg::NewEpisode { .. } => ServerMsg::EpisodeStarted { episode: 0 },
                ClientMsg::GetStateAll => states_reply(steps, false),
                ClientMsg::MakeAction { .. } => {
                    steps += 1;
                    if steps == stop_after {
                        stop.send_replace(true);
                    }
                    ServerMsg::Stepped {
                        time_step: steps,
                        finished: false,
                    }
                }
                ClientMsg::Close => ServerMsg::Closed,
                other => ServerMsg::Error {
                    code: "unsupported".into(),
                    message: other.kind().into(),
                },
            };
            write.write_all(&wire_line(&reply)).await.unwrap();
        }
        seen
    }

    #[tokio::test]
    async fn finished_in_states_reply_stops_before_acting() {
        let mut session = ready_session(GameConfig::default(), 10).await;
        session.finish_on_state_at = Some(2);
        let mut policy = RandomPolicy::new(1);
        let mut summary = RunSummary::start();

        EpisodeRunner::new(options(1))
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap();

        assert_eq!(session.count(|c| *c == Call::GetStateAll), 3);
        assert_eq!(session.count(|c| matches!(c, Call::MakeAction(_))), 2);
        assert_eq!(session.calls.last(), Some(&Call::GetStateAll));
        assert_eq!(summary.episodes[0].steps, 2);
        assert!(!summary.episodes[0].truncated);
    }

    #[tokio::test]
    async fn finished_states_reply_sends_nothing_further_to_engine() {
        let config = GameConfig::default();
        let mut episode_config = config.clone();
        episode_config.set_game_replay_suffix("run_episode_0");

        // Any write beyond the scripted ones fails the mock
        let mock = Builder::new()
            .write(&wire_line(&ClientMsg::Init {
                session_id: Uuid::nil(),
                config: config.clone(),
            }))
            .read(&wire_line(&ServerMsg::Ready {
                server_time: 0,
                engine_version: String::new(),
            }))
            .write(&wire_line(&ClientMsg::NewEpisode {
                config: episode_config,
            }))
            .read(&wire_line(&ServerMsg::EpisodeStarted { episode: 0 }))
            .write(&wire_line(&ClientMsg::GetStateAll))
            .read(&wire_line(&states_reply(0, true)))
            .build();

        let mut session = RemoteSession::with_transport(mock, config, Duration::from_secs(5))
            .with_session_id(Uuid::nil());
        session.init().await.unwrap();

        let mut policy = RandomPolicy::new(1);
        let mut summary = RunSummary::start();
        EpisodeRunner::new(options(1))
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap();

        assert_eq!(summary.episodes[0].steps, 0);
        assert!(session.is_episode_finished());
    }

    #[tokio::test]
    async fn shutdown_stops_between_requests_and_close_is_clean() {
        let (client, server) = tokio::io::duplex(1 << 16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = tokio::spawn(serve_engine(server, 3, stop_tx));

        let mut session =
            RemoteSession::with_transport(client, GameConfig::default(), Duration::from_secs(5));
        session.init().await.unwrap();

        let mut policy = RandomPolicy::new(1);
        let mut summary = RunSummary::start();
        EpisodeRunner::new(options(2))
            .with_shutdown(stop_rx)
            .run(&mut session, &mut policy, &mut summary)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.episodes.len(), 1);
        assert_eq!(summary.episodes[0].steps, 3);
        assert!(summary.episodes[0].truncated);

        session.close().await.unwrap();
        drop(session);

        let seen = engine.await.unwrap();
        assert_eq!(seen.iter().filter(|k| **k == "make_action").count(), 3);
        assert_eq!(seen.last(), Some(&"close"));
    }

    #[tokio::test]
    async fn shutdown_interrupts_pacing() {
        let mut session = ready_session(GameConfig::default(), 100).await;
        let mut policy = RandomPolicy::new(1);
        let mut summary = RunSummary::start();
        let (stop_tx, stop_rx) = watch::channel(false);

        let runner = EpisodeRunner::new(RunOptions {
            max_step_rate: NonZeroU32::new(1),
            ..options(1)
        })
        .with_shutdown(stop_rx);

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop_tx.send_replace(true);
        };
        let (result, _) = tokio::time::timeout(
            Duration::from_millis(500),
            async { tokio::join!(runner.run(&mut session, &mut policy, &mut summary), stopper) },
        )
        .await
        .unwrap();
        result.unwrap();

        // One free step, then the one-per-second limiter is cut short
        assert_eq!(session.count(|c| matches!(c, Call::MakeAction(_))), 1);
        assert!(summary.interrupted);
    }
}

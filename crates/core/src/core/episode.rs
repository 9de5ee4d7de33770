//! Episode state machine over a remote stepping environment.
//!
//! `Idle -> Ready -> (Stepping) -> Ready | Done`; `Done` holds until a reset.
//! [`EpisodeController`] is the only place [`EpisodeStats`] change.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use lidarnav_protocol::env::{Action, Grid, StepResult};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{EpisodeError, TransportError};

/// Remote environment contract.
pub trait Environment: Send + Sync + 'static {
    fn reset(&self, source: ResetSource) -> impl Future<Output = Result<Grid, TransportError>> + Send;

    fn step(&self) -> impl Future<Output = Result<StepResult, TransportError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetSource {
    /// Fresh random grid.
    Random,
    /// Grid derived from the most recently built occupancy map.
    OccupancyMap,
}

impl ResetSource {
    pub fn name(self) -> &'static str {
        match self {
            ResetSource::Random => "random",
            ResetSource::OccupancyMap => "map",
        }
    }
}

/// Whether a reset keeps the completed-episode count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeTally {
    Keep,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodePhase {
    /// No environment loaded yet.
    #[default]
    Idle,
    Ready,
    /// A step request is in flight.
    Stepping,
    Done,
}

impl fmt::Display for EpisodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EpisodePhase::Idle => "idle",
            EpisodePhase::Ready => "ready",
            EpisodePhase::Stepping => "stepping",
            EpisodePhase::Done => "done",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EpisodeStats {
    steps: u64,
    total_reward: f64,
    episodes: u64,
    last_action: Action,
    done: bool,
}

impl EpisodeStats {
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn total_reward(&self) -> f64 {
        self.total_reward
    }

    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    pub fn last_action(&self) -> Action {
        self.last_action
    }

    pub fn done(&self) -> bool {
        self.done
    }

    fn start_episode(&mut self, tally: EpisodeTally) {
        let episodes = match tally {
            EpisodeTally::Keep => self.episodes,
            EpisodeTally::Clear => 0,
        };
        *self = EpisodeStats {
            episodes,
            ..EpisodeStats::default()
        };
    }
}

impl fmt::Display for EpisodeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "steps={} reward={:.2} episodes={} last={} done={}",
            self.steps, self.total_reward, self.episodes, self.last_action, self.done
        )
    }
}

/// One applied step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub action: Action,
    pub reward: f64,
    pub done: bool,
    /// Cumulative episode reward including this step.
    pub total_reward: f64,
    pub steps: u64,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.done {
            write!(f, "Episode finished. Final reward: {:.2}", self.total_reward)
        } else {
            write!(
                f,
                "Action: {} • Reward: {:.2} • Done: {}",
                self.action, self.reward, self.done
            )
        }
    }
}

pub type SharedController<E> = Arc<Mutex<EpisodeController<E>>>;

#[derive(Debug)]
pub struct EpisodeController<E> {
    env: E,
    phase: EpisodePhase,
    grid: Grid,
    stats: EpisodeStats,
}

impl<E: Environment> EpisodeController<E> {
    pub fn new(env: E) -> Self {
        Self {
            env,
            phase: EpisodePhase::Idle,
            grid: Grid::default(),
            stats: EpisodeStats::default(),
        }
    }

    pub fn into_shared(self) -> SharedController<E> {
        Arc::new(Mutex::new(self))
    }

    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == EpisodePhase::Done
    }

    pub fn stats(&self) -> &EpisodeStats {
        &self.stats
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    /// Loads a new environment from any phase.
    ///
    /// On failure nothing changes: grid, stats and phase stay as they were.
    pub async fn reset(&mut self, source: ResetSource, tally: EpisodeTally) -> Result<&Grid, EpisodeError> {
        let grid = self.env.reset(source).await?;

        self.grid = grid;
        self.stats.start_episode(tally);
        self.phase = EpisodePhase::Ready;
        info!(
            "Environment reset ({}): {}x{} grid, episodes={}",
            source.name(),
            self.grid.rows(),
            self.grid.cols(),
            self.stats.episodes
        );
        Ok(&self.grid)
    }

    pub async fn reset_random(&mut self, tally: EpisodeTally) -> Result<&Grid, EpisodeError> {
        self.reset(ResetSource::Random, tally).await
    }

    pub async fn reset_from_map(&mut self, tally: EpisodeTally) -> Result<&Grid, EpisodeError> {
        self.reset(ResetSource::OccupancyMap, tally).await
    }

    /// Issues one remote step. Only valid while `Ready`.
    ///
    /// A transport failure returns the controller to `Ready` with stats untouched.
    pub async fn step(&mut self) -> Result<StepOutcome, EpisodeError> {
        if self.phase != EpisodePhase::Ready {
            return Err(EpisodeError::InvalidTransition {
                operation: "step",
                phase: self.phase,
            });
        }

        self.phase = EpisodePhase::Stepping;
        let res = match self.env.step().await {
            Ok(res) => res,
            Err(e) => {
                self.phase = EpisodePhase::Ready;
                return Err(e.into());
            }
        };

        self.grid = res.grid;
        self.stats.steps += 1;
        self.stats.total_reward += res.reward;
        self.stats.last_action = res.action;
        if res.done {
            self.stats.done = true;
            self.stats.episodes += 1;
            self.phase = EpisodePhase::Done;
            info!(
                "Episode {} finished after {} steps, reward {:.2}",
                self.stats.episodes, self.stats.steps, self.stats.total_reward
            );
        } else {
            self.phase = EpisodePhase::Ready;
        }

        let outcome = StepOutcome {
            action: res.action,
            reward: res.reward,
            done: res.done,
            total_reward: self.stats.total_reward,
            steps: self.stats.steps,
        };
        debug!("{}", outcome);
        Ok(outcome)
    }
}

//! Network-free fakes for controller, scheduler and session tests.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream;
use lidarnav_protocol::env::{cell, Action, Grid, StepResult};

use crate::episode::{Environment, ResetSource};
use crate::error::TransportError;
use crate::session::StreamSource;

pub(crate) fn sample_grid() -> Grid {
    Grid::new(vec![
        vec![cell::AGENT, cell::FREE, cell::FREE],
        vec![cell::OBSTACLE, cell::OBSTACLE, cell::FREE],
        vec![cell::FREE, cell::FREE, cell::GOAL],
    ])
}

pub(crate) fn step(action: i32, reward: f64, done: bool) -> StepResult {
    StepResult {
        grid: sample_grid(),
        action: Action::new(action),
        reward,
        done,
    }
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<StepResult>,
    taken: usize,
    resets: Vec<ResetSource>,
    fail_reset: bool,
    in_flight: usize,
    max_in_flight: usize,
}

/// Replays a fixed list of step replies; an exhausted script fails the step.
#[derive(Debug)]
pub(crate) struct ScriptedEnv {
    script: Mutex<Script>,
    delay: Option<Duration>,
}

impl ScriptedEnv {
    pub(crate) fn new(steps: Vec<StepResult>) -> Self {
        Self {
            script: Mutex::new(Script {
                steps: steps.into(),
                ..Script::default()
            }),
            delay: None,
        }
    }

    /// Every remote call takes `delay` of (tokio) time.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn fail_next_reset(&self) {
        self.with_script(|s| s.fail_reset = true);
    }

    pub(crate) fn steps_taken(&self) -> usize {
        self.with_script(|s| s.taken)
    }

    pub(crate) fn resets(&self) -> Vec<ResetSource> {
        self.with_script(|s| s.resets.clone())
    }

    pub(crate) fn max_concurrent_steps(&self) -> usize {
        self.with_script(|s| s.max_in_flight)
    }

    fn with_script<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut script)
    }

    async fn latency(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Environment for ScriptedEnv {
    async fn reset(&self, source: ResetSource) -> Result<Grid, TransportError> {
        self.latency().await;
        self.with_script(|s| {
            s.resets.push(source);
            if std::mem::take(&mut s.fail_reset) {
                Err(TransportError::Remote("reset failed".to_string()))
            } else {
                Ok(sample_grid())
            }
        })
    }

    async fn step(&self) -> Result<StepResult, TransportError> {
        self.with_script(|s| {
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
        });
        self.latency().await;
        self.with_script(|s| {
            s.in_flight -= 1;
            match s.steps.pop_front() {
                Some(res) => {
                    s.taken += 1;
                    Ok(res)
                }
                None => Err(TransportError::Remote("script exhausted".to_string())),
            }
        })
    }
}

type Chunks = Vec<Result<Bytes, TransportError>>;

/// In-memory response body.
pub(crate) struct ChunkSource {
    body: Result<Chunks, TransportError>,
}

impl ChunkSource {
    pub(crate) fn new(chunks: Chunks) -> Self {
        Self { body: Ok(chunks) }
    }

    /// `raw` cut into chunks of `width` bytes.
    pub(crate) fn split(raw: &[u8], width: usize) -> Self {
        Self::new(
            raw.chunks(width)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect(),
        )
    }

    /// A source whose request fails before any body arrives.
    pub(crate) fn failing(err: TransportError) -> Self {
        Self { body: Err(err) }
    }
}

impl StreamSource for ChunkSource {
    type Body = stream::Iter<std::vec::IntoIter<Result<Bytes, TransportError>>>;

    async fn open(self) -> Result<Self::Body, TransportError> {
        self.body.map(stream::iter)
    }
}

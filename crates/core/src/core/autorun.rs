//! Fixed-cadence auto-stepping of a shared [`EpisodeController`].
//!
//! One spawned task per run. Each tick locks the controller, checks for a
//! finished episode and otherwise awaits one step before the next tick is
//! considered, so steps never overlap. [`AutoRunScheduler::stop`] cancels future
//! ticks only; a step already in flight completes and its result is applied.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::episode::{EpisodeController, EpisodePhase, Environment, SharedController, StepOutcome};
use crate::error::EpisodeError;

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(350);

/// Why an auto-run ended.
#[derive(Debug)]
pub enum AutoRunExit {
    Stopped,
    EpisodeDone,
    /// The step failed; auto-run does not retry.
    Failed(EpisodeError),
    ControllerDropped,
    /// The task was aborted or panicked.
    Aborted,
}

/// Cloneable handle that stops a running auto-run from anywhere.
#[derive(Debug, Clone)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    pub fn stop(&self) {
        self.0.cancel();
    }
}

#[derive(Debug)]
struct ActiveRun {
    token: CancellationToken,
    handle: JoinHandle<AutoRunExit>,
}

#[derive(Debug)]
pub struct AutoRunScheduler {
    period: Duration,
    active: Option<ActiveRun>,
    /// Exit of a run that ended before anyone joined it.
    unclaimed: Option<AutoRunExit>,
}

impl Default for AutoRunScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD)
    }
}

impl AutoRunScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            active: None,
            unclaimed: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| !run.token.is_cancelled() && !run.handle.is_finished())
    }

    pub async fn start<E: Environment>(&mut self, controller: &SharedController<E>) -> Result<(), EpisodeError> {
        self.start_with(controller, |_| {}).await
    }

    /// Starts auto-run, calling `on_step` after every applied step.
    ///
    /// Rejected while already running and unless the controller is `Ready`;
    /// a finished episode must be reset first. The exit of an earlier run that
    /// nobody joined is kept for [`take_finished`](Self::take_finished).
    pub async fn start_with<E, F>(&mut self, controller: &SharedController<E>, on_step: F) -> Result<(), EpisodeError>
    where
        E: Environment,
        F: FnMut(&StepOutcome) + Send + 'static,
    {
        if self.is_running() {
            return Err(EpisodeError::AutoRunActive);
        }
        if self.active.is_some() {
            if let Some(exit) = self.join().await {
                if let AutoRunExit::Failed(e) = &exit {
                    warn!("Previous auto-run failed and was never joined: {}", e);
                }
                // An older uncollected failure outranks a newer ordinary exit.
                if !matches!(self.unclaimed, Some(AutoRunExit::Failed(_))) {
                    self.unclaimed = Some(exit);
                }
            }
        }

        let phase = controller.lock().await.phase();
        if phase != EpisodePhase::Ready {
            return Err(EpisodeError::InvalidTransition {
                operation: "start auto-run",
                phase,
            });
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::downgrade(controller),
            self.period,
            token.clone(),
            on_step,
        ));
        self.active = Some(ActiveRun { token, handle });
        info!("Auto-run started ({} ms period)", self.period.as_millis());
        Ok(())
    }

    /// Prevents further ticks. Returns whether a run was active.
    pub fn stop(&mut self) -> bool {
        let running = self.is_running();
        if let Some(run) = &self.active {
            run.token.cancel();
        }
        if running {
            info!("Auto-run stop requested");
        }
        running
    }

    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.active.as_ref().map(|run| StopHandle(run.token.clone()))
    }

    /// Exit of a run that has already ended on its own, if not yet collected.
    ///
    /// Never waits: a run still ticking or finishing its last step yields `None`.
    pub async fn take_finished(&mut self) -> Option<AutoRunExit> {
        if let Some(exit) = self.unclaimed.take() {
            return Some(exit);
        }
        if self.active.as_ref().is_some_and(|run| run.handle.is_finished()) {
            return self.join().await;
        }
        None
    }

    /// Waits for the current run to end and reports why.
    ///
    /// Does not stop the run; call [`stop`](Self::stop) first for that.
    /// Without a current run, returns any exit [`take_finished`](Self::take_finished)
    /// would have.
    pub async fn join(&mut self) -> Option<AutoRunExit> {
        let Some(run) = self.active.take() else {
            return self.unclaimed.take();
        };
        match run.handle.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!("Auto-run task ended abnormally: {}", e);
                Some(AutoRunExit::Aborted)
            }
        }
    }
}

impl Drop for AutoRunScheduler {
    fn drop(&mut self) {
        if let Some(run) = &self.active {
            run.token.cancel();
        }
    }
}

async fn run_loop<E, F>(
    controller: Weak<Mutex<EpisodeController<E>>>,
    period: Duration,
    token: CancellationToken,
    mut on_step: F,
) -> AutoRunExit
where
    E: Environment,
    F: FnMut(&StepOutcome),
{
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return AutoRunExit::Stopped,
            _ = ticker.tick() => {}
        }

        let Some(shared) = controller.upgrade() else {
            info!("Auto-run ended: controller dropped");
            return AutoRunExit::ControllerDropped;
        };
        let mut ctl = shared.lock().await;

        // Stop may have landed while waiting for the lock; no step has started yet.
        if token.is_cancelled() {
            return AutoRunExit::Stopped;
        }
        if ctl.is_done() {
            info!("Auto-run ended: episode already done");
            return AutoRunExit::EpisodeDone;
        }

        match ctl.step().await {
            Ok(outcome) => {
                if token.is_cancelled() {
                    warn!("Step completed after stop; result applied");
                }
                on_step(&outcome);
                if outcome.done {
                    info!("Auto-run ended: {}", outcome);
                    return AutoRunExit::EpisodeDone;
                }
            }
            Err(e) => {
                warn!("Auto-run step failed: {}", e);
                return AutoRunExit::Failed(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::EpisodeTally;
    use crate::testing::{step, ScriptedEnv};
    use tokio::sync::mpsc;

    async fn ready_shared(env: ScriptedEnv) -> SharedController<ScriptedEnv> {
        let mut ctl = EpisodeController::new(env);
        ctl.reset_random(EpisodeTally::Clear).await.unwrap();
        ctl.into_shared()
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejected_when_done() {
        let shared = ready_shared(ScriptedEnv::new(vec![step(0, 10.0, true)])).await;
        shared.lock().await.step().await.unwrap();

        let mut sched = AutoRunScheduler::default();
        let err = sched.start(&shared).await.unwrap_err();
        assert!(matches!(
            err,
            EpisodeError::InvalidTransition {
                phase: EpisodePhase::Done,
                ..
            }
        ));
        assert!(!sched.is_running());
        assert!(sched.stop_handle().is_none());
        assert!(sched.join().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejected_before_reset() {
        let shared = EpisodeController::new(ScriptedEnv::new(vec![])).into_shared();
        let mut sched = AutoRunScheduler::default();
        assert!(sched.start(&shared).await.unwrap_err().is_invalid_transition());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_until_episode_done() {
        let shared = ready_shared(ScriptedEnv::new(vec![
            step(1, -0.1, false),
            step(3, -0.1, false),
            step(3, 1.0, true),
            step(0, 0.0, false),
        ]))
        .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = AutoRunScheduler::default();
        sched
            .start_with(&shared, move |o| {
                let _ = tx.send(o.steps);
            })
            .await
            .unwrap();

        assert!(matches!(sched.join().await, Some(AutoRunExit::EpisodeDone)));
        let ctl = shared.lock().await;
        assert_eq!(ctl.stats().steps(), 3);
        assert_eq!(ctl.stats().episodes(), 1);
        assert_eq!(ctl.env().steps_taken(), 3);

        let mut seen = Vec::new();
        while let Ok(n) = rx.try_recv() {
            seen.push(n);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn steps_follow_the_period() {
        let shared = ready_shared(ScriptedEnv::new(vec![step(0, 0.0, false); 10])).await;
        let mut sched = AutoRunScheduler::new(DEFAULT_PERIOD);
        sched.start(&shared).await.unwrap();

        time::sleep(Duration::from_millis(1000)).await;
        assert!(sched.stop());
        assert!(matches!(sched.join().await, Some(AutoRunExit::Stopped)));
        // Ticks at 350 ms and 700 ms.
        assert_eq!(shared.lock().await.stats().steps(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_step_completes_after_stop() {
        let env = ScriptedEnv::new(vec![step(2, 0.5, false); 5]).with_delay(Duration::from_millis(100));
        let shared = ready_shared(env).await;
        let mut sched = AutoRunScheduler::default();
        sched.start(&shared).await.unwrap();

        // First tick 350 ms after start; its step stays in flight for another 100 ms.
        time::sleep(Duration::from_millis(400)).await;
        sched.stop_handle().unwrap().stop();
        assert!(!sched.is_running());

        assert!(matches!(sched.join().await, Some(AutoRunExit::Stopped)));
        let ctl = shared.lock().await;
        assert_eq!(ctl.stats().steps(), 1);
        assert_eq!(ctl.phase(), EpisodePhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_while_running() {
        let shared = ready_shared(ScriptedEnv::new(vec![step(0, 0.0, false); 3])).await;
        let mut sched = AutoRunScheduler::default();
        sched.start(&shared).await.unwrap();
        assert!(matches!(
            sched.start(&shared).await,
            Err(EpisodeError::AutoRunActive)
        ));
        sched.stop();
        sched.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_ends_auto_run() {
        let shared = ready_shared(ScriptedEnv::new(vec![step(1, 0.0, false)])).await;
        let mut sched = AutoRunScheduler::default();
        sched.start(&shared).await.unwrap();

        match sched.join().await {
            Some(AutoRunExit::Failed(EpisodeError::Transport(_))) => {}
            other => panic!("unexpected {other:?}"),
        }
        let ctl = shared.lock().await;
        assert_eq!(ctl.stats().steps(), 1);
        assert_eq!(ctl.phase(), EpisodePhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_survives_a_restart() {
        // Empty script: every step fails.
        let shared = ready_shared(ScriptedEnv::new(vec![])).await;
        let mut sched = AutoRunScheduler::default();
        sched.start(&shared).await.unwrap();

        time::sleep(Duration::from_millis(400)).await;
        assert!(!sched.is_running());
        assert!(!sched.stop());

        sched.start(&shared).await.unwrap();
        assert!(sched.is_running());
        match sched.take_finished().await {
            Some(AutoRunExit::Failed(EpisodeError::Transport(_))) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(sched.take_finished().await.is_none());

        sched.stop();
        assert!(matches!(sched.join().await, Some(AutoRunExit::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_run_is_collected_once() {
        let shared = ready_shared(ScriptedEnv::new(vec![step(0, 1.0, true)])).await;
        let mut sched = AutoRunScheduler::default();
        sched.start(&shared).await.unwrap();
        assert!(sched.take_finished().await.is_none());

        time::sleep(Duration::from_millis(400)).await;
        assert!(matches!(sched.take_finished().await, Some(AutoRunExit::EpisodeDone)));
        assert!(sched.take_finished().await.is_none());
        assert!(sched.join().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_controller_ends_auto_run() {
        let shared = ready_shared(ScriptedEnv::new(vec![step(0, 0.0, false); 3])).await;
        let mut sched = AutoRunScheduler::default();
        sched.start(&shared).await.unwrap();
        drop(shared);

        assert!(matches!(
            sched.join().await,
            Some(AutoRunExit::ControllerDropped)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_step_queues_behind_auto_run() {
        let env = ScriptedEnv::new(vec![step(0, 1.0, false); 4]).with_delay(Duration::from_millis(200));
        let shared = ready_shared(env).await;
        let mut sched = AutoRunScheduler::default();
        sched.start(&shared).await.unwrap();

        // Lands while the first scheduled step (350..550 ms after start) holds the controller.
        time::sleep(Duration::from_millis(400)).await;
        let outcome = shared.lock().await.step().await.unwrap();
        assert_eq!(outcome.steps, 2);

        sched.stop();
        sched.join().await;
        assert_eq!(shared.lock().await.env().max_concurrent_steps(), 1);
    }
}

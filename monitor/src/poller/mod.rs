//! Single-flight status polling loop.
//!
//! One task owns every piece of mutable state. Commands reach it through an
//! mpsc channel; observers read `DashboardSnapshot`s from a watch channel and
//! lifecycle signals from a broadcast channel. A new cycle always cancels the
//! request of the previous one, so a late response can never overwrite newer
//! data.

mod state;

pub use state::{DashboardSnapshot, MonitorEvent, Notice, PollerState};

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use trainwatch_common::utils::format_duration;

use crate::{client::TrainingBackend, config::MonitorConfig};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum PollerCommand {
    SetActive(bool),
    CadenceHint(Duration),
    /// Drop any in-flight request and poll right away.
    Refresh,
    Shutdown,
}

#[derive(Clone)]
pub struct PollerHandle {
    commands: mpsc::UnboundedSender<PollerCommand>,
    snapshots: watch::Receiver<DashboardSnapshot>,
    events: broadcast::Sender<MonitorEvent>,
    shutdown: CancellationToken,
}

impl PollerHandle {
    pub fn set_active(&self, active: bool) {
        self.send(PollerCommand::SetActive(active));
    }

    pub fn apply_cadence_hint(&self, hint: Duration) {
        self.send(PollerCommand::CadenceHint(hint));
    }

    pub fn refresh(&self) {
        self.send(PollerCommand::Refresh);
    }

    /// Cancels the pending timer and any in-flight request.
    pub fn shutdown(&self) {
        self.send(PollerCommand::Shutdown);
        self.shutdown.cancel();
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub fn publish_notice(&self, notice: Notice) {
        let _ = self.events.send(MonitorEvent::Notice(notice));
    }

    fn send(&self, command: PollerCommand) {
        if self.commands.send(command).is_err() {
            debug!("status poller already stopped");
        }
    }
}

enum CycleEnd {
    Completed,
    Superseded,
    Shutdown,
}

pub struct StatusPoller {
    backend: Arc<dyn TrainingBackend>,
    state: PollerState,
    commands: mpsc::UnboundedReceiver<PollerCommand>,
    snapshot_tx: watch::Sender<DashboardSnapshot>,
    events: broadcast::Sender<MonitorEvent>,
    shutdown: CancellationToken,
    next_poll: Option<Instant>,
}

impl StatusPoller {
    pub fn new(backend: Arc<dyn TrainingBackend>, config: &MonitorConfig) -> (Self, PollerHandle) {
        let state = PollerState::new(&config.polling, config.history.max_points);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot(true));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();

        let handle = PollerHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            events: events.clone(),
            shutdown: shutdown.clone(),
        };

        let poller = Self {
            backend,
            state,
            commands: command_rx,
            snapshot_tx,
            events,
            shutdown,
            // The first cycle discovers a run that is already in progress.
            next_poll: Some(Instant::now()),
        };

        (poller, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!(cadence = %format_duration(self.state.cadence()), "status poller started");

        loop {
            let next_poll = self.next_poll;
            let timer = async move {
                match next_poll {
                    Some(at) => sleep_until(at).await,
                    None => pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    None | Some(PollerCommand::Shutdown) => break,
                    Some(command) => self.apply_command(command),
                },
                _ = timer => match self.poll_cycle().await {
                    CycleEnd::Shutdown => break,
                    CycleEnd::Superseded => self.next_poll = Some(Instant::now()),
                    CycleEnd::Completed => {}
                },
            }
        }

        self.next_poll = None;
        self.publish();
        info!("status poller stopped");
    }

    fn apply_command(&mut self, command: PollerCommand) {
        match command {
            PollerCommand::SetActive(active) => {
                self.state.set_ui_active(active);
                if active && self.next_poll.is_none() {
                    self.next_poll = Some(Instant::now());
                }
            }
            PollerCommand::CadenceHint(hint) => self.state.apply_cadence_hint(hint),
            PollerCommand::Refresh => self.next_poll = Some(Instant::now()),
            PollerCommand::Shutdown => self.shutdown.cancel(),
        }
        self.publish();
    }

    async fn poll_cycle(&mut self) -> CycleEnd {
        let started = Instant::now();
        let token = self.shutdown.child_token();
        let backend = Arc::clone(&self.backend);
        let request = backend.fetch_status(&token);
        tokio::pin!(request);

        let result = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    token.cancel();
                    return CycleEnd::Shutdown;
                }
                command = self.commands.recv() => match command {
                    None | Some(PollerCommand::Shutdown) => {
                        token.cancel();
                        return CycleEnd::Shutdown;
                    }
                    Some(PollerCommand::Refresh) => {
                        debug!("superseding in-flight status request");
                        token.cancel();
                        return CycleEnd::Superseded;
                    }
                    Some(command) => self.apply_command(command),
                },
                result = &mut request => break result,
            }
        };

        let events = match result {
            Ok(payload) => self.state.ingest(&payload),
            Err(error) => self.state.record_failure(&error),
        };
        for event in events {
            let _ = self.events.send(event);
        }

        self.next_poll = if self.state.should_continue() {
            let delay = self.state.next_delay(started.elapsed());
            Some(Instant::now() + delay)
        } else {
            info!("backend idle and dashboard inactive, polling paused");
            None
        };
        self.publish();
        CycleEnd::Completed
    }

    fn publish(&self) {
        self.snapshot_tx
            .send_replace(self.state.snapshot(self.next_poll.is_some()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ControlAck;
    use crate::error::{MonitorError, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::sleep;
    use trainwatch_common::JobId;
    use trainwatch_simulator::{SimulatorConfig, TrainingRunSimulator};

    enum Reply {
        Payload(Value),
        Fail,
    }

    struct Scripted {
        reply: Reply,
        delay: Duration,
    }

    #[derive(Default)]
    struct ScriptedBackend {
        script: Mutex<VecDeque<Scripted>>,
        fallback: Mutex<Option<Value>>,
        calls: Mutex<Vec<Instant>>,
        tokens: Mutex<Vec<CancellationToken>>,
    }

    impl ScriptedBackend {
        fn push(&self, reply: Reply, delay: Duration) {
            self.script.lock().unwrap().push_back(Scripted { reply, delay });
        }

        fn set_fallback(&self, payload: Value) {
            *self.fallback.lock().unwrap() = Some(payload);
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }

        fn token(&self, index: usize) -> CancellationToken {
            self.tokens.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl TrainingBackend for ScriptedBackend {
        async fn fetch_status(&self, cancel: &CancellationToken) -> Result<Value> {
            self.calls.lock().unwrap().push(Instant::now());
            self.tokens.lock().unwrap().push(cancel.clone());

            let next = self.script.lock().unwrap().pop_front();
            let Scripted { reply, delay } = match next {
                Some(step) => step,
                None => Scripted {
                    reply: Reply::Payload(
                        self.fallback
                            .lock()
                            .unwrap()
                            .clone()
                            .unwrap_or_else(|| json!({"is_training": false, "latest_stats": {"status": "idle"}})),
                    ),
                    delay: Duration::ZERO,
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => Err(MonitorError::Cancelled),
                _ = sleep(delay) => match reply {
                    Reply::Payload(payload) => Ok(payload),
                    Reply::Fail => Err(MonitorError::Connection("connection refused".to_string())),
                },
            }
        }

        async fn start_training(&self, _config: &Value) -> Result<ControlAck> {
            Ok(ControlAck::default())
        }

        async fn resume_training(&self, _checkpoint: &str, _episodes: u32) -> Result<ControlAck> {
            Ok(ControlAck::default())
        }

        async fn stop_training(&self) -> Result<ControlAck> {
            Ok(ControlAck::default())
        }
    }

    fn config(active: bool) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.polling.start_active = active;
        config
    }

    fn start(backend: Arc<ScriptedBackend>, active: bool) -> (PollerHandle, JoinHandle<()>) {
        let (poller, handle) = StatusPoller::new(backend, &config(active));
        (handle, poller.spawn())
    }

    fn training(job: &str, step: u64) -> Value {
        json!({
            "job_id": job,
            "is_training": true,
            "latest_stats": {"status": "training", "epoch": 1, "time_step": step, "loss": 0.5, "rmse": 0.2}
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_responses_do_not_drift_cadence() {
        let backend = Arc::new(ScriptedBackend::default());
        for step in 1..=4 {
            backend.push(Reply::Payload(training("a", step)), Duration::from_millis(300));
        }
        let (handle, task) = start(backend.clone(), true);

        sleep(Duration::from_millis(3_100)).await;
        let calls = backend.calls();
        assert_eq!(calls.len(), 4);
        for pair in calls.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(1));
        }

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_slower_than_cadence_polls_immediately() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Reply::Payload(training("a", 1)), Duration::from_millis(1_500));
        backend.push(Reply::Payload(training("a", 2)), Duration::ZERO);
        let (handle, task) = start(backend.clone(), true);

        sleep(Duration::from_millis(1_600)).await;
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1] - calls[0], Duration::from_millis(1_500));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_supersedes_in_flight_request() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Reply::Payload(training("stale", 1)), Duration::from_secs(5));
        backend.push(Reply::Payload(training("fresh", 1)), Duration::from_millis(10));
        let (handle, task) = start(backend.clone(), true);

        sleep(Duration::from_millis(100)).await;
        handle.refresh();
        sleep(Duration::from_millis(100)).await;

        assert!(backend.token(0).is_cancelled());
        assert!(!backend.token(1).is_cancelled());
        assert_eq!(handle.snapshot().job_id, Some(JobId::from("fresh")));

        sleep(Duration::from_secs(10)).await;
        assert_ne!(handle.snapshot().job_id, Some(JobId::from("stale")));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_backend_pauses_until_activated() {
        let backend = Arc::new(ScriptedBackend::default());
        let (handle, task) = start(backend.clone(), false);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.calls().len(), 1);
        assert!(!handle.snapshot().polling);

        handle.set_active(true);
        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(backend.calls().len(), 4);
        assert!(handle.snapshot().polling);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_until_backend_reports_terminal_status() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Reply::Payload(training("a", 1)), Duration::ZERO);
        backend.push(Reply::Payload(training("a", 2)), Duration::ZERO);
        backend.set_fallback(json!({
            "job_id": "a",
            "is_training": false,
            "latest_stats": {"status": "completed", "message": "Training completed"}
        }));
        let (handle, task) = start(backend.clone(), false);
        let mut events = handle.subscribe_events();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.calls().len(), 3);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        let ended: Vec<_> = seen
            .iter()
            .filter_map(|e| match e {
                MonitorEvent::TrainingEnded { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ended, vec![Some("Training completed".to_string())]);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_retried_and_surface_disconnect() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Reply::Payload(training("a", 1)), Duration::ZERO);
        backend.push(Reply::Fail, Duration::ZERO);
        backend.push(Reply::Fail, Duration::ZERO);
        backend.push(Reply::Payload(training("a", 2)), Duration::ZERO);
        let (handle, task) = start(backend.clone(), false);
        let mut snapshots = handle.subscribe_snapshots();

        sleep(Duration::from_millis(1_500)).await;
        let snapshot = snapshots.borrow_and_update().clone();
        assert!(!snapshot.connected);
        assert!(snapshot.connection_error.is_some());
        // History survives a disconnect.
        assert_eq!(snapshot.history.len(), 1);

        sleep(Duration::from_secs(2)).await;
        let snapshot = handle.snapshot();
        assert!(snapshot.connected);
        assert!(snapshot.connection_error.is_none());
        assert_eq!(snapshot.history.len(), 2);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight_request() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push(Reply::Payload(training("a", 1)), Duration::from_secs(60));
        let (handle, task) = start(backend.clone(), true);

        sleep(Duration::from_millis(10)).await;
        handle.shutdown();
        task.await.unwrap();

        assert!(backend.token(0).is_cancelled());
        assert!(!handle.snapshot().polling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_run_with_restart() {
        let mut sim = TrainingRunSimulator::new(SimulatorConfig {
            episodes: 2,
            max_steps: 20,
            steps_per_poll: 3,
            seed: 7,
            ..SimulatorConfig::default()
        });
        let backend = Arc::new(ScriptedBackend::default());

        sim.start();
        let first_job = sim.job_id().map(JobId::from);
        while sim.is_training() {
            backend.push(Reply::Payload(sim.next_payload()), Duration::from_millis(20));
        }
        backend.push(Reply::Payload(sim.status_payload()), Duration::ZERO);
        sim.start();
        let second_job = sim.job_id().map(JobId::from);
        for _ in 0..3 {
            backend.push(Reply::Payload(sim.next_payload()), Duration::from_millis(20));
        }
        backend.set_fallback(sim.status_payload());

        let (handle, task) = start(backend.clone(), true);
        let mut events = handle.subscribe_events();
        sleep(Duration::from_secs(60)).await;

        let mut started = 0;
        let mut ended = 0;
        let mut job_changes = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                MonitorEvent::TrainingStarted { .. } => started += 1,
                MonitorEvent::TrainingEnded { .. } => ended += 1,
                MonitorEvent::JobChanged { .. } => job_changes += 1,
                _ => {}
            }
        }
        assert_eq!(started, 2);
        assert_eq!(ended, 1);
        assert_eq!(job_changes, 2);

        let snapshot = handle.snapshot();
        assert_ne!(first_job, second_job);
        assert_eq!(snapshot.job_id, second_job);
        assert!(!snapshot.history.is_empty());
        assert!(snapshot.history.len() <= 9);
        assert!(snapshot
            .history
            .windows(2)
            .all(|w| w[0].order_key() < w[1].order_key()));

        handle.shutdown();
        task.await.unwrap();
    }
}

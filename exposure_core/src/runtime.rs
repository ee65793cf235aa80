//! Single-owner runtime for the session controller.
//!
//! The controller lives on one worker thread and every caller (ticker,
//! UI actions, UV updates, the notification "extend" action) talks to it
//! through a command queue. Nothing else ever touches the session, so
//! transitions are serialized without locks.

use crate::clock::Clock;
use crate::controller::SessionController;
use crate::gateway::Ticker;
use crate::{Error, Result, SessionEvent, SessionStatus, SkinClass};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum Command {
    Start {
        class: SkinClass,
        uv_index: f64,
        protection_factor: f64,
        reply: Sender<Result<SessionEvent>>,
    },
    Stop,
    Extend,
    UpdateUv(f64),
    Tick,
    Resume,
    Suspend,
    Status(Sender<SessionStatus>),
    Shutdown,
}

/// Cloneable handle for submitting work to the runtime
#[derive(Clone)]
pub struct SessionHandle {
    commands: Sender<Command>,
}

impl SessionHandle {
    /// Start a session, waiting for the controller's answer
    pub fn start(&self, class: SkinClass, uv_index: f64, protection_factor: f64) -> Result<SessionEvent> {
        let (reply, answer) = channel();
        self.send(Command::Start {
            class,
            uv_index,
            protection_factor,
            reply,
        })?;
        answer.recv().map_err(|_| shut_down())?
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn extend(&self) -> Result<()> {
        self.send(Command::Extend)
    }

    /// Inbound action from the finish notification
    pub fn on_extend_requested(&self) -> Result<()> {
        tracing::debug!("Extend requested from notification");
        self.extend()
    }

    pub fn update_uv_index(&self, uv_index: f64) -> Result<()> {
        self.send(Command::UpdateUv(uv_index))
    }

    /// Request a tick now, in addition to any attached ticker
    pub fn tick(&self) -> Result<()> {
        self.send(Command::Tick)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    pub fn suspend(&self) -> Result<()> {
        self.send(Command::Suspend)
    }

    /// Snapshot of the controller after all earlier commands ran
    pub fn status(&self) -> Result<SessionStatus> {
        let (reply, answer) = channel();
        self.send(Command::Status(reply))?;
        answer.recv().map_err(|_| shut_down())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| shut_down())
    }
}

fn shut_down() -> Error {
    Error::State("session runtime has shut down".into())
}

/// Ticker that feeds `Tick` commands into the runtime queue from a
/// background thread
struct ThreadTicker {
    commands: Sender<Command>,
    interval: Duration,
    running: Option<Arc<AtomicBool>>,
}

impl ThreadTicker {
    fn new(commands: Sender<Command>, interval: Duration) -> Self {
        Self {
            commands,
            interval,
            running: None,
        }
    }
}

impl Ticker for ThreadTicker {
    fn start(&mut self) {
        if self.running.is_some() {
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let commands = self.commands.clone();
        let interval = self.interval;

        thread::spawn(move || loop {
            thread::sleep(interval);
            if !flag.load(Ordering::Acquire) || commands.send(Command::Tick).is_err() {
                break;
            }
        });

        tracing::debug!("Ticker started ({:?})", interval);
        self.running = Some(running);
    }

    fn cancel(&mut self) {
        if let Some(running) = self.running.take() {
            running.store(false, Ordering::Release);
            tracing::debug!("Ticker cancelled");
        }
    }
}

/// Owner of the worker thread
pub struct SessionRuntime {
    handle: SessionHandle,
    worker: Option<JoinHandle<SessionController>>,
}

impl SessionRuntime {
    /// Move the controller onto a worker thread.
    ///
    /// With `tick_interval` set, a background ticker is attached and
    /// drives the countdown; with `None` the caller sends ticks itself.
    /// Every event the controller produces is forwarded on the returned
    /// receiver.
    ///
    /// The event channel is unbounded and a ticking session sends one
    /// `Ticked` per interval, so callers must keep draining the receiver
    /// or drop it. Once the receiver is dropped events are discarded and
    /// commands keep working.
    pub fn spawn(
        mut controller: SessionController,
        clock: Arc<dyn Clock>,
        tick_interval: Option<Duration>,
    ) -> (Self, Receiver<SessionEvent>) {
        let (commands, queue) = channel::<Command>();
        let (events, event_rx) = channel::<SessionEvent>();

        if let Some(interval) = tick_interval {
            controller.attach_ticker(Box::new(ThreadTicker::new(commands.clone(), interval)));
        }

        let worker = thread::spawn(move || run(controller, clock, queue, events));

        let runtime = Self {
            handle: SessionHandle { commands },
            worker: Some(worker),
        };
        (runtime, event_rx)
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Checkpoint the session, stop the worker and hand back the controller
    pub fn shutdown(mut self) -> Result<SessionController> {
        // The worker may already be gone; joining reports that either way
        let _ = self.handle.send(Command::Shutdown);
        let worker = self
            .worker
            .take()
            .ok_or_else(|| Error::State("session runtime already shut down".into()))?;
        worker
            .join()
            .map_err(|_| Error::Other("session worker panicked".into()))
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.handle.send(Command::Shutdown);
        }
    }
}

fn run(
    mut controller: SessionController,
    clock: Arc<dyn Clock>,
    queue: Receiver<Command>,
    events: Sender<SessionEvent>,
) -> SessionController {
    while let Ok(command) = queue.recv() {
        let now = clock.now();
        let event = match command {
            Command::Start {
                class,
                uv_index,
                protection_factor,
                reply,
            } => {
                let result = controller.start(class, uv_index, protection_factor, now);
                if let Err(e) = &result {
                    tracing::warn!("Start rejected: {}", e);
                }
                let event = result.as_ref().ok().cloned();
                let _ = reply.send(result);
                event
            }
            Command::Stop => controller.stop(now, true),
            Command::Extend => controller.extend(now),
            Command::UpdateUv(uv_index) => controller.update_uv_index(uv_index, now),
            Command::Tick => controller.tick(now, true),
            Command::Resume => controller.resume(now),
            Command::Suspend => controller.suspend(now),
            Command::Status(reply) => {
                let _ = reply.send(controller.status(now));
                None
            }
            Command::Shutdown => {
                controller.suspend(now);
                break;
            }
        };

        if let Some(event) = event {
            // Nobody listening is fine
            let _ = events.send(event);
        }
    }

    tracing::debug!("Session worker exiting");
    controller
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::controller::{Collaborators, SessionSettings};
    use crate::testing::{CallLog, MemoryStore, RecordingJournal, RecordingPresentation};
    use crate::{EndReason, SessionState};
    use chrono::{TimeZone, Utc};

    fn spawn_manual() -> (SessionRuntime, Receiver<SessionEvent>, Arc<ManualClock>, CallLog) {
        crate::logging::init_test();
        let log = CallLog::default();
        let controller = SessionController::new(
            SessionSettings::default(),
            Collaborators {
                persistence: Box::new(MemoryStore {
                    log: log.clone(),
                    ..MemoryStore::default()
                }),
                presentation: Box::new(RecordingPresentation {
                    log: log.clone(),
                    ..RecordingPresentation::default()
                }),
                journal: Box::new(RecordingJournal { log: log.clone() }),
            },
        );
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 7, 1, 11, 0, 0).unwrap(),
        ));
        let (runtime, events) = SessionRuntime::spawn(controller, clock.clone(), None);
        (runtime, events, clock, log)
    }

    #[test]
    fn test_commands_are_applied_in_order() {
        let (runtime, events, clock, _log) = spawn_manual();
        let handle = runtime.handle();

        let started = handle.start(SkinClass::Type3, 6.0, 1.0).unwrap();
        assert!(matches!(started, SessionEvent::Started { .. }));

        clock.advance(chrono::Duration::seconds(150));
        handle.tick().unwrap();

        let status = handle.status().unwrap();
        assert_eq!(status.state, SessionState::Running);
        assert_eq!(status.remaining_seconds, 150);
        assert!((status.accumulated_dose - 900.0).abs() < 1e-9);

        assert!(matches!(events.recv().unwrap(), SessionEvent::Started { .. }));
        assert!(matches!(events.recv().unwrap(), SessionEvent::Ticked { .. }));

        runtime.shutdown().unwrap();
    }

    #[test]
    fn test_second_start_is_rejected_through_handle() {
        let (runtime, _events, _clock, _log) = spawn_manual();
        let handle = runtime.handle();

        handle.start(SkinClass::Type2, 5.0, 15.0).unwrap();
        let second = handle.start(SkinClass::Type2, 5.0, 15.0);

        assert!(matches!(second, Err(Error::State(_))));
        runtime.shutdown().unwrap();
    }

    #[test]
    fn test_extend_request_and_stop() {
        let (runtime, events, clock, log) = spawn_manual();
        let handle = runtime.handle();

        handle.start(SkinClass::Type3, 5.0, 1.0).unwrap();
        clock.advance(chrono::Duration::seconds(60));
        handle.on_extend_requested().unwrap();
        clock.advance(chrono::Duration::seconds(40));
        handle.stop().unwrap();

        let controller = runtime.shutdown().unwrap();
        assert_eq!(controller.state(), SessionState::Finished);

        let received: Vec<SessionEvent> = events.try_iter().collect();
        assert!(matches!(received[1], SessionEvent::Extended { .. }));
        match &received[2] {
            SessionEvent::Finished { snapshot } => {
                assert_eq!(snapshot.end_reason, EndReason::UserStopped);
                assert_eq!(snapshot.duration_seconds, 100);
                assert!((snapshot.accumulated_dose - 500.0).abs() < 1e-9);
            }
            other => panic!("Expected Finished, got {:?}", other),
        }
        assert_eq!(log.journaled().len(), 1);
    }

    #[test]
    fn test_dropped_event_receiver_does_not_block_commands() {
        let (runtime, events, clock, log) = spawn_manual();
        let handle = runtime.handle();
        drop(events);

        handle.start(SkinClass::Type3, 6.0, 1.0).unwrap();
        for _ in 0..20 {
            clock.advance(chrono::Duration::seconds(1));
            handle.tick().unwrap();
        }

        let status = handle.status().unwrap();
        assert_eq!(status.remaining_seconds, 280);
        handle.stop().unwrap();

        let controller = runtime.shutdown().unwrap();
        assert_eq!(controller.state(), SessionState::Finished);
        assert_eq!(log.journaled().len(), 1);
    }

    #[test]
    fn test_shutdown_checkpoints_running_session() {
        let (runtime, _events, clock, log) = spawn_manual();
        let handle = runtime.handle();

        handle.start(SkinClass::Type3, 6.0, 1.0).unwrap();
        clock.advance(chrono::Duration::seconds(30));

        let controller = runtime.shutdown().unwrap();
        assert_eq!(controller.state(), SessionState::Running);
        assert!((controller.session().unwrap().accumulated_dose - 180.0).abs() < 1e-9);
        assert_eq!(
            log.count(|c| matches!(c, crate::testing::Call::Save(_))),
            2
        );

        assert!(handle.tick().is_err());
    }

    #[test]
    fn test_thread_ticker_drives_countdown() {
        crate::logging::init_test();
        let controller = SessionController::new(
            SessionSettings::default(),
            Collaborators {
                persistence: Box::new(MemoryStore::default()),
                presentation: Box::new(RecordingPresentation::default()),
                journal: Box::new(RecordingJournal::default()),
            },
        );
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (runtime, events) =
            SessionRuntime::spawn(controller, clock.clone(), Some(Duration::from_millis(5)));

        runtime.handle().start(SkinClass::Type4, 3.0, 1.0).unwrap();
        assert!(matches!(events.recv().unwrap(), SessionEvent::Started { .. }));

        let tick = events
            .recv_timeout(Duration::from_secs(5))
            .expect("ticker should deliver a tick");
        assert!(matches!(tick, SessionEvent::Ticked { .. }));

        runtime.shutdown().unwrap();
    }
}

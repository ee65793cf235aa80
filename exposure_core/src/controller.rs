//! Exposure session state machine.
//!
//! The controller owns the single exposure session and is the only thing
//! that mutates it. Every transition takes `now` explicitly; nothing in
//! here reads a clock or sleeps, so the one-second ticker and the
//! resume-from-background path are thin adapters over the same calls.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running -> (tick | uv update | extend)* -> Finished -> Idle
//! ```
//!
//! Collaborator calls (persistence, presentation, journal) are best-effort:
//! failures are logged and never undo or block a transition.

use crate::burn::{self, MAX_REMAINING_SECONDS};
use crate::dose::{self, integration_bound, non_negative_uv, seconds_between};
use crate::gateway::{NullTicker, PersistenceGateway, PresentationGateway, Ticker};
use crate::journal::JournalSink;
use crate::{
    Config, EndReason, Error, ExposureSession, FinishedSnapshot, LegacyRecord, NotificationSound,
    Result, SessionEvent, SessionState, SessionStatus, SkinClass, StoredSession,
};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Tunables the controller needs from configuration
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSettings {
    /// Exposure time granted by one "extend" action
    pub extension_seconds: i64,
    /// Live surface refresh cadence while ticking
    pub presentation_interval_seconds: i64,
    pub notification_sound: NotificationSound,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            extension_seconds: config.session.extension_seconds.max(1),
            presentation_interval_seconds: config.session.presentation_interval_seconds.max(1),
            notification_sound: config.profile.notification_sound,
        }
    }
}

/// External collaborators of the controller
pub struct Collaborators {
    pub persistence: Box<dyn PersistenceGateway>,
    pub presentation: Box<dyn PresentationGateway>,
    pub journal: Box<dyn JournalSink>,
}

enum Phase {
    Idle,
    Running(ExposureSession),
    Finished(FinishedSnapshot),
}

/// Displayed countdown values, refreshed on every transition
#[derive(Debug, Default)]
struct Countdown {
    remaining_seconds: i64,
    elapsed_seconds: i64,
    /// Remaining value at the last throttled live surface refresh
    last_presented: Option<i64>,
}

pub struct SessionController {
    phase: Phase,
    countdown: Countdown,
    settings: SessionSettings,
    persistence: Box<dyn PersistenceGateway>,
    presentation: Box<dyn PresentationGateway>,
    journal: Box<dyn JournalSink>,
    ticker: Box<dyn Ticker>,
}

impl SessionController {
    /// Create an idle controller. Ticks are expected to be driven by the
    /// caller until a ticker is attached.
    pub fn new(settings: SessionSettings, collaborators: Collaborators) -> Self {
        Self {
            phase: Phase::Idle,
            countdown: Countdown::default(),
            settings,
            persistence: collaborators.persistence,
            presentation: collaborators.presentation,
            journal: collaborators.journal,
            ticker: Box::new(NullTicker),
        }
    }

    /// Replace the tick source, arming it if a session is already running
    pub fn attach_ticker(&mut self, ticker: Box<dyn Ticker>) {
        self.ticker.cancel();
        self.ticker = ticker;
        if self.is_running() {
            self.ticker.start();
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        match self.phase {
            Phase::Idle => SessionState::Idle,
            Phase::Running(_) => SessionState::Running,
            Phase::Finished(_) => SessionState::Finished,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running(_))
    }

    /// The running session, if any
    pub fn session(&self) -> Option<&ExposureSession> {
        match &self.phase {
            Phase::Running(session) => Some(session),
            _ => None,
        }
    }

    /// The finished snapshot awaiting consumption, if any
    pub fn finished(&self) -> Option<&FinishedSnapshot> {
        match &self.phase {
            Phase::Finished(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn remaining_seconds(&self) -> i64 {
        self.countdown.remaining_seconds
    }

    pub fn elapsed_seconds(&self) -> i64 {
        self.countdown.elapsed_seconds
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Read-only view of the session as of `now`.
    ///
    /// Dose not yet integrated is projected at the current UV Index, so the
    /// figure matches what a tick at `now` would produce.
    pub fn status(&self, now: DateTime<Utc>) -> SessionStatus {
        match &self.phase {
            Phase::Idle => SessionStatus::idle(),
            Phase::Running(session) => {
                let pending = seconds_between(
                    session.last_dose_update_time,
                    integration_bound(session, now),
                )
                .max(0.0);
                let dose =
                    session.accumulated_dose + non_negative_uv(session.current_uv_index) * pending;
                SessionStatus {
                    state: SessionState::Running,
                    remaining_seconds: seconds_until(session.planned_end_time, now).max(0),
                    elapsed_seconds: elapsed_seconds(session.start_time, now),
                    current_uv_index: session.current_uv_index,
                    accumulated_dose: dose,
                    burn_limit_dose: session.burn_limit_dose,
                    standard_erythemal_dose: dose::standard_erythemal_dose(dose),
                    planned_end_time: Some(session.planned_end_time),
                    finished: None,
                }
            }
            Phase::Finished(snapshot) => SessionStatus {
                state: SessionState::Finished,
                elapsed_seconds: snapshot.duration_seconds,
                current_uv_index: snapshot.uv_index_at_end,
                accumulated_dose: snapshot.accumulated_dose,
                standard_erythemal_dose: snapshot.standard_erythemal_dose(),
                finished: Some(snapshot.clone()),
                ..SessionStatus::idle()
            },
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start a new session.
    ///
    /// Fails if a session is already running: callers must stop it first.
    /// An unconsumed finished snapshot is discarded (it has already been
    /// journaled).
    pub fn start(
        &mut self,
        class: SkinClass,
        uv_index: f64,
        protection_factor: f64,
        now: DateTime<Utc>,
    ) -> Result<SessionEvent> {
        match &self.phase {
            Phase::Running(session) => {
                return Err(Error::State(format!(
                    "session {} is already running; stop it first",
                    session.id
                )));
            }
            Phase::Finished(snapshot) => {
                tracing::debug!("Discarding unconsumed snapshot {}", snapshot.id);
            }
            Phase::Idle => {}
        }

        let uv = non_negative_uv(uv_index);
        let seconds = burn::seconds_to_burn(class, uv, protection_factor);
        let session = ExposureSession {
            id: Uuid::new_v4(),
            start_time: now,
            planned_end_time: now + Duration::seconds(seconds),
            current_uv_index: uv,
            accumulated_dose: 0.0,
            burn_limit_dose: burn::dose_budget(class, protection_factor),
            last_dose_update_time: now,
        };

        tracing::info!(
            "Starting session {}: skin class {}, UV {:.1}, protection {}, {}s to burn",
            session.id,
            class.number(),
            uv,
            protection_factor,
            seconds
        );

        self.countdown = Countdown {
            remaining_seconds: seconds,
            elapsed_seconds: 0,
            last_presented: None,
        };

        best_effort("save session", self.persistence.save(&session));
        best_effort(
            "schedule finish notification",
            self.presentation
                .schedule_finish_notification(seconds, self.settings.notification_sound),
        );
        best_effort(
            "start live surface",
            self.presentation
                .start_live_surface(session.planned_end_time, uv),
        );
        self.ticker.start();

        let event = SessionEvent::Started {
            planned_end_time: session.planned_end_time,
            uv_index: uv,
            burn_limit_dose: session.burn_limit_dose,
            at: now,
        };
        self.phase = Phase::Running(session);
        Ok(event)
    }

    /// Periodic recomputation, nominally once per second.
    ///
    /// When the planned end has passed the session finishes if
    /// `trigger_finish_if_due`, otherwise the countdown just reads zero.
    pub fn tick(&mut self, now: DateTime<Utc>, trigger_finish_if_due: bool) -> Option<SessionEvent> {
        let mut session = self.take_running()?;

        let bound = integration_bound(&session, now);
        dose::integrate(&mut session, bound);
        let remaining = seconds_until(session.planned_end_time, now);
        self.countdown.elapsed_seconds = elapsed_seconds(session.start_time, now);

        if remaining > 0 {
            self.countdown.remaining_seconds = remaining;
            let interval = self.settings.presentation_interval_seconds;
            if remaining % interval == 0 && self.countdown.last_presented != Some(remaining) {
                self.countdown.last_presented = Some(remaining);
                best_effort(
                    "update live surface",
                    self.presentation
                        .update_live_surface(session.planned_end_time, session.current_uv_index),
                );
            }
        } else if trigger_finish_if_due {
            return Some(self.finish(session, now, EndReason::ThresholdReached));
        } else {
            self.countdown.remaining_seconds = 0;
        }

        tracing::trace!(
            "Tick: {}s remaining, dose {:.1}",
            self.countdown.remaining_seconds,
            session.accumulated_dose
        );

        let event = SessionEvent::Ticked {
            remaining_seconds: self.countdown.remaining_seconds,
            elapsed_seconds: self.countdown.elapsed_seconds,
            accumulated_dose: session.accumulated_dose,
            at: now,
        };
        self.phase = Phase::Running(session);
        Some(event)
    }

    /// Apply a new ambient UV Index.
    ///
    /// Exposure up to `now` is integrated at the previous UV Index before
    /// the countdown is recomputed from the remaining dose budget.
    pub fn update_uv_index(&mut self, uv_index: f64, now: DateTime<Utc>) -> Option<SessionEvent> {
        let Some(mut session) = self.take_running() else {
            tracing::debug!("Ignoring UV Index {} with no running session", uv_index);
            return None;
        };

        let bound = integration_bound(&session, now);
        dose::integrate(&mut session, bound);
        if now >= session.planned_end_time {
            tracing::info!("UV Index {} arrived after the planned end", uv_index);
            return Some(self.finish(session, now, EndReason::ThresholdReached));
        }

        let uv = non_negative_uv(uv_index);
        session.current_uv_index = uv;

        let remaining =
            burn::remaining_seconds_for(session.burn_limit_dose, session.accumulated_dose, uv);
        if remaining <= 0 {
            tracing::info!("Dose budget spent at UV {:.1}, finishing session", uv);
            session.planned_end_time = session.planned_end_time.min(now);
            return Some(self.finish(session, now, EndReason::ThresholdReached));
        }

        replan(&mut session, now, remaining);
        tracing::info!(
            "UV Index now {:.1}: {}s remaining (ends {})",
            uv,
            remaining,
            session.planned_end_time
        );

        let event = SessionEvent::UvIndexUpdated {
            uv_index: uv,
            planned_end_time: session.planned_end_time,
            remaining_seconds: remaining,
            at: now,
        };
        self.commit(session, now);
        Some(event)
    }

    /// Grant a fixed amount of extra exposure.
    ///
    /// At a positive UV Index the dose budget grows by what the extension
    /// time is worth at the current rate. At UV Index 0 there is no dose to
    /// add, so the planned end is pushed back by the extension time instead,
    /// never beyond the 12 hour countdown cap.
    pub fn extend(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        let Some(mut session) = self.take_running() else {
            tracing::debug!("Ignoring extend with no running session");
            return None;
        };

        let bound = integration_bound(&session, now);
        dose::integrate(&mut session, bound);
        if now >= session.planned_end_time {
            tracing::info!("Extend requested after the planned end");
            return Some(self.finish(session, now, EndReason::ThresholdReached));
        }

        let extension = self.settings.extension_seconds;

        if session.current_uv_index > 0.0 {
            session.burn_limit_dose += session.current_uv_index * extension as f64;
            let remaining = burn::remaining_seconds_for(
                session.burn_limit_dose,
                session.accumulated_dose,
                session.current_uv_index,
            );
            if remaining <= 0 {
                session.planned_end_time = session.planned_end_time.min(now);
                return Some(self.finish(session, now, EndReason::ThresholdReached));
            }
            replan(&mut session, now, remaining);
        } else {
            let pushed = session.planned_end_time + Duration::seconds(extension);
            session.planned_end_time = pushed.min(now + Duration::seconds(MAX_REMAINING_SECONDS));
        }

        tracing::info!(
            "Extended session {}: budget {:.0}, ends {}",
            session.id,
            session.burn_limit_dose,
            session.planned_end_time
        );

        let event = SessionEvent::Extended {
            burn_limit_dose: session.burn_limit_dose,
            planned_end_time: session.planned_end_time,
            at: now,
        };
        self.commit(session, now);
        Some(event)
    }

    /// End the running session.
    ///
    /// A user stop ends at `now`; otherwise the session ends at its planned
    /// end with the threshold reached.
    pub fn stop(&mut self, now: DateTime<Utc>, user_initiated: bool) -> Option<SessionEvent> {
        let session = self.take_running()?;
        let reason = if user_initiated {
            EndReason::UserStopped
        } else {
            EndReason::ThresholdReached
        };
        Some(self.finish(session, now, reason))
    }

    /// Consume the finished snapshot, returning the controller to idle
    pub fn take_finished(&mut self) -> Option<FinishedSnapshot> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Finished(snapshot) => Some(snapshot),
            other => {
                self.phase = other;
                None
            }
        }
    }

    /// Back in the foreground after a suspension of unknown length.
    ///
    /// Catches up from the last integration time rather than counting
    /// missed ticks, then refreshes the live surface.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        let event = self.tick(now, true)?;
        if event.is_finished() {
            return Some(event);
        }

        if let Phase::Running(session) = &self.phase {
            best_effort(
                "update live surface",
                self.presentation
                    .update_live_surface(session.planned_end_time, session.current_uv_index),
            );
        }
        self.ticker.start();

        tracing::info!(
            "Resumed with {}s remaining",
            self.countdown.remaining_seconds
        );
        self.session().map(|session| SessionEvent::Resumed {
            remaining_seconds: self.countdown.remaining_seconds,
            accumulated_dose: session.accumulated_dose,
            at: now,
        })
    }

    /// Checkpoint before the process may be suspended or killed
    pub fn suspend(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        let Phase::Running(session) = &mut self.phase else {
            return None;
        };

        let bound = integration_bound(session, now);
        dose::integrate(session, bound);
        best_effort("save session", self.persistence.save(session));

        tracing::debug!("Suspended session {}", session.id);
        Some(SessionEvent::Suspended {
            accumulated_dose: session.accumulated_dose,
            at: now,
        })
    }

    /// Pick up persisted state at cold start.
    ///
    /// A session whose planned end is still ahead resumes running; one that
    /// ran out while the process was gone finishes at its planned end.
    pub fn reconcile(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        if !matches!(self.phase, Phase::Idle) {
            tracing::warn!("Reconcile skipped: controller is {:?}", self.state());
            return None;
        }

        let stored = match self.persistence.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::debug!("No persisted session to reconcile");
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to load persisted session: {}", e);
                return None;
            }
        };

        let mut session = match stored {
            StoredSession::Current(session) => session,
            StoredSession::Legacy(record) => {
                tracing::info!("Reconstructing dose for legacy session record");
                upgrade_legacy(record, now)
            }
        };

        if now >= session.planned_end_time {
            tracing::info!(
                "Session {} ended at {} while inactive",
                session.id,
                session.planned_end_time
            );
            let end = session.planned_end_time;
            dose::integrate(&mut session, end);
            return Some(self.finish(session, now, EndReason::ThresholdReached));
        }

        let bound = integration_bound(&session, now);
        dose::integrate(&mut session, bound);
        let remaining = seconds_until(session.planned_end_time, now);
        self.countdown = Countdown {
            remaining_seconds: remaining,
            elapsed_seconds: elapsed_seconds(session.start_time, now),
            last_presented: None,
        };

        if self.presentation.live_surface_active() {
            best_effort(
                "update live surface",
                self.presentation
                    .update_live_surface(session.planned_end_time, session.current_uv_index),
            );
        } else {
            best_effort(
                "start live surface",
                self.presentation
                    .start_live_surface(session.planned_end_time, session.current_uv_index),
            );
        }
        best_effort(
            "schedule finish notification",
            self.presentation
                .schedule_finish_notification(remaining, self.settings.notification_sound),
        );
        best_effort("save session", self.persistence.save(&session));
        self.ticker.start();

        tracing::info!(
            "Resumed session {} with {}s remaining, dose {:.1}",
            session.id,
            remaining,
            session.accumulated_dose
        );

        let event = SessionEvent::Resumed {
            remaining_seconds: remaining,
            accumulated_dose: session.accumulated_dose,
            at: now,
        };
        self.phase = Phase::Running(session);
        Some(event)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn take_running(&mut self) -> Option<ExposureSession> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Running(session) => Some(session),
            other => {
                self.phase = other;
                None
            }
        }
    }

    /// Store a re-planned session and tell presentation about the new end
    fn commit(&mut self, session: ExposureSession, now: DateTime<Utc>) {
        let remaining = seconds_until(session.planned_end_time, now).max(0);
        self.countdown.remaining_seconds = remaining;
        self.countdown.elapsed_seconds = elapsed_seconds(session.start_time, now);

        best_effort("save session", self.persistence.save(&session));
        best_effort(
            "schedule finish notification",
            self.presentation
                .schedule_finish_notification(remaining, self.settings.notification_sound),
        );
        best_effort(
            "update live surface",
            self.presentation
                .update_live_surface(session.planned_end_time, session.current_uv_index),
        );

        self.phase = Phase::Running(session);
    }

    /// Leave Running. Every exit path goes through here so the ticker is
    /// cancelled exactly once per session.
    fn finish(
        &mut self,
        mut session: ExposureSession,
        now: DateTime<Utc>,
        reason: EndReason,
    ) -> SessionEvent {
        let end = match reason {
            EndReason::UserStopped => now,
            EndReason::ThresholdReached => session.planned_end_time,
        };
        let until = end.min(session.planned_end_time);
        dose::integrate(&mut session, until);

        let snapshot = FinishedSnapshot {
            id: session.id,
            start_time: session.start_time,
            end_time: end,
            duration_seconds: elapsed_seconds(session.start_time, end),
            uv_index_at_end: session.current_uv_index,
            accumulated_dose: session.accumulated_dose,
            end_reason: reason,
        };

        self.ticker.cancel();
        best_effort(
            "cancel finish notification",
            self.presentation.cancel_finish_notification(),
        );
        best_effort("end live surface", self.presentation.end_live_surface());
        best_effort("clear persisted session", self.persistence.clear());
        best_effort("journal finished session", self.journal.record(&snapshot));

        tracing::info!(
            "Session {} finished ({:?}) after {}s, dose {:.1} ({:.2} SED)",
            snapshot.id,
            reason,
            snapshot.duration_seconds,
            snapshot.accumulated_dose,
            snapshot.standard_erythemal_dose()
        );

        self.countdown = Countdown::default();
        self.phase = Phase::Finished(snapshot.clone());
        SessionEvent::Finished { snapshot }
    }
}

/// Move the planned end to `now + remaining`, capped at 12 hours
fn replan(session: &mut ExposureSession, now: DateTime<Utc>, remaining: i64) {
    session.planned_end_time = now + Duration::seconds(remaining.min(MAX_REMAINING_SECONDS));
}

/// Rebuild dose fields for a record written before dose tracking,
/// assuming the UV Index never changed since the start.
fn upgrade_legacy(record: LegacyRecord, now: DateTime<Utc>) -> ExposureSession {
    let uv = non_negative_uv(record.current_uv_index);
    let integrated_until = now.min(record.planned_end_time).max(record.start_time);
    let planned_seconds = seconds_between(record.start_time, record.planned_end_time).max(0.0);

    ExposureSession {
        id: record.id.unwrap_or_else(Uuid::new_v4),
        start_time: record.start_time,
        planned_end_time: record.planned_end_time,
        current_uv_index: uv,
        accumulated_dose: uv * seconds_between(record.start_time, integrated_until),
        burn_limit_dose: uv * planned_seconds,
        last_dose_update_time: integrated_until,
    }
}

/// Whole seconds until `end`, rounded up; negative once `end` has passed
fn seconds_until(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    seconds_between(now, end).ceil() as i64
}

/// Whole seconds since `start`, never negative
fn elapsed_seconds(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_seconds().max(0)
}

fn best_effort(action: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!("Failed to {}: {}", action, e);
    }
}

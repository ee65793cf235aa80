//! Recording test doubles for the controller's collaborators.
//!
//! Each double writes into a shared log so tests can inspect calls after
//! the double has been moved into the controller.

use crate::gateway::{PersistenceGateway, PresentationGateway, Ticker};
use crate::journal::JournalSink;
use crate::{Error, ExposureSession, FinishedSnapshot, NotificationSound, Result, StoredSession};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Save(ExposureSession),
    Clear,
    ScheduleNotification(i64, NotificationSound),
    CancelNotification,
    StartSurface(DateTime<Utc>, f64),
    UpdateSurface(DateTime<Utc>, f64),
    EndSurface,
    TickerStart,
    TickerCancel,
    Journal(FinishedSnapshot),
}

/// Shared call log
#[derive(Clone, Debug, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn journaled(&self) -> Vec<FinishedSnapshot> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Journal(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

/// In-memory persistence, optionally failing every call
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    pub stored: Arc<Mutex<Option<StoredSession>>>,
    pub log: CallLog,
    pub fail: bool,
}

impl MemoryStore {
    pub fn with_record(record: StoredSession, log: CallLog) -> Self {
        Self {
            stored: Arc::new(Mutex::new(Some(record))),
            log,
            fail: false,
        }
    }

    pub fn current(&self) -> Option<StoredSession> {
        self.stored.lock().unwrap().clone()
    }
}

impl PersistenceGateway for MemoryStore {
    fn save(&mut self, session: &ExposureSession) -> Result<()> {
        self.log.push(Call::Save(session.clone()));
        if self.fail {
            return Err(Error::Other("disk full".into()));
        }
        *self.stored.lock().unwrap() = Some(StoredSession::Current(session.clone()));
        Ok(())
    }

    fn load(&mut self) -> Result<Option<StoredSession>> {
        if self.fail {
            return Err(Error::Other("disk unreadable".into()));
        }
        Ok(self.current())
    }

    fn clear(&mut self) -> Result<()> {
        self.log.push(Call::Clear);
        if self.fail {
            return Err(Error::Other("disk full".into()));
        }
        *self.stored.lock().unwrap() = None;
        Ok(())
    }
}

/// Presentation double recording every request
#[derive(Clone, Debug, Default)]
pub struct RecordingPresentation {
    pub log: CallLog,
    pub surface_active: bool,
    pub fail: bool,
}

impl RecordingPresentation {
    fn outcome(&self) -> Result<()> {
        if self.fail {
            Err(Error::Other("presentation unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl PresentationGateway for RecordingPresentation {
    fn schedule_finish_notification(
        &mut self,
        seconds_from_now: i64,
        sound: NotificationSound,
    ) -> Result<()> {
        self.log
            .push(Call::ScheduleNotification(seconds_from_now, sound));
        self.outcome()
    }

    fn cancel_finish_notification(&mut self) -> Result<()> {
        self.log.push(Call::CancelNotification);
        self.outcome()
    }

    fn start_live_surface(&mut self, planned_end_time: DateTime<Utc>, uv_index: f64) -> Result<()> {
        self.log.push(Call::StartSurface(planned_end_time, uv_index));
        self.surface_active = true;
        self.outcome()
    }

    fn update_live_surface(
        &mut self,
        planned_end_time: DateTime<Utc>,
        uv_index: f64,
    ) -> Result<()> {
        self.log.push(Call::UpdateSurface(planned_end_time, uv_index));
        self.outcome()
    }

    fn end_live_surface(&mut self) -> Result<()> {
        self.log.push(Call::EndSurface);
        self.surface_active = false;
        self.outcome()
    }

    fn live_surface_active(&self) -> bool {
        self.surface_active
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingTicker {
    pub log: CallLog,
}

impl Ticker for RecordingTicker {
    fn start(&mut self) {
        self.log.push(Call::TickerStart);
    }

    fn cancel(&mut self) {
        self.log.push(Call::TickerCancel);
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingJournal {
    pub log: CallLog,
}

impl JournalSink for RecordingJournal {
    fn record(&mut self, snapshot: &FinishedSnapshot) -> Result<()> {
        self.log.push(Call::Journal(snapshot.clone()));
        Ok(())
    }
}

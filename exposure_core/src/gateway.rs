//! Collaborator interfaces for the session controller.
//!
//! All calls are best-effort: the controller logs failures and keeps its
//! own state as the source of truth.

use crate::{ExposureSession, NotificationSound, Result, StoredSession};
use chrono::{DateTime, Utc};

/// Durable storage for the running session record
pub trait PersistenceGateway: Send {
    fn save(&mut self, session: &ExposureSession) -> Result<()>;
    fn load(&mut self) -> Result<Option<StoredSession>>;
    fn clear(&mut self) -> Result<()>;
}

/// Finish notification and glanceable surface ("live activity")
pub trait PresentationGateway: Send {
    fn schedule_finish_notification(
        &mut self,
        seconds_from_now: i64,
        sound: NotificationSound,
    ) -> Result<()>;
    fn cancel_finish_notification(&mut self) -> Result<()>;
    fn start_live_surface(&mut self, planned_end_time: DateTime<Utc>, uv_index: f64) -> Result<()>;
    fn update_live_surface(&mut self, planned_end_time: DateTime<Utc>, uv_index: f64)
        -> Result<()>;
    fn end_live_surface(&mut self) -> Result<()>;

    /// Whether a surface from this or an earlier process is still showing
    fn live_surface_active(&self) -> bool;
}

/// The periodic one-second tick source
pub trait Ticker: Send {
    fn start(&mut self);
    fn cancel(&mut self);
}

/// Ticker for front ends that drive `tick` themselves
#[derive(Debug, Default)]
pub struct NullTicker;

impl Ticker for NullTicker {
    fn start(&mut self) {}
    fn cancel(&mut self) {}
}

/// Presentation gateway that only reports requests through tracing.
///
/// Used by the CLI, where there is no notification center to talk to.
#[derive(Debug, Default)]
pub struct TracingPresentation {
    surface: Option<(DateTime<Utc>, f64)>,
}

impl TracingPresentation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresentationGateway for TracingPresentation {
    fn schedule_finish_notification(
        &mut self,
        seconds_from_now: i64,
        sound: NotificationSound,
    ) -> Result<()> {
        tracing::info!(
            "Finish notification scheduled in {}s (sound: {:?})",
            seconds_from_now.max(1),
            sound
        );
        Ok(())
    }

    fn cancel_finish_notification(&mut self) -> Result<()> {
        tracing::info!("Finish notification cancelled");
        Ok(())
    }

    fn start_live_surface(&mut self, planned_end_time: DateTime<Utc>, uv_index: f64) -> Result<()> {
        tracing::info!(
            "Live surface started: ends {} at UV {:.1}",
            planned_end_time,
            uv_index
        );
        self.surface = Some((planned_end_time, uv_index));
        Ok(())
    }

    fn update_live_surface(
        &mut self,
        planned_end_time: DateTime<Utc>,
        uv_index: f64,
    ) -> Result<()> {
        if self.surface.is_none() {
            tracing::debug!("No live surface to update");
            return Ok(());
        }
        tracing::debug!(
            "Live surface updated: ends {} at UV {:.1}",
            planned_end_time,
            uv_index
        );
        self.surface = Some((planned_end_time, uv_index));
        Ok(())
    }

    fn end_live_surface(&mut self) -> Result<()> {
        if self.surface.take().is_some() {
            tracing::info!("Live surface ended");
        }
        Ok(())
    }

    fn live_surface_active(&self) -> bool {
        self.surface.is_some()
    }
}

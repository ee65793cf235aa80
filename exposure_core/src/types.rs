//! Core domain types for the UV exposure engine.
//!
//! This module defines:
//! - Skin sensitivity classes and UV risk bands
//! - The running exposure session record
//! - The finished-session snapshot handed to the journal
//! - Status and profile types shared by the controller and front ends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Skin and UV Types
// ============================================================================

/// Skin sensitivity class, ordered from least to most tolerant.
///
/// Serialized as its number (1-6) so config files stay readable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum SkinClass {
    /// Always burns, never tans
    Type1,
    /// Always burns, tans minimally
    Type2,
    /// Burns moderately, tans uniformly
    Type3,
    /// Burns minimally, tans well
    Type4,
    /// Rarely burns, tans profusely
    Type5,
    /// Never burns, deeply pigmented
    Type6,
}

impl SkinClass {
    pub const ALL: [SkinClass; 6] = [
        SkinClass::Type1,
        SkinClass::Type2,
        SkinClass::Type3,
        SkinClass::Type4,
        SkinClass::Type5,
        SkinClass::Type6,
    ];

    /// Class number, 1 through 6
    pub fn number(self) -> u8 {
        match self {
            SkinClass::Type1 => 1,
            SkinClass::Type2 => 2,
            SkinClass::Type3 => 3,
            SkinClass::Type4 => 4,
            SkinClass::Type5 => 5,
            SkinClass::Type6 => 6,
        }
    }

    /// Look up a class by its number
    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.number() == n)
    }

    /// Minutes to burn at UV Index 1 without protection
    pub fn base_minutes(self) -> f64 {
        match self {
            SkinClass::Type1 => 10.0,
            SkinClass::Type2 => 20.0,
            SkinClass::Type3 => 30.0,
            SkinClass::Type4 => 45.0,
            SkinClass::Type5 => 60.0,
            SkinClass::Type6 => 90.0,
        }
    }
}

impl TryFrom<u8> for SkinClass {
    type Error = String;

    fn try_from(n: u8) -> std::result::Result<Self, Self::Error> {
        Self::from_number(n).ok_or_else(|| format!("skin class must be 1-6, got {}", n))
    }
}

impl From<SkinClass> for u8 {
    fn from(class: SkinClass) -> u8 {
        class.number()
    }
}

/// Risk band for a UV Index reading
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UvLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
    Extreme,
}

impl UvLevel {
    pub fn from_index(uv_index: f64) -> Self {
        match uv_index {
            uv if uv < 3.0 || uv.is_nan() => UvLevel::Low,
            uv if uv < 6.0 => UvLevel::Moderate,
            uv if uv < 8.0 => UvLevel::High,
            uv if uv < 11.0 => UvLevel::VeryHigh,
            _ => UvLevel::Extreme,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            UvLevel::Low => "low",
            UvLevel::Moderate => "moderate",
            UvLevel::High => "high",
            UvLevel::VeryHigh => "very high",
            UvLevel::Extreme => "extreme",
        }
    }
}

/// Sound used by the finish notification
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSound {
    #[default]
    Default,
    Ringtone,
    Mute,
}

// ============================================================================
// Session Types
// ============================================================================

/// Lifecycle state of the exposure session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    /// Finished but not yet consumed by the front end
    Finished,
}

/// Why a session ended
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    UserStopped,
    ThresholdReached,
}

/// The running exposure session record.
///
/// Only exists while a session is running; dose fields are in
/// UV-Index-seconds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExposureSession {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub planned_end_time: DateTime<Utc>,
    pub current_uv_index: f64,
    pub accumulated_dose: f64,
    pub burn_limit_dose: f64,
    pub last_dose_update_time: DateTime<Utc>,
}

/// Summary of a completed session, handed to the journal once
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FinishedSnapshot {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
    pub uv_index_at_end: f64,
    pub accumulated_dose: f64,
    pub end_reason: EndReason,
}

impl FinishedSnapshot {
    /// Dose in standard erythemal dose units
    pub fn standard_erythemal_dose(&self) -> f64 {
        crate::dose::standard_erythemal_dose(self.accumulated_dose)
    }
}

/// A persisted record as it comes back from storage.
///
/// Records written before dose tracking existed only carry the start time,
/// the planned end and the UV Index; those are reconstructed once during
/// reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub enum StoredSession {
    Current(ExposureSession),
    Legacy(LegacyRecord),
}

/// Persisted record without dose-tracking fields
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyRecord {
    pub id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub planned_end_time: DateTime<Utc>,
    pub current_uv_index: f64,
}

/// Read-only view of the controller for display
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub remaining_seconds: i64,
    pub elapsed_seconds: i64,
    pub current_uv_index: f64,
    pub accumulated_dose: f64,
    pub burn_limit_dose: f64,
    pub standard_erythemal_dose: f64,
    pub planned_end_time: Option<DateTime<Utc>>,
    pub finished: Option<FinishedSnapshot>,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            remaining_seconds: 0,
            elapsed_seconds: 0,
            current_uv_index: 0.0,
            accumulated_dose: 0.0,
            burn_limit_dose: 0.0,
            standard_erythemal_dose: 0.0,
            planned_end_time: None,
            finished: None,
        }
    }
}

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::rates::Fee;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PileClass {
    Fast,
    Slow,
}

impl PileClass {
    pub const ALL: [PileClass; 2] = [PileClass::Fast, PileClass::Slow];

    /// Letter that prefixes every ticket number of this class.
    pub fn ticket_prefix(self) -> char {
        match self {
            PileClass::Fast => 'F',
            PileClass::Slow => 'T',
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PileStatus {
    Available,
    Busy,
    Fault,
    Offline,
}

impl PileStatus {
    /// Whether a pile in this status may receive new queue entries.
    pub fn accepts_requests(self) -> bool {
        matches!(self, PileStatus::Available | PileStatus::Busy)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Waiting,
    Queuing,
    Charging,
    Finished,
    Canceled,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Finished | RequestStatus::Canceled)
    }

    /// Queuing or charging, i.e. holding a slot in some pile queue.
    pub fn is_active(self) -> bool {
        matches!(self, RequestStatus::Queuing | RequestStatus::Charging)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Charging,
    Completed,
    Interrupted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PileId(pub u32);

impl fmt::Display for PileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(transparent)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    pub(crate) fn new() -> Self {
        RequestId(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(transparent)]
pub struct SessionId(pub uuid::Uuid);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Admission number, strictly increasing per class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub class: PileClass,
    pub number: u32,
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class.ticket_prefix(), self.number)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pile {
    pub id: PileId,
    pub code: String,
    pub class: PileClass,
    pub status: PileStatus,
    /// Rated power in kWh per hour
    pub power: f64,
    pub total_sessions: u32,
    pub total_minutes: f64,
    pub total_energy: f64,
}

impl Pile {
    pub(crate) fn new(id: PileId, code: String, class: PileClass, power: f64) -> Self {
        Pile {
            id,
            code,
            class,
            status: PileStatus::Available,
            power,
            total_sessions: 0,
            total_minutes: 0.0,
            total_energy: 0.0,
        }
    }

    /// Minutes this pile needs to deliver `energy`.
    pub fn charge_minutes(&self, energy: f64) -> f64 {
        energy / self.power * 60.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeRequest {
    pub id: RequestId,
    pub ticket: Ticket,
    pub requester: String,
    pub class: PileClass,
    /// Requested energy in kWh
    pub energy: f64,
    pub battery_capacity: f64,
    /// Energy already delivered by earlier, interrupted sessions.
    pub delivered: f64,
    pub status: RequestStatus,
    pub pile: Option<PileId>,
    pub position: Option<usize>,
    pub session: Option<SessionId>,
    pub requested_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub ended_at: Option<NaiveDateTime>,
}

impl ChargeRequest {
    /// Energy still owed once earlier sessions are accounted for.
    pub fn remaining_energy(&self) -> f64 {
        (self.energy - self.delivered).max(0.0)
    }

    /// Energy delivered by the running session at `now`, capped at what is still owed.
    pub fn session_delivery(&self, power: f64, now: NaiveDateTime) -> f64 {
        match (self.status, self.started_at) {
            (RequestStatus::Charging, Some(started_at)) => {
                (elapsed_hours(started_at, now) * power).min(self.remaining_energy())
            }
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeSession {
    pub id: SessionId,
    pub request: RequestId,
    pub requester: String,
    pub pile: PileId,
    pub pile_code: String,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    pub energy: f64,
    pub fee: Option<Fee>,
    pub status: SessionStatus,
}

impl ChargeSession {
    /// Closed length of the session in minutes, zero while still open.
    pub fn minutes(&self) -> f64 {
        self.ended_at
            .map(|end| elapsed_hours(self.started_at, end) * 60.0)
            .unwrap_or(0.0)
    }
}

/// Append-only audit record of one request status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueLogEntry {
    pub request: RequestId,
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub pile: Option<PileId>,
    pub position: Option<usize>,
    pub reason: String,
    pub at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultRecord {
    pub pile: PileId,
    pub description: String,
    pub reported_at: NaiveDateTime,
    pub recovered_at: Option<NaiveDateTime>,
}

/// Hours between two instants, never negative.
pub fn elapsed_hours(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    let millis = (to - from).num_milliseconds().max(0);
    millis as f64 / 3_600_000.0
}

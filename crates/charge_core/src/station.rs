use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::StationConfig;
use crate::error::DispatchError;
use crate::events::StationEvent;
use crate::models::{
    ChargeRequest, ChargeSession, FaultRecord, Pile, PileClass, PileId, PileStatus,
    QueueLogEntry, RequestId, RequestStatus, SessionId, Ticket,
};

/// Authoritative state of one charging station.
///
/// Every public mutating method leaves the queue invariants intact when it
/// returns: dense zero-based positions per pile, a single charging request at
/// position 0, per-pile occupancy within the queue capacity and a waiting area
/// within its capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    station_id: String,
    pub(crate) piles: BTreeMap<PileId, Pile>,
    pub(crate) requests: HashMap<RequestId, ChargeRequest>,
    pub(crate) sessions: HashMap<SessionId, ChargeSession>,
    queue_log: Vec<QueueLogEntry>,
    pub(crate) faults: Vec<FaultRecord>,
    ticket_counters: BTreeMap<PileClass, u32>,
    #[serde(skip)]
    events: Vec<StationEvent>,
}

impl Station {
    pub fn new(config: &StationConfig) -> Self {
        let piles = config
            .piles
            .iter()
            .enumerate()
            .map(|(idx, pile)| {
                let id = PileId(idx as u32 + 1);
                (id, Pile::new(id, pile.code.clone(), pile.class, pile.power))
            })
            .collect();
        Station {
            station_id: config.station_id.clone(),
            piles,
            requests: HashMap::new(),
            sessions: HashMap::new(),
            queue_log: Vec::new(),
            faults: Vec::new(),
            ticket_counters: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station_id
    }

    pub fn piles(&self) -> impl Iterator<Item = &Pile> {
        self.piles.values()
    }

    pub fn pile(&self, id: PileId) -> Result<&Pile, DispatchError> {
        self.piles.get(&id).ok_or_else(|| DispatchError::PileNotFound {
            pile: id.to_string(),
        })
    }

    pub fn pile_by_code(&self, code: &str) -> Result<&Pile, DispatchError> {
        self.piles
            .values()
            .find(|pile| pile.code == code)
            .ok_or_else(|| DispatchError::PileNotFound {
                pile: code.to_string(),
            })
    }

    /// Piles of `class` in identifier order, restricted to `statuses` unless it is empty.
    pub fn piles_by_class(&self, class: PileClass, statuses: &[PileStatus]) -> Vec<&Pile> {
        self.piles
            .values()
            .filter(|pile| pile.class == class)
            .filter(|pile| statuses.is_empty() || statuses.contains(&pile.status))
            .collect()
    }

    pub(crate) fn set_pile_status(&mut self, id: PileId, status: PileStatus) {
        let Some(pile) = self.piles.get_mut(&id) else {
            return;
        };
        if pile.status == status {
            return;
        }
        tracing::info!("Pile {} {:?} -> {:?}", pile.code, pile.status, status);
        pile.status = status;
        let event = StationEvent::PileStatusChanged {
            pile: id,
            code: pile.code.clone(),
            status,
        };
        self.events.push(event);
    }

    pub(crate) fn bump_counters(&mut self, id: PileId, energy: f64, minutes: f64) {
        if let Some(pile) = self.piles.get_mut(&id) {
            pile.total_sessions += 1;
            pile.total_energy += energy;
            pile.total_minutes += minutes;
        }
    }

    pub fn request(&self, id: RequestId) -> Result<&ChargeRequest, DispatchError> {
        self.requests
            .get(&id)
            .ok_or(DispatchError::RequestNotFound { request_id: id })
    }

    pub(crate) fn request_mut(
        &mut self,
        id: RequestId,
    ) -> Result<&mut ChargeRequest, DispatchError> {
        self.requests
            .get_mut(&id)
            .ok_or(DispatchError::RequestNotFound { request_id: id })
    }

    pub fn requests(&self) -> impl Iterator<Item = &ChargeRequest> {
        self.requests.values()
    }

    pub fn session(&self, id: SessionId) -> Option<&ChargeSession> {
        self.sessions.get(&id)
    }

    /// Closed sessions of one requester, oldest first.
    pub fn bills_for(&self, requester: &str) -> Vec<&ChargeSession> {
        let mut bills: Vec<&ChargeSession> = self
            .sessions
            .values()
            .filter(|session| session.requester == requester && session.fee.is_some())
            .collect();
        bills.sort_by_key(|session| session.started_at);
        bills
    }

    pub fn queue_log(&self) -> &[QueueLogEntry] {
        &self.queue_log
    }

    pub fn faults(&self) -> &[FaultRecord] {
        &self.faults
    }

    /// Drain the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<StationEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, event: StationEvent) {
        self.events.push(event);
    }

    pub(crate) fn next_ticket(&mut self, class: PileClass) -> Ticket {
        let counter = self.ticket_counters.entry(class).or_insert(0);
        *counter += 1;
        Ticket {
            class,
            number: *counter,
        }
    }

    /// Move a request to `to`, recording the change in the queue log.
    pub(crate) fn transition(
        &mut self,
        id: RequestId,
        to: RequestStatus,
        reason: impl Into<String>,
        now: NaiveDateTime,
    ) -> Result<(), DispatchError> {
        let request = self.request_mut(id)?;
        let from = request.status;
        request.status = to;
        let entry = QueueLogEntry {
            request: id,
            from,
            to,
            pile: request.pile,
            position: request.position,
            reason: reason.into(),
            at: now,
        };
        let event = StationEvent::RequestStatusChanged {
            request: id,
            requester: request.requester.clone(),
            from,
            to,
        };
        tracing::info!(
            "Request {} {:?} -> {:?}: {}",
            request.ticket,
            from,
            to,
            entry.reason
        );
        self.queue_log.push(entry);
        self.events.push(event);
        Ok(())
    }

    /// Every invariant violation currently present, empty when the station is consistent.
    pub fn invariant_violations(&self, queue_len: usize, waiting_area_size: usize) -> Vec<String> {
        let mut violations = Vec::new();
        for pile in self.piles.values() {
            let queue = self.pile_queue(pile.id);
            if queue.len() > queue_len {
                violations.push(format!(
                    "pile {} holds {} requests, capacity {}",
                    pile.code,
                    queue.len(),
                    queue_len
                ));
            }
            for (idx, request) in queue.iter().enumerate() {
                if request.position != Some(idx) {
                    violations.push(format!(
                        "pile {} has {} at position {:?}, expected {}",
                        pile.code, request.ticket, request.position, idx
                    ));
                }
                if request.status == RequestStatus::Charging && idx != 0 {
                    violations.push(format!(
                        "pile {} has {} charging at position {}",
                        pile.code, request.ticket, idx
                    ));
                }
            }
        }
        for request in self.requests.values() {
            if request.status.is_active() && request.pile.is_none() {
                violations.push(format!(
                    "{} is {:?} without a pile",
                    request.ticket, request.status
                ));
            }
        }
        let waiting = self.waiting_count();
        if waiting > waiting_area_size {
            violations.push(format!(
                "waiting area holds {} requests, capacity {}",
                waiting, waiting_area_size
            ));
        }
        violations
    }
}

//! Request lifecycle: WAITING -> QUEUING -> CHARGING -> FINISHED, with
//! CANCELED reachable from every non-terminal state.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::models::{
    ChargeRequest, ChargeSession, PileClass, PileId, PileStatus, RequestId, RequestStatus,
    SessionId, SessionStatus, Ticket,
};
use crate::rates::RateLookup;
use crate::station::Station;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub id: RequestId,
    pub ticket: Ticket,
}

/// A positive finite amount, within the battery when its capacity is known.
fn validate_energy(energy: f64, battery_capacity: f64) -> Result<(), DispatchError> {
    let fits = battery_capacity <= 0.0 || energy <= battery_capacity;
    if energy.is_finite() && energy > 0.0 && fits {
        Ok(())
    } else {
        Err(DispatchError::InvalidAmount { amount: energy })
    }
}

impl Station {
    /// Admit a new request into the waiting area and try to dispatch it right away.
    pub fn submit(
        &mut self,
        class: PileClass,
        energy: f64,
        battery_capacity: f64,
        requester: impl Into<String>,
        cfg: &DispatchConfig,
        now: NaiveDateTime,
    ) -> Result<Admission, DispatchError> {
        validate_energy(energy, battery_capacity)?;
        if self.waiting_count() >= cfg.waiting_area_size {
            return Err(DispatchError::WaitingAreaFull {
                capacity: cfg.waiting_area_size,
            });
        }

        let ticket = self.next_ticket(class);
        let request = ChargeRequest {
            id: RequestId::new(),
            ticket,
            requester: requester.into(),
            class,
            energy,
            battery_capacity,
            delivered: 0.0,
            status: RequestStatus::Waiting,
            pile: None,
            position: None,
            session: None,
            requested_at: now,
            started_at: None,
            ended_at: None,
        };
        tracing::info!("Admitted {} for {} ({} kWh)", ticket, request.requester, energy);
        let id = self.enqueue_waiting(request, cfg.waiting_area_size)?;

        self.dispatch(cfg, now);
        Ok(Admission { id, ticket })
    }

    /// Change the class or amount of a request still in the waiting area.
    ///
    /// A class change issues a fresh ticket, sending the request to the back of
    /// the new class.
    pub fn modify_request(
        &mut self,
        id: RequestId,
        requester: &str,
        class: Option<PileClass>,
        energy: Option<f64>,
        cfg: &DispatchConfig,
        now: NaiveDateTime,
    ) -> Result<Ticket, DispatchError> {
        let request = self.owned_request(id, requester)?;
        let (status, current, battery) =
            (request.status, request.class, request.battery_capacity);
        if status != RequestStatus::Waiting {
            return Err(DispatchError::InvalidState {
                request_id: id,
                status,
                operation: "modify",
            });
        }
        if let Some(energy) = energy {
            validate_energy(energy, battery)?;
        }
        let new_ticket = match class {
            Some(class) if class != current => Some(self.next_ticket(class)),
            _ => None,
        };

        let request = self.request_mut(id)?;
        if let Some(energy) = energy {
            request.energy = energy;
        }
        if let Some(ticket) = new_ticket {
            request.class = ticket.class;
            request.ticket = ticket;
        }
        let ticket = request.ticket;
        self.transition(id, RequestStatus::Waiting, format!("modified, now {}", ticket), now)?;

        self.dispatch(cfg, now);
        Ok(ticket)
    }

    /// Place a waiting request at the tail of `pile`, starting it when it lands
    /// on an idle pile.
    pub(crate) fn assign(
        &mut self,
        id: RequestId,
        pile_id: PileId,
        cross_class: bool,
        cfg: &DispatchConfig,
        now: NaiveDateTime,
    ) -> Result<usize, DispatchError> {
        let request = self.request(id)?;
        if request.status != RequestStatus::Waiting {
            return Err(DispatchError::InvalidState {
                request_id: id,
                status: request.status,
                operation: "assign",
            });
        }
        let class = request.class;
        let pile = self.pile(pile_id)?;
        if !cross_class && pile.class != class {
            return Err(DispatchError::ClassMismatch {
                request: class,
                pile: pile.code.clone(),
                pile_class: pile.class,
            });
        }
        if !pile.status.accepts_requests() {
            return Err(DispatchError::InvalidPileState {
                pile: pile.code.clone(),
                operation: "assign to",
                reason: format!("pile is {:?}", pile.status),
            });
        }
        let code = pile.code.clone();
        let across = if pile.class != class { " across classes" } else { "" };

        let position = self.assign_slot(id, pile_id, cfg.queue_len)?;
        self.transition(
            id,
            RequestStatus::Queuing,
            format!("assigned{} to pile {} at position {}", across, code, position),
            now,
        )?;
        if position == 0 {
            self.start_charging(id, now)?;
        } else if self.pile(pile_id)?.status == PileStatus::Available {
            self.set_pile_status(pile_id, PileStatus::Busy);
        }
        Ok(position)
    }

    /// Start charging the head of a pile queue.
    pub fn start_charging(
        &mut self,
        id: RequestId,
        now: NaiveDateTime,
    ) -> Result<SessionId, DispatchError> {
        let request = self.request(id)?;
        let invalid = DispatchError::InvalidState {
            request_id: id,
            status: request.status,
            operation: "start charging",
        };
        if request.status != RequestStatus::Queuing || request.position != Some(0) {
            return Err(invalid);
        }
        let Some(pile_id) = request.pile else {
            return Err(invalid);
        };
        let requester = request.requester.clone();
        let pile = self.pile(pile_id)?;
        if !pile.status.accepts_requests() {
            return Err(DispatchError::InvalidPileState {
                pile: pile.code.clone(),
                operation: "start charging on",
                reason: format!("pile is {:?}", pile.status),
            });
        }
        let (pile_code, pile_status) = (pile.code.clone(), pile.status);

        let session = ChargeSession {
            id: SessionId(uuid::Uuid::new_v4()),
            request: id,
            requester,
            pile: pile_id,
            pile_code: pile_code.clone(),
            started_at: now,
            ended_at: None,
            energy: 0.0,
            fee: None,
            status: SessionStatus::Charging,
        };
        let session_id = session.id;
        self.sessions.insert(session_id, session);

        let request = self.request_mut(id)?;
        request.session = Some(session_id);
        request.started_at = Some(now);
        self.transition(
            id,
            RequestStatus::Charging,
            format!("charging started on pile {}", pile_code),
            now,
        )?;
        if pile_status == PileStatus::Available {
            self.set_pile_status(pile_id, PileStatus::Busy);
        }
        Ok(session_id)
    }

    /// Complete a charging request and hand its slot to the next in line.
    ///
    /// `reported` is the energy the client says it received; without it the
    /// delivery is derived from elapsed time and rated power. Either way it is
    /// capped at the energy still owed.
    pub fn finish_charging(
        &mut self,
        id: RequestId,
        reported: Option<f64>,
        cfg: &DispatchConfig,
        rates: &dyn RateLookup,
        now: NaiveDateTime,
    ) -> Result<Option<ChargeSession>, DispatchError> {
        let request = self.request(id)?;
        let invalid = DispatchError::InvalidState {
            request_id: id,
            status: request.status,
            operation: "finish",
        };
        if request.status != RequestStatus::Charging {
            return Err(invalid);
        }
        let Some(pile_id) = request.pile else {
            return Err(invalid);
        };
        let power = self.pile(pile_id)?.power;
        let owed = request.remaining_energy();
        let delivered = match reported {
            Some(energy) => energy.max(0.0).min(owed),
            None => request.session_delivery(power, now),
        };

        let session = self.close_session(id, SessionStatus::Completed, delivered, rates, now);
        let request = self.request_mut(id)?;
        request.delivered += delivered;
        request.ended_at = Some(now);
        self.transition(id, RequestStatus::Finished, "charging complete", now)?;
        self.release_slot(id)?;
        self.settle_pile(pile_id, now);
        self.dispatch(cfg, now);
        Ok(session)
    }

    /// Cancel a request in any non-terminal state.
    pub fn cancel(
        &mut self,
        id: RequestId,
        requester: &str,
        cfg: &DispatchConfig,
        rates: &dyn RateLookup,
        now: NaiveDateTime,
    ) -> Result<(), DispatchError> {
        let request = self.owned_request(id, requester)?;
        let status = request.status;
        if status.is_terminal() {
            return Err(DispatchError::InvalidState {
                request_id: id,
                status,
                operation: "cancel",
            });
        }

        if status == RequestStatus::Charging {
            self.interrupt_session(id, rates, now)?;
        }
        self.request_mut(id)?.ended_at = Some(now);
        self.transition(id, RequestStatus::Canceled, "canceled by requester", now)?;
        if status == RequestStatus::Waiting {
            return Ok(());
        }

        if let Some((pile, _)) = self.release_slot(id)? {
            self.settle_pile(pile, now);
        }
        self.dispatch(cfg, now);
        Ok(())
    }

    /// Lookup that hides requests of other requesters.
    fn owned_request(
        &self,
        id: RequestId,
        requester: &str,
    ) -> Result<&ChargeRequest, DispatchError> {
        self.request(id)
            .ok()
            .filter(|request| request.requester == requester)
            .ok_or(DispatchError::RequestNotFound { request_id: id })
    }

    /// Close the running session of a charging request with a partial bill.
    ///
    /// The request keeps its status; the caller decides where it goes next.
    pub(crate) fn interrupt_session(
        &mut self,
        id: RequestId,
        rates: &dyn RateLookup,
        now: NaiveDateTime,
    ) -> Result<Option<ChargeSession>, DispatchError> {
        let request = self.request(id)?;
        let Some(pile) = request.pile else {
            return Ok(None);
        };
        let delivered = request.session_delivery(self.pile(pile)?.power, now);
        let session = self.close_session(id, SessionStatus::Interrupted, delivered, rates, now);
        if session.is_some() {
            self.request_mut(id)?.delivered += delivered;
        }
        Ok(session)
    }

    fn close_session(
        &mut self,
        id: RequestId,
        status: SessionStatus,
        energy: f64,
        rates: &dyn RateLookup,
        now: NaiveDateTime,
    ) -> Option<ChargeSession> {
        let session_id = self.request_mut(id).ok()?.session.take()?;
        let session = self.sessions.get_mut(&session_id)?;
        session.ended_at = Some(now);
        session.energy = energy;
        session.fee = Some(rates.cost_of(session.started_at, now, energy));
        session.status = status;
        let closed = session.clone();

        tracing::info!(
            "Session {} on pile {} {:?}: {:.2} kWh, fee {:.2}",
            closed.id,
            closed.pile_code,
            status,
            energy,
            closed.fee.map_or(0.0, |fee| fee.total_fee)
        );
        self.bump_counters(closed.pile, energy, closed.minutes());
        Some(closed)
    }

    /// Promote the head of `pile` if it is waiting to charge and align the pile
    /// status with its occupancy.
    pub(crate) fn settle_pile(&mut self, pile: PileId, now: NaiveDateTime) {
        let Ok(status) = self.pile(pile).map(|p| p.status) else {
            return;
        };
        let head = self
            .pile_queue(pile)
            .first()
            .map(|request| (request.id, request.status));
        if let Some((head, RequestStatus::Queuing)) = head {
            if status.accepts_requests() {
                if let Err(error) = self.start_charging(head, now) {
                    tracing::error!("Could not promote {} on pile {}: {}", head, pile, error);
                }
            }
        }

        let occupancy = self.pile_occupancy(pile);
        match self.pile(pile).map(|p| p.status) {
            Ok(PileStatus::Busy) if occupancy == 0 => {
                self.set_pile_status(pile, PileStatus::Available)
            }
            Ok(PileStatus::Available) if occupancy > 0 => {
                self.set_pile_status(pile, PileStatus::Busy)
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::config::StationConfig;
    use crate::error::ErrorKind;
    use crate::rates::TieredRates;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn minutes(n: i64) -> NaiveDateTime {
        t0() + Duration::minutes(n)
    }

    fn default_station() -> Station {
        Station::new(&StationConfig::default_station())
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_submit_to_idle_pile_starts_charging() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();

        let admission = station
            .submit(PileClass::Fast, 10.0, 60.0, "alice", &cfg, t0())
            .expect("Could not submit");

        assert_eq!(admission.ticket.to_string(), "F1");
        let request = station.request(admission.id).unwrap();
        assert_eq!(request.status, RequestStatus::Charging);
        assert_eq!(request.pile, Some(PileId(1)));
        assert_eq!(request.position, Some(0));
        assert!(request.session.is_some());
        assert_eq!(station.pile(PileId(1)).unwrap().status, PileStatus::Busy);
    }

    #[test]
    fn test_submit_queues_behind_the_soonest_pile() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        station.submit(PileClass::Fast, 10.0, 60.0, "alice", &cfg, t0()).unwrap();
        station.submit(PileClass::Fast, 30.0, 60.0, "bob", &cfg, t0()).unwrap();

        // 20 + 30 minutes on A against 60 + 30 on B
        let third = station
            .submit(PileClass::Fast, 15.0, 60.0, "carol", &cfg, t0())
            .unwrap();

        let request = station.request(third.id).unwrap();
        assert_eq!(request.status, RequestStatus::Queuing);
        assert_eq!(request.pile, Some(PileId(1)));
        assert_eq!(request.position, Some(1));
    }

    #[test]
    fn test_submit_rejects_bad_amounts() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();

        for energy in [0.0, -3.0, f64::NAN] {
            let result = station.submit(PileClass::Slow, energy, 60.0, "alice", &cfg, t0());
            assert!(matches!(result, Err(DispatchError::InvalidAmount { .. })));
        }
        let result = station.submit(PileClass::Slow, 80.0, 60.0, "alice", &cfg, t0());
        assert!(matches!(result, Err(DispatchError::InvalidAmount { .. })));
        assert_eq!(station.requests().count(), 0);
    }

    #[test]
    fn test_finish_promotes_next_and_bills() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        let rates = TieredRates::default();
        let first = station.submit(PileClass::Fast, 10.0, 60.0, "alice", &cfg, t0()).unwrap();
        station.submit(PileClass::Fast, 30.0, 60.0, "bob", &cfg, t0()).unwrap();
        let third = station.submit(PileClass::Fast, 15.0, 60.0, "carol", &cfg, t0()).unwrap();

        let session = station
            .finish_charging(first.id, None, &cfg, &rates, minutes(20))
            .expect("Could not finish")
            .expect("No session closed");

        assert!(close(session.energy, 10.0));
        assert_eq!(session.status, SessionStatus::Completed);
        let fee = session.fee.unwrap();
        assert!(close(fee.energy_fee, 10.0 * 0.7));
        assert!(close(fee.service_fee, 10.0 * 0.8));

        let finished = station.request(first.id).unwrap();
        assert_eq!(finished.status, RequestStatus::Finished);
        assert_eq!(finished.pile, None);
        assert!(close(finished.delivered, 10.0));

        let promoted = station.request(third.id).unwrap();
        assert_eq!(promoted.status, RequestStatus::Charging);
        assert_eq!(promoted.position, Some(0));
        assert_eq!(station.pile(PileId(1)).unwrap().total_sessions, 1);
        assert_eq!(station.bills_for("alice").len(), 1);
    }

    #[test]
    fn test_finish_caps_reported_energy_and_frees_pile() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        let rates = TieredRates::default();
        let admission = station.submit(PileClass::Slow, 7.0, 40.0, "alice", &cfg, t0()).unwrap();

        let session = station
            .finish_charging(admission.id, Some(50.0), &cfg, &rates, minutes(30))
            .unwrap()
            .unwrap();

        assert!(close(session.energy, 7.0));
        let pile = station.pile(PileId(3)).unwrap();
        assert_eq!(pile.status, PileStatus::Available);
        assert!(close(pile.total_energy, 7.0));
        assert!(close(pile.total_minutes, 30.0));
    }

    #[test]
    fn test_finish_requires_charging() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        let rates = TieredRates::default();
        station.submit(PileClass::Fast, 10.0, 60.0, "alice", &cfg, t0()).unwrap();
        station.submit(PileClass::Fast, 10.0, 60.0, "bob", &cfg, t0()).unwrap();
        let queued = station.submit(PileClass::Fast, 10.0, 60.0, "carol", &cfg, t0()).unwrap();

        let result = station.finish_charging(queued.id, None, &cfg, &rates, minutes(5));
        assert!(matches!(
            result,
            Err(DispatchError::InvalidState { operation: "finish", .. })
        ));
        let result = station.start_charging(queued.id, minutes(5));
        assert!(matches!(
            result,
            Err(DispatchError::InvalidState { operation: "start charging", .. })
        ));
    }

    #[test]
    fn test_cancel_waiting_request() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        let rates = TieredRates::default();
        for requester in ["a", "b", "c", "d"] {
            station.submit(PileClass::Fast, 10.0, 60.0, requester, &cfg, t0()).unwrap();
        }
        let waiting = station.submit(PileClass::Fast, 10.0, 60.0, "e", &cfg, t0()).unwrap();
        assert_eq!(station.waiting_count(), 1);

        station.cancel(waiting.id, "e", &cfg, &rates, minutes(1)).unwrap();

        assert_eq!(station.waiting_count(), 0);
        let request = station.request(waiting.id).unwrap();
        assert_eq!(request.status, RequestStatus::Canceled);
        assert_eq!(request.ended_at, Some(minutes(1)));
    }

    #[test]
    fn test_cancel_charging_bills_partial_energy() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        let rates = TieredRates::default();
        let first = station.submit(PileClass::Fast, 30.0, 60.0, "alice", &cfg, t0()).unwrap();
        station.submit(PileClass::Fast, 30.0, 60.0, "bob", &cfg, t0()).unwrap();
        let third = station.submit(PileClass::Fast, 30.0, 60.0, "carol", &cfg, t0()).unwrap();

        station.cancel(first.id, "alice", &cfg, &rates, minutes(10)).unwrap();

        let bills = station.bills_for("alice");
        assert_eq!(bills.len(), 1);
        assert_eq!(bills[0].status, SessionStatus::Interrupted);
        assert!(close(bills[0].energy, 5.0));
        assert!(close(station.request(first.id).unwrap().delivered, 5.0));

        let promoted = station.request(third.id).unwrap();
        assert_eq!(promoted.status, RequestStatus::Charging);
        assert_eq!(promoted.pile, Some(PileId(1)));
        assert_eq!(promoted.position, Some(0));
    }

    #[test]
    fn test_cancel_is_rejected_once_terminal() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        let rates = TieredRates::default();
        let admission = station.submit(PileClass::Fast, 10.0, 60.0, "alice", &cfg, t0()).unwrap();
        station.cancel(admission.id, "alice", &cfg, &rates, minutes(1)).unwrap();
        let log_len = station.queue_log().len();

        let result = station.cancel(admission.id, "alice", &cfg, &rates, minutes(2));

        assert!(matches!(
            result,
            Err(DispatchError::InvalidState {
                status: RequestStatus::Canceled,
                ..
            })
        ));
        assert_eq!(station.queue_log().len(), log_len);
    }

    #[test]
    fn test_cancel_by_someone_else_is_not_found() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        let rates = TieredRates::default();
        let admission = station.submit(PileClass::Fast, 10.0, 60.0, "alice", &cfg, t0()).unwrap();

        let result = station.cancel(admission.id, "mallory", &cfg, &rates, minutes(1));

        assert_eq!(
            result,
            Err(DispatchError::RequestNotFound {
                request_id: admission.id
            })
        );
        assert_eq!(station.request(admission.id).unwrap().status, RequestStatus::Charging);
    }

    #[test]
    fn test_modify_class_issues_new_ticket() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        for requester in ["a", "b", "c", "d"] {
            station.submit(PileClass::Fast, 10.0, 60.0, requester, &cfg, t0()).unwrap();
        }
        let waiting = station.submit(PileClass::Fast, 10.0, 60.0, "e", &cfg, t0()).unwrap();
        assert_eq!(waiting.ticket.to_string(), "F5");

        let ticket = station
            .modify_request(waiting.id, "e", Some(PileClass::Slow), Some(14.0), &cfg, minutes(1))
            .unwrap();

        assert_eq!(ticket.to_string(), "T1");
        let request = station.request(waiting.id).unwrap();
        assert_eq!(request.class, PileClass::Slow);
        assert!(close(request.energy, 14.0));
        assert_eq!(request.status, RequestStatus::Charging);
        assert_eq!(request.pile, Some(PileId(3)));
    }

    #[test]
    fn test_modify_rejects_amount_above_battery() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        for requester in ["a", "b", "c", "d"] {
            station.submit(PileClass::Fast, 10.0, 60.0, requester, &cfg, t0()).unwrap();
        }
        let waiting = station.submit(PileClass::Fast, 10.0, 40.0, "e", &cfg, t0()).unwrap();

        let result = station.modify_request(waiting.id, "e", None, Some(55.0), &cfg, t0());

        assert!(matches!(result, Err(DispatchError::InvalidAmount { .. })));
        let request = station.request(waiting.id).unwrap();
        assert!(close(request.energy, 10.0));
        assert_eq!(request.status, RequestStatus::Waiting);
    }

    #[test]
    fn test_assign_to_other_class_is_mismatch() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        for pile in station.piles.values_mut() {
            if pile.class == PileClass::Slow {
                pile.status = PileStatus::Offline;
            }
        }
        let admission = station.submit(PileClass::Slow, 7.0, 60.0, "alice", &cfg, t0()).unwrap();
        assert_eq!(
            station.request(admission.id).unwrap().status,
            RequestStatus::Waiting
        );

        let error = station
            .assign(admission.id, PileId(1), false, &cfg, t0())
            .unwrap_err();

        assert!(matches!(error, DispatchError::ClassMismatch { .. }));
        assert_eq!(error.kind(), ErrorKind::ClassMismatch);
        let request = station.request(admission.id).unwrap();
        assert_eq!(request.status, RequestStatus::Waiting);
        assert_eq!(request.pile, None);
        assert_eq!(station.pile_occupancy(PileId(1)), 0);
    }

    #[test]
    fn test_modify_outside_waiting_area_fails() {
        let mut station = default_station();
        let cfg = DispatchConfig::default();
        let admission = station.submit(PileClass::Fast, 10.0, 60.0, "alice", &cfg, t0()).unwrap();

        let result = station.modify_request(admission.id, "alice", None, Some(20.0), &cfg, t0());

        assert!(matches!(
            result,
            Err(DispatchError::InvalidState { operation: "modify", .. })
        ));
        assert!(close(station.request(admission.id).unwrap().energy, 10.0));
    }
}

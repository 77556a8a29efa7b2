//! Periodic reconciliation: finish overdue charges, repair drifted pile queues
//! and dispatch whatever fits.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::estimate::EPSILON;
use crate::models::{PileId, RequestId, RequestStatus, SessionStatus};
use crate::rates::RateLookup;
use crate::station::Station;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub finished: Vec<RequestId>,
    pub repairs: Vec<String>,
    pub dispatched: Vec<RequestId>,
    pub errors: Vec<String>,
}

impl SweepReport {
    pub fn is_quiet(&self) -> bool {
        self.finished.is_empty()
            && self.repairs.is_empty()
            && self.dispatched.is_empty()
            && self.errors.is_empty()
    }
}

impl Station {
    /// One reconciliation pass. Errors on individual requests are collected in
    /// the report and never stop the pass.
    pub fn reconcile(
        &mut self,
        cfg: &DispatchConfig,
        rates: &dyn RateLookup,
        now: NaiveDateTime,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        let mut charging: Vec<(u32, RequestId)> = self
            .requests
            .values()
            .filter(|request| request.status == RequestStatus::Charging)
            .map(|request| (request.ticket.number, request.id))
            .collect();
        charging.sort_by_key(|(number, _)| *number);
        for (_, id) in charging {
            let outcome = self.charge_due(id, now).and_then(|due| {
                if due {
                    self.finish_charging(id, None, cfg, rates, now).map(|_| true)
                } else {
                    Ok(false)
                }
            });
            match outcome {
                Ok(true) => report.finished.push(id),
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!("Sweep could not finish {}: {}", id, error);
                    report.errors.push(error.to_string());
                }
            }
        }

        if let Err(error) = self.return_orphans(rates, now, &mut report) {
            report.errors.push(error.to_string());
        }
        let piles: Vec<PileId> = self.piles.keys().copied().collect();
        for pile in piles {
            if let Err(error) = self.repair_pile(pile, rates, now, &mut report) {
                tracing::warn!("Sweep could not repair pile {}: {}", pile, error);
                report.errors.push(error.to_string());
            }
        }

        report.dispatched = self.dispatch(cfg, now);
        if !report.is_quiet() {
            tracing::info!(
                "Sweep finished {}, repaired {}, dispatched {}, {} error(s)",
                report.finished.len(),
                report.repairs.len(),
                report.dispatched.len(),
                report.errors.len()
            );
        }
        report
    }

    /// Whether the running charge of `id` has delivered everything it asked for.
    fn charge_due(&self, id: RequestId, now: NaiveDateTime) -> Result<bool, DispatchError> {
        let request = self.request(id)?;
        let pile = request.pile.ok_or(DispatchError::InvalidState {
            request_id: id,
            status: request.status,
            operation: "finish",
        })?;
        let power = self.pile(pile)?.power;
        Ok(request.session_delivery(power, now) >= request.remaining_energy() - EPSILON)
    }

    /// Active requests that lost their pile go back to the waiting area.
    fn return_orphans(
        &mut self,
        rates: &dyn RateLookup,
        now: NaiveDateTime,
        report: &mut SweepReport,
    ) -> Result<(), DispatchError> {
        let orphans: Vec<RequestId> = self
            .requests
            .values()
            .filter(|request| request.status.is_active() && request.pile.is_none())
            .map(|request| request.id)
            .collect();
        for id in orphans {
            if let Some(session_id) = self.request_mut(id)?.session.take() {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.ended_at = Some(now);
                    session.fee = Some(rates.cost_of(session.started_at, now, 0.0));
                    session.status = SessionStatus::Interrupted;
                }
            }
            let request = self.request_mut(id)?;
            request.position = None;
            request.started_at = None;
            self.transition(id, RequestStatus::Waiting, "lost its pile", now)?;
            report.repairs.push(format!("returned orphaned {} to the waiting area", id));
        }
        Ok(())
    }

    fn repair_pile(
        &mut self,
        pile: PileId,
        rates: &dyn RateLookup,
        now: NaiveDateTime,
        report: &mut SweepReport,
    ) -> Result<(), DispatchError> {
        let code = self.pile(pile)?.code.clone();
        let queue: Vec<(RequestId, Option<usize>, RequestStatus)> = self
            .pile_queue(pile)
            .into_iter()
            .map(|request| (request.id, request.position, request.status))
            .collect();

        for (idx, (id, position, status)) in queue.iter().copied().enumerate() {
            if position != Some(idx) {
                self.request_mut(id)?.position = Some(idx);
                report.repairs.push(format!(
                    "renumbered {} on pile {} from {:?} to {}",
                    id, code, position, idx
                ));
            }
            if idx > 0 && status == RequestStatus::Charging {
                self.interrupt_session(id, rates, now)?;
                self.request_mut(id)?.started_at = None;
                self.transition(id, RequestStatus::Queuing, "charging behind the head", now)?;
                report.repairs.push(format!(
                    "demoted {} charging at position {} on pile {}",
                    id, idx, code
                ));
            }
        }

        let stalled_head = queue
            .first()
            .is_some_and(|(_, _, status)| *status == RequestStatus::Queuing);
        let before = self.pile(pile)?.status;
        self.settle_pile(pile, now);
        let after = self.pile(pile)?.status;

        if stalled_head && before.accepts_requests() {
            report.repairs.push(format!("promoted the queue head of pile {}", code));
        }
        if before != after {
            report
                .repairs
                .push(format!("pile {} status {:?} -> {:?}", code, before, after));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::config::{PileConfig, StationConfig};
    use crate::models::{PileClass, PileStatus};
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

    fn single_pile(queue_len: usize) -> (Station, DispatchConfig) {
        let config = StationConfig {
            queue_len,
            piles: vec![PileConfig {
                code: "A".into(),
                class: PileClass::Fast,
                power: 30.0,
            }],
            ..StationConfig::default_station()
        };
        (Station::new(&config), config.dispatch_config())
    }

    #[test]
    fn test_sweep_finishes_completed_charge() {
        let (mut station, cfg) = single_pile(2);
        let rates = TieredRates::default();
        let admission = station
            .submit(PileClass::Fast, 10.0, 50.0, "alice", &cfg, t0())
            .unwrap();

        let early = station.reconcile(&cfg, &rates, minutes(19));
        assert!(early.finished.is_empty());
        assert!(early.is_quiet());

        let report = station.reconcile(&cfg, &rates, minutes(20));
        assert_eq!(report.finished, vec![admission.id]);
        let request = station.request(admission.id).unwrap();
        assert_eq!(request.status, RequestStatus::Finished);
        assert!((request.delivered - 10.0).abs() < 1e-9);
        assert_eq!(station.pile(PileId(1)).unwrap().status, PileStatus::Available);
    }

    #[test]
    fn test_sweep_releases_busy_empty_pile() {
        let (mut station, cfg) = single_pile(2);
        station.piles.get_mut(&PileId(1)).unwrap().status = PileStatus::Busy;

        let report = station.reconcile(&cfg, &TieredRates::default(), t0());

        assert_eq!(station.pile(PileId(1)).unwrap().status, PileStatus::Available);
        assert_eq!(report.repairs.len(), 1);
    }

    #[test]
    fn test_sweep_closes_gap_and_promotes_new_head() {
        let (mut station, cfg) = single_pile(3);
        let rates = TieredRates::default();
        let ids: Vec<RequestId> = (0..3)
            .map(|_| {
                station
                    .submit(PileClass::Fast, 30.0, 60.0, "fleet", &cfg, t0())
                    .unwrap()
                    .id
            })
            .collect();
        // Head vanished without the queue being renumbered.
        let head = station.requests.get_mut(&ids[0]).unwrap();
        head.status = RequestStatus::Finished;
        head.pile = None;
        head.position = None;
        head.session = None;

        station.reconcile(&cfg, &rates, minutes(5));

        let promoted = station.request(ids[1]).unwrap();
        assert_eq!(promoted.position, Some(0));
        assert_eq!(promoted.status, RequestStatus::Charging);
        assert_eq!(station.request(ids[2]).unwrap().position, Some(1));
        assert!(station
            .invariant_violations(cfg.queue_len, cfg.waiting_area_size)
            .is_empty());
    }

    #[test]
    fn test_sweep_demotes_charging_behind_head() {
        let (mut station, cfg) = single_pile(3);
        let rates = TieredRates::default();
        let ids: Vec<RequestId> = (0..2)
            .map(|_| {
                station
                    .submit(PileClass::Fast, 30.0, 60.0, "fleet", &cfg, t0())
                    .unwrap()
                    .id
            })
            .collect();
        let stray = station.requests.get_mut(&ids[1]).unwrap();
        stray.status = RequestStatus::Charging;
        stray.started_at = Some(t0());

        let report = station.reconcile(&cfg, &rates, minutes(5));

        let demoted = station.request(ids[1]).unwrap();
        assert_eq!(demoted.status, RequestStatus::Queuing);
        assert_eq!(demoted.started_at, None);
        assert_eq!(station.request(ids[0]).unwrap().status, RequestStatus::Charging);
        assert!(!report.repairs.is_empty());
        assert!(station
            .invariant_violations(cfg.queue_len, cfg.waiting_area_size)
            .is_empty());
    }

    #[test]
    fn test_sweep_keeps_live_session_on_shared_position() {
        let (mut station, cfg) = single_pile(3);
        let rates = TieredRates::default();
        let ids: Vec<RequestId> = (0..2)
            .map(|_| {
                station
                    .submit(PileClass::Fast, 30.0, 60.0, "fleet", &cfg, t0())
                    .unwrap()
                    .id
            })
            .collect();
        station.requests.get_mut(&ids[0]).unwrap().ticket.number = 2;
        let queued = station.requests.get_mut(&ids[1]).unwrap();
        queued.ticket.number = 1;
        queued.position = Some(0);

        station.reconcile(&cfg, &rates, minutes(5));

        let charging = station.request(ids[0]).unwrap();
        assert_eq!(charging.status, RequestStatus::Charging);
        assert_eq!(charging.position, Some(0));
        assert!(charging.session.is_some());
        assert_eq!(station.request(ids[1]).unwrap().position, Some(1));
        assert!(station
            .invariant_violations(cfg.queue_len, cfg.waiting_area_size)
            .is_empty());
    }

    #[test]
    fn test_sweep_returns_orphans_and_dispatches_them() {
        let (mut station, cfg) = single_pile(2);
        let rates = TieredRates::default();
        let admission = station
            .submit(PileClass::Fast, 30.0, 60.0, "alice", &cfg, t0())
            .unwrap();
        let orphan = station.requests.get_mut(&admission.id).unwrap();
        orphan.pile = None;
        orphan.position = None;

        let report = station.reconcile(&cfg, &rates, minutes(5));

        assert_eq!(report.dispatched, vec![admission.id]);
        let request = station.request(admission.id).unwrap();
        assert_eq!(request.status, RequestStatus::Charging);
        assert_eq!(request.pile, Some(PileId(1)));
    }
}

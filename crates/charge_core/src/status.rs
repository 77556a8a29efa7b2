//! Read-only views: per-request status with estimates, and the station queue snapshot.

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;

use crate::error::DispatchError;
use crate::estimate::EPSILON;
use crate::models::{ChargeRequest, Pile, PileClass, RequestId, RequestStatus, Ticket};
use crate::station::Station;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub delivered: f64,
    pub requested: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestView {
    pub id: RequestId,
    pub ticket: Ticket,
    pub requester: String,
    pub class: PileClass,
    pub status: RequestStatus,
    pub pile_code: Option<String>,
    pub position: Option<usize>,
    /// Requests served before this one: same-class tickets ahead in the
    /// waiting area, or the queue ahead on the pile.
    pub ahead: usize,
    /// `None` once terminal, or while no pile of the class is in service.
    pub estimated_wait_minutes: Option<f64>,
    pub estimated_finish: Option<NaiveDateTime>,
    pub progress: Progress,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: RequestId,
    pub ticket: Ticket,
    pub requester: String,
    pub status: RequestStatus,
    pub position: Option<usize>,
    pub energy: f64,
    pub remaining: f64,
    pub requested_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PileSnapshot {
    #[serde(flatten)]
    pub pile: Pile,
    pub backlog_minutes: f64,
    pub queue: Vec<QueueEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSnapshot {
    pub station_id: String,
    pub taken_at: NaiveDateTime,
    pub piles: Vec<PileSnapshot>,
    pub waiting: Vec<QueueEntry>,
}

/// `None` when the instant falls outside the representable calendar.
fn after_minutes(now: NaiveDateTime, minutes: f64) -> Option<NaiveDateTime> {
    let delta = TimeDelta::try_milliseconds((minutes * 60_000.0).round() as i64)?;
    now.checked_add_signed(delta)
}

impl QueueEntry {
    fn new(request: &ChargeRequest, remaining: f64) -> Self {
        QueueEntry {
            id: request.id,
            ticket: request.ticket,
            requester: request.requester.clone(),
            status: request.status,
            position: request.position,
            energy: request.energy,
            remaining,
            requested_at: request.requested_at,
        }
    }
}

impl Station {
    pub fn status(
        &self,
        id: RequestId,
        now: NaiveDateTime,
    ) -> Result<RequestView, DispatchError> {
        let request = self.request(id)?;
        let pile = match request.pile {
            Some(pile) => Some(self.pile(pile)?),
            None => None,
        };
        let live = pile.map_or(0.0, |pile| request.session_delivery(pile.power, now));
        let delivered = request.delivered + live;
        let progress = Progress {
            delivered,
            requested: request.energy,
            percent: (delivered / request.energy * 100.0).min(100.0),
        };

        let (ahead, wait, own) = match (request.status, pile) {
            (RequestStatus::Waiting, _) => {
                let (ahead, projection) = self.project_waiting(request, now);
                (ahead, projection.map(|(wait, _)| wait), projection.map(|(_, own)| own))
            }
            (RequestStatus::Queuing, Some(pile)) => {
                let queue = self.pile_queue(pile.id);
                let position = queue
                    .iter()
                    .position(|other| other.id == id)
                    .unwrap_or(queue.len());
                let wait = queue[..position]
                    .iter()
                    .map(|other| self.remaining_minutes(other, pile, now))
                    .sum();
                (position, Some(wait), Some(self.remaining_minutes(request, pile, now)))
            }
            (RequestStatus::Charging, Some(pile)) => {
                (0, Some(0.0), Some(self.remaining_minutes(request, pile, now)))
            }
            _ => (0, None, None),
        };
        let estimated_finish = match (wait, own) {
            (Some(wait), Some(own)) => after_minutes(now, wait + own),
            _ => request.ended_at,
        };

        Ok(RequestView {
            id,
            ticket: request.ticket,
            requester: request.requester.clone(),
            class: request.class,
            status: request.status,
            pile_code: pile.map(|pile| pile.code.clone()),
            position: request.position,
            ahead,
            estimated_wait_minutes: wait,
            estimated_finish,
            progress,
        })
    }

    /// Same-class requests ahead of a waiting request, and its projected
    /// (wait, own charge) minutes once those are placed on the best piles.
    fn project_waiting(
        &self,
        request: &ChargeRequest,
        now: NaiveDateTime,
    ) -> (usize, Option<(f64, f64)>) {
        let ahead: Vec<&ChargeRequest> = self
            .waiting(Some(request.class))
            .into_iter()
            .take_while(|other| other.id != request.id)
            .collect();
        let mut loads = self.pile_loads(Some(request.class), usize::MAX, now);
        if loads.is_empty() {
            return (ahead.len(), None);
        }
        let mut place = |energy: f64| -> (f64, f64) {
            let mut best = 0;
            for (idx, load) in loads.iter().enumerate() {
                let current = loads[best].backlog + loads[best].charge_minutes(energy);
                if load.backlog + load.charge_minutes(energy) < current - EPSILON {
                    best = idx;
                }
            }
            let load = &mut loads[best];
            let (wait, own) = (load.backlog, load.charge_minutes(energy));
            load.backlog += own;
            (wait, own)
        };
        for other in &ahead {
            place(other.remaining_energy());
        }
        (ahead.len(), Some(place(request.remaining_energy())))
    }

    /// Every pile with its ordered queue, plus the waiting area in dispatch order.
    pub fn queue_snapshot(&self, now: NaiveDateTime) -> StationSnapshot {
        let piles = self
            .piles
            .values()
            .map(|pile| PileSnapshot {
                pile: pile.clone(),
                backlog_minutes: self.backlog_minutes(pile.id, now),
                queue: self
                    .pile_queue(pile.id)
                    .into_iter()
                    .map(|request| {
                        let remaining = request.remaining_energy()
                            - request.session_delivery(pile.power, now);
                        QueueEntry::new(request, remaining.max(0.0))
                    })
                    .collect(),
            })
            .collect();
        let waiting = self
            .waiting(None)
            .into_iter()
            .map(|request| QueueEntry::new(request, request.remaining_energy()))
            .collect();
        StationSnapshot {
            station_id: self.station_id().to_string(),
            taken_at: now,
            piles,
            waiting,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::config::{DispatchConfig, StationConfig};
    use crate::models::PileId;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn busy_fast_station() -> (Station, Vec<RequestId>) {
        let mut station = Station::new(&StationConfig::default_station());
        let cfg = DispatchConfig::default();
        // F1, F4 on A and F2, F3 on B, F5 waiting
        let ids = [30.0, 15.0, 10.0, 5.0, 20.0]
            .into_iter()
            .map(|energy| {
                station
                    .submit(PileClass::Fast, energy, 0.0, "fleet", &cfg, t0())
                    .unwrap()
                    .id
            })
            .collect();
        (station, ids)
    }

    #[test]
    fn test_charging_status_reports_progress() {
        let (station, ids) = busy_fast_station();
        let now = t0() + Duration::minutes(30);

        let view = station.status(ids[0], now).unwrap();

        assert_eq!(view.status, RequestStatus::Charging);
        assert_eq!(view.pile_code.as_deref(), Some("A"));
        assert_eq!(view.estimated_wait_minutes, Some(0.0));
        assert_eq!(view.estimated_finish, Some(t0() + Duration::minutes(60)));
        assert!(close(view.progress.delivered, 15.0));
        assert!(close(view.progress.percent, 50.0));
    }

    #[test]
    fn test_queuing_status_waits_for_the_head() {
        let (station, ids) = busy_fast_station();

        let view = station.status(ids[2], t0()).unwrap();

        assert_eq!(view.status, RequestStatus::Queuing);
        assert_eq!(view.pile_code.as_deref(), Some("B"));
        assert_eq!(view.ahead, 1);
        assert_eq!(view.position, Some(1));
        assert!(close(view.estimated_wait_minutes.unwrap(), 30.0));
        assert_eq!(view.estimated_finish, Some(t0() + Duration::minutes(50)));
    }

    #[test]
    fn test_waiting_status_projects_onto_piles() {
        let (station, ids) = busy_fast_station();

        let view = station.status(ids[4], t0()).unwrap();

        assert_eq!(view.status, RequestStatus::Waiting);
        assert_eq!(view.ahead, 0);
        assert_eq!(view.pile_code, None);
        // B frees up after 30 + 20 minutes, A only after 60 + 10
        assert!(close(view.estimated_wait_minutes.unwrap(), 50.0));
        assert_eq!(view.estimated_finish, Some(t0() + Duration::minutes(90)));
        assert!(close(view.progress.delivered, 0.0));
    }

    #[test]
    fn test_unbounded_amount_has_no_finish_estimate() {
        let mut station = Station::new(&StationConfig::default_station());
        let cfg = DispatchConfig::default();
        let admission = station
            .submit(PileClass::Fast, 1e12, 0.0, "fleet", &cfg, t0())
            .unwrap();

        let view = station.status(admission.id, t0()).unwrap();

        assert_eq!(view.status, RequestStatus::Charging);
        assert_eq!(view.estimated_finish, None);
        assert!(view.estimated_wait_minutes.is_some());
    }

    #[test]
    fn test_queue_snapshot_lists_piles_and_waiting_area() {
        let (station, ids) = busy_fast_station();

        let snapshot = station.queue_snapshot(t0());

        assert_eq!(snapshot.piles.len(), 5);
        let a = &snapshot.piles[0];
        assert_eq!(a.pile.id, PileId(1));
        let queued: Vec<RequestId> = a.queue.iter().map(|entry| entry.id).collect();
        assert_eq!(queued, vec![ids[0], ids[3]]);
        assert!(close(a.backlog_minutes, 70.0));
        assert_eq!(snapshot.waiting.len(), 1);
        assert_eq!(snapshot.waiting[0].id, ids[4]);
        assert!(snapshot.piles[2].queue.is_empty());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["piles"][0]["code"], "A");
        assert_eq!(json["waiting"][0]["ticket"]["number"], 5);
    }
}

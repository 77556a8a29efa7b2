//! Pile faults, recovery and rerouting of the requests a fault strands.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::models::{FaultRecord, PileClass, PileId, PileStatus, RequestId, RequestStatus};
use crate::rates::RateLookup;
use crate::station::Station;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RerouteStrategy {
    /// Move the faulted pile's queue away one request at a time, in queue order.
    #[default]
    Priority,
    /// Rebuild the queues of the whole class in ticket order.
    TimeOrder,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RerouteOutcome {
    pub rescheduled: Vec<RequestId>,
    /// Requests no pile could take; they stay on the recovered pile.
    pub stranded: Vec<RequestId>,
}

impl RerouteOutcome {
    pub fn rescheduled_count(&self) -> usize {
        self.rescheduled.len()
    }
}

impl Station {
    /// Take a pile out of service and interrupt whatever it is charging.
    ///
    /// The queue stays attached to the pile. Returns the number of requests on it.
    pub fn report_fault(
        &mut self,
        code: &str,
        description: impl Into<String>,
        rates: &dyn RateLookup,
        now: NaiveDateTime,
    ) -> Result<usize, DispatchError> {
        let pile = self.pile_by_code(code)?;
        if matches!(pile.status, PileStatus::Fault | PileStatus::Offline) {
            return Err(DispatchError::InvalidPileState {
                pile: pile.code.clone(),
                operation: "report a fault on",
                reason: format!("pile is {:?}", pile.status),
            });
        }
        let pile_id = pile.id;
        let description = description.into();
        tracing::warn!("Fault reported on pile {}: {}", code, description);

        self.set_pile_status(pile_id, PileStatus::Fault);
        self.faults.push(FaultRecord {
            pile: pile_id,
            description,
            reported_at: now,
            recovered_at: None,
        });

        let charging: Vec<RequestId> = self
            .pile_queue(pile_id)
            .into_iter()
            .filter(|request| request.status == RequestStatus::Charging)
            .map(|request| request.id)
            .collect();
        for id in charging {
            self.interrupt_session(id, rates, now)?;
            self.request_mut(id)?.started_at = None;
            self.transition(id, RequestStatus::Queuing, format!("pile {} faulted", code), now)?;
        }
        Ok(self.pile_occupancy(pile_id))
    }

    /// Put a faulted pile back in service. Its queue is left untouched.
    pub fn recover_fault(
        &mut self,
        code: &str,
        now: NaiveDateTime,
    ) -> Result<PileId, DispatchError> {
        let pile = self.pile_by_code(code)?;
        if pile.status != PileStatus::Fault {
            return Err(DispatchError::InvalidPileState {
                pile: pile.code.clone(),
                operation: "recover",
                reason: format!("pile is {:?}, not Fault", pile.status),
            });
        }
        let pile_id = pile.id;
        self.set_pile_status(pile_id, PileStatus::Available);
        if let Some(record) = self
            .faults
            .iter_mut()
            .rev()
            .find(|record| record.pile == pile_id && record.recovered_at.is_none())
        {
            record.recovered_at = Some(now);
        }
        tracing::info!("Pile {} recovered", code);
        Ok(pile_id)
    }

    /// Move the requests left on `pile` to other piles of its class.
    pub fn reroute(
        &mut self,
        pile: PileId,
        strategy: RerouteStrategy,
        cfg: &DispatchConfig,
        now: NaiveDateTime,
    ) -> Result<RerouteOutcome, DispatchError> {
        let outcome = match strategy {
            RerouteStrategy::Priority => self.reroute_priority(pile, cfg, now)?,
            RerouteStrategy::TimeOrder => self.reroute_time_order(pile, cfg, now)?,
        };
        tracing::info!(
            "{:?} reroute from pile {}: {} rescheduled, {} stranded",
            strategy,
            pile,
            outcome.rescheduled.len(),
            outcome.stranded.len()
        );
        Ok(outcome)
    }

    /// Recover a pile, reroute its queue and let the station settle, as one step.
    pub fn recover_and_reroute(
        &mut self,
        code: &str,
        strategy: RerouteStrategy,
        cfg: &DispatchConfig,
        now: NaiveDateTime,
    ) -> Result<RerouteOutcome, DispatchError> {
        let pile = self.recover_fault(code, now)?;
        let outcome = self.reroute(pile, strategy, cfg, now)?;
        let piles: Vec<PileId> = self.piles.keys().copied().collect();
        for pile in piles {
            self.settle_pile(pile, now);
        }
        self.dispatch(cfg, now);
        Ok(outcome)
    }

    fn reroute_priority(
        &mut self,
        pile: PileId,
        cfg: &DispatchConfig,
        now: NaiveDateTime,
    ) -> Result<RerouteOutcome, DispatchError> {
        let attached: Vec<(RequestId, PileClass, f64)> = self
            .pile_queue(pile)
            .into_iter()
            .map(|request| (request.id, request.class, request.remaining_energy()))
            .collect();

        let mut outcome = RerouteOutcome::default();
        for (id, class, energy) in attached {
            let target = self.select_pile(class, energy, Some(pile), cfg.queue_len, now);
            let Some(target) = target else {
                outcome.stranded.push(id);
                continue;
            };
            self.detach(id, format!("rerouted off pile {}", pile), now)?;
            self.assign(id, target, false, cfg, now)?;
            outcome.rescheduled.push(id);
        }
        Ok(outcome)
    }

    fn reroute_time_order(
        &mut self,
        pile: PileId,
        cfg: &DispatchConfig,
        now: NaiveDateTime,
    ) -> Result<RerouteOutcome, DispatchError> {
        let class = self.pile(pile)?.class;
        let mut pool: Vec<(u32, RequestId)> = self
            .requests
            .values()
            .filter_map(|request| {
                let on = request.pile?;
                if on == pile && request.status.is_active() {
                    return Some((request.ticket.number, request.id));
                }
                let other = self.piles.get(&on)?;
                let movable = other.class == class
                    && other.status.accepts_requests()
                    && request.status == RequestStatus::Queuing;
                movable.then_some((request.ticket.number, request.id))
            })
            .collect();
        pool.sort_by_key(|(number, _)| *number);

        for (_, id) in &pool {
            self.detach(*id, "requeued in ticket order", now)?;
        }

        // The recovered pile is a target like any other.
        let mut outcome = RerouteOutcome::default();
        for (_, id) in pool {
            let request = self.request(id)?;
            let (own, energy) = (request.class, request.remaining_energy());
            // Requests a bulk pass placed across classes may stay on this class's piles.
            let target = self
                .select_pile(own, energy, None, cfg.queue_len, now)
                .map(|target| (target, false))
                .or_else(|| {
                    (own != class)
                        .then(|| self.select_pile(class, energy, None, cfg.queue_len, now))
                        .flatten()
                        .map(|target| (target, true))
                });
            match target {
                Some((target, cross_class)) => {
                    self.assign(id, target, cross_class, cfg, now)?;
                    outcome.rescheduled.push(id);
                }
                None => {
                    self.reattach(id, pile, cfg.queue_len, now)?;
                    outcome.stranded.push(id);
                }
            }
        }
        Ok(outcome)
    }

    /// Pull an attached request back into the unassigned state so it can be placed again.
    fn detach(
        &mut self,
        id: RequestId,
        reason: impl Into<String>,
        now: NaiveDateTime,
    ) -> Result<(), DispatchError> {
        self.transition(id, RequestStatus::Waiting, reason, now)?;
        self.release_slot(id)?;
        Ok(())
    }

    /// Put a detached request back on `pile` regardless of the pile's status.
    fn reattach(
        &mut self,
        id: RequestId,
        pile: PileId,
        queue_len: usize,
        now: NaiveDateTime,
    ) -> Result<(), DispatchError> {
        let position = self.assign_slot(id, pile, queue_len)?;
        self.transition(
            id,
            RequestStatus::Queuing,
            format!("no pile available, kept on pile {} at position {}", pile, position),
            now,
        )
    }

    /// Bring an offline pile into service.
    pub fn power_on(
        &mut self,
        code: &str,
        cfg: &DispatchConfig,
        now: NaiveDateTime,
    ) -> Result<(), DispatchError> {
        let pile = self.pile_by_code(code)?;
        if pile.status != PileStatus::Offline {
            return Err(DispatchError::InvalidPileState {
                pile: pile.code.clone(),
                operation: "power on",
                reason: format!("pile is {:?}", pile.status),
            });
        }
        let pile_id = pile.id;
        self.set_pile_status(pile_id, PileStatus::Available);
        self.dispatch(cfg, now);
        Ok(())
    }

    /// Take an idle pile out of service.
    pub fn shutdown(&mut self, code: &str) -> Result<(), DispatchError> {
        let pile = self.pile_by_code(code)?;
        let reason = if pile.status == PileStatus::Offline {
            Some("pile is already Offline".to_string())
        } else {
            let occupancy = self.pile_occupancy(pile.id);
            (occupancy > 0).then(|| format!("{} request(s) still attached", occupancy))
        };
        if let Some(reason) = reason {
            return Err(DispatchError::InvalidPileState {
                pile: pile.code.clone(),
                operation: "shut down",
                reason,
            });
        }
        let pile_id = pile.id;
        self.set_pile_status(pile_id, PileStatus::Offline);
        Ok(())
    }
}

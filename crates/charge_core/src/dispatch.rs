//! Moving requests from the waiting area into pile queues.

use chrono::NaiveDateTime;

use crate::batch::{self, Candidate, Plan};
use crate::config::{DispatchConfig, DispatchStrategy};
use crate::estimate::PileLoad;
use crate::models::{PileClass, RequestId};
use crate::station::Station;

impl Station {
    /// Run one dispatch pass over the waiting area with the configured strategy.
    ///
    /// Returns the requests that were assigned to a pile, in assignment order.
    pub fn dispatch(&mut self, cfg: &DispatchConfig, now: NaiveDateTime) -> Vec<RequestId> {
        let assigned = match cfg.strategy {
            DispatchStrategy::Default => self.dispatch_fifo(cfg, now),
            DispatchStrategy::SingleBatch => self.dispatch_single_batch(cfg, now),
            DispatchStrategy::BulkBatch => {
                let waiting = self.waiting_count();
                if waiting >= cfg.bulk_threshold {
                    self.dispatch_bulk(cfg, now)
                } else {
                    tracing::debug!(
                        "{} waiting below bulk threshold {}, dispatching one at a time",
                        waiting,
                        cfg.bulk_threshold
                    );
                    self.dispatch_fifo(cfg, now)
                }
            }
        };
        if !assigned.is_empty() {
            tracing::info!("{:?} dispatch assigned {} request(s)", cfg.strategy, assigned.len());
        }
        assigned
    }

    /// Oldest ticket of each class onto its best pile, until a class runs out of
    /// waiting requests or of eligible piles.
    fn dispatch_fifo(&mut self, cfg: &DispatchConfig, now: NaiveDateTime) -> Vec<RequestId> {
        let mut assigned = Vec::new();
        for class in PileClass::ALL {
            while let Some(head) = self.waiting_head(class) {
                let Ok(energy) = self.request(head).map(|r| r.remaining_energy()) else {
                    break;
                };
                let Some(pile) = self.select_pile(class, energy, None, cfg.queue_len, now) else {
                    break;
                };
                match self.assign(head, pile, false, cfg, now) {
                    Ok(_) => assigned.push(head),
                    Err(error) => {
                        tracing::error!("Dispatch of {} failed: {}", head, error);
                        break;
                    }
                }
            }
        }
        assigned
    }

    /// Per class, fill every free slot at once with the assignment minimizing the
    /// summed completion time of the batch.
    fn dispatch_single_batch(
        &mut self,
        cfg: &DispatchConfig,
        now: NaiveDateTime,
    ) -> Vec<RequestId> {
        let mut assigned = Vec::new();
        for class in PileClass::ALL {
            let loads = self.pile_loads(Some(class), cfg.queue_len, now);
            let slots: usize = loads.iter().map(|load| load.free).sum();
            if slots == 0 {
                continue;
            }
            let candidates = self.candidates(Some(class), slots);
            if candidates.is_empty() {
                continue;
            }
            let searched = batch::plan_exhaustive(&candidates, &loads, cfg.enumeration_limit)
                .unwrap_or_else(|| batch::plan_greedy(&candidates, &loads, true));
            let fifo = batch::plan_fifo(&candidates, &loads);
            let plan = batch::pick_best(&candidates, &loads, vec![searched, fifo]);
            assigned.extend(self.apply_plan(plan, false, cfg, now));
        }
        assigned
    }

    /// Whole waiting area against every pile with room, classes ignored.
    fn dispatch_bulk(&mut self, cfg: &DispatchConfig, now: NaiveDateTime) -> Vec<RequestId> {
        let loads = self.pile_loads(None, cfg.queue_len, now);
        let slots: usize = loads.iter().map(|load| load.free).sum();
        if slots == 0 {
            return Vec::new();
        }
        let candidates = self.candidates(None, slots);
        let plan = self.bulk_plan(&candidates, &loads);
        self.apply_plan(plan, true, cfg, now)
    }

    fn bulk_plan(&self, candidates: &[Candidate], loads: &[PileLoad]) -> Plan {
        let greedy = batch::plan_greedy(candidates, loads, false);
        let fifo = batch::plan_fifo(candidates, loads);
        batch::pick_best(candidates, loads, vec![greedy, fifo])
    }

    /// Up to `limit` waiting requests in admission order.
    fn candidates(&self, class: Option<PileClass>, limit: usize) -> Vec<Candidate> {
        self.waiting(class)
            .into_iter()
            .take(limit)
            .map(|request| Candidate {
                id: request.id,
                class: request.class,
                energy: request.remaining_energy(),
            })
            .collect()
    }

    fn apply_plan(
        &mut self,
        plan: Plan,
        cross_class: bool,
        cfg: &DispatchConfig,
        now: NaiveDateTime,
    ) -> Vec<RequestId> {
        let mut assigned = Vec::with_capacity(plan.len());
        for (request, pile) in plan {
            match self.assign(request, pile, cross_class, cfg, now) {
                Ok(_) => assigned.push(request),
                Err(error) => tracing::error!("Batch assignment of {} failed: {}", request, error),
            }
        }
        assigned
    }
}

//! Completion-time estimates and single-request pile selection.

use chrono::NaiveDateTime;

use crate::models::{ChargeRequest, Pile, PileClass, PileId};
use crate::station::Station;

/// Two estimates closer than this are treated as a tie.
pub(crate) const EPSILON: f64 = 1e-9;

/// Projected state of one candidate pile during a dispatch pass.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PileLoad {
    pub id: PileId,
    pub class: PileClass,
    pub power: f64,
    /// Minutes until everything already queued on the pile is done
    pub backlog: f64,
    pub free: usize,
}

impl PileLoad {
    pub fn charge_minutes(&self, energy: f64) -> f64 {
        energy / self.power * 60.0
    }
}

impl Station {
    /// Minutes `request` still needs on `pile`, floored at zero.
    pub fn remaining_minutes(
        &self,
        request: &ChargeRequest,
        pile: &Pile,
        now: NaiveDateTime,
    ) -> f64 {
        let owed = request.remaining_energy() - request.session_delivery(pile.power, now);
        pile.charge_minutes(owed.max(0.0))
    }

    /// Minutes until every request currently attached to `pile` is done.
    pub fn backlog_minutes(&self, pile: PileId, now: NaiveDateTime) -> f64 {
        let Ok(pile) = self.pile(pile) else {
            return f64::INFINITY;
        };
        self.pile_queue(pile.id)
            .into_iter()
            .map(|request| self.remaining_minutes(request, pile, now))
            .sum()
    }

    /// Estimated completion time of a new `energy` request appended to `pile`.
    pub fn completion_minutes(&self, pile: PileId, energy: f64, now: NaiveDateTime) -> f64 {
        let Ok(target) = self.pile(pile) else {
            return f64::INFINITY;
        };
        self.backlog_minutes(pile, now) + target.charge_minutes(energy)
    }

    /// Pile of `class` minimizing completion time for `energy`, among piles
    /// that accept requests and have a free slot. Ties go to the lowest id.
    pub fn select_pile(
        &self,
        class: PileClass,
        energy: f64,
        exclude: Option<PileId>,
        queue_len: usize,
        now: NaiveDateTime,
    ) -> Option<PileId> {
        let mut best: Option<(PileId, f64)> = None;
        for pile in self.piles.values() {
            if pile.class != class
                || !pile.status.accepts_requests()
                || Some(pile.id) == exclude
                || self.pile_occupancy(pile.id) >= queue_len
            {
                continue;
            }
            let completion = self.completion_minutes(pile.id, energy, now);
            tracing::debug!("Pile {} completes {} kWh in {:.1} min", pile.code, energy, completion);
            if best.is_none_or(|(_, current)| completion < current - EPSILON) {
                best = Some((pile.id, completion));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Loads of the piles that can take work, optionally restricted to one class.
    pub(crate) fn pile_loads(
        &self,
        class: Option<PileClass>,
        queue_len: usize,
        now: NaiveDateTime,
    ) -> Vec<PileLoad> {
        self.piles
            .values()
            .filter(|pile| pile.status.accepts_requests())
            .filter(|pile| class.is_none_or(|class| pile.class == class))
            .map(|pile| PileLoad {
                id: pile.id,
                class: pile.class,
                power: pile.power,
                backlog: self.backlog_minutes(pile.id, now),
                free: queue_len.saturating_sub(self.pile_occupancy(pile.id)),
            })
            .collect()
    }
}

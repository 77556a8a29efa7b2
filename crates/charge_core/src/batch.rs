//! Assignment planning for the batch dispatch strategies.
//!
//! Planning works on a projection of the candidate piles (`PileLoad`) and
//! never touches the station. A plan is an ordered list of assignments; the
//! order matters because it fixes queue positions when several requests land
//! on the same pile. The cost of a plan is the sum of the completion times of
//! its requests when applied in that order.

use crate::estimate::{EPSILON, PileLoad};
use crate::models::{PileClass, PileId, RequestId};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Candidate {
    pub id: RequestId,
    pub class: PileClass,
    pub energy: f64,
}

pub(crate) type Plan = Vec<(RequestId, PileId)>;

fn fits(candidate: &Candidate, load: &PileLoad, free: usize, class_bound: bool) -> bool {
    free > 0 && (!class_bound || load.class == candidate.class)
}

/// Sum of completion minutes of `plan`.
pub(crate) fn plan_cost(candidates: &[Candidate], loads: &[PileLoad], plan: &Plan) -> f64 {
    let mut finish: Vec<f64> = loads.iter().map(|load| load.backlog).collect();
    plan.iter()
        .filter_map(|(request, pile)| {
            let candidate = candidates.iter().find(|c| c.id == *request)?;
            let idx = loads.iter().position(|load| load.id == *pile)?;
            finish[idx] += loads[idx].charge_minutes(candidate.energy);
            Some(finish[idx])
        })
        .sum()
}

/// Place `order` one request at a time on the pile with the lowest projected finish.
fn plan_sequential(
    candidates: &[Candidate],
    order: &[usize],
    loads: &[PileLoad],
    class_bound: bool,
) -> Plan {
    let mut finish: Vec<f64> = loads.iter().map(|load| load.backlog).collect();
    let mut free: Vec<usize> = loads.iter().map(|load| load.free).collect();
    let mut plan = Plan::new();
    for &c in order {
        let candidate = &candidates[c];
        let mut best: Option<(usize, f64)> = None;
        for (idx, load) in loads.iter().enumerate() {
            if !fits(candidate, load, free[idx], class_bound) {
                continue;
            }
            let projected = finish[idx] + load.charge_minutes(candidate.energy);
            if best.is_none_or(|(_, current)| projected < current - EPSILON) {
                best = Some((idx, projected));
            }
        }
        if let Some((idx, projected)) = best {
            finish[idx] = projected;
            free[idx] -= 1;
            plan.push((candidate.id, loads[idx].id));
        }
    }
    plan
}

/// What one-at-a-time dispatch would do with the same pool: admission order, class bound.
pub(crate) fn plan_fifo(candidates: &[Candidate], loads: &[PileLoad]) -> Plan {
    let order: Vec<usize> = (0..candidates.len()).collect();
    plan_sequential(candidates, &order, loads, true)
}

/// Largest request first, each onto the pile that would finish it soonest.
pub(crate) fn plan_greedy(candidates: &[Candidate], loads: &[PileLoad], class_bound: bool) -> Plan {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| candidates[*b].energy.total_cmp(&candidates[*a].energy));
    plan_sequential(candidates, &order, loads, class_bound)
}

struct Search<'a> {
    candidates: &'a [Candidate],
    loads: &'a [PileLoad],
    finish: Vec<f64>,
    free: Vec<usize>,
    current: Vec<usize>,
    best: Option<(f64, Vec<usize>)>,
}

impl Search<'_> {
    fn run(&mut self, idx: usize, cost: f64) {
        if let Some((best, _)) = &self.best {
            if cost >= best - EPSILON {
                return;
            }
        }
        if idx == self.candidates.len() {
            self.best = Some((cost, self.current.clone()));
            return;
        }
        let candidate = &self.candidates[idx];
        for pile in 0..self.loads.len() {
            if !fits(candidate, &self.loads[pile], self.free[pile], true) {
                continue;
            }
            let added = self.loads[pile].charge_minutes(candidate.energy);
            self.finish[pile] += added;
            self.free[pile] -= 1;
            self.current.push(pile);

            let finish = self.finish[pile];
            self.run(idx + 1, cost + finish);

            self.current.pop();
            self.free[pile] += 1;
            self.finish[pile] -= added;
        }
    }
}

/// Exhaustive class-bound search for the minimal total completion time.
///
/// Requests keep admission order inside each pile. Returns `None` when the
/// search space exceeds `limit` or no complete placement exists.
pub(crate) fn plan_exhaustive(
    candidates: &[Candidate],
    loads: &[PileLoad],
    limit: usize,
) -> Option<Plan> {
    let space = candidates.iter().try_fold(1usize, |acc, candidate| {
        let choices = loads
            .iter()
            .filter(|load| load.free > 0 && load.class == candidate.class)
            .count();
        acc.checked_mul(choices.max(1))
    })?;
    if space > limit {
        tracing::debug!("Search space {} exceeds limit {}, using greedy placement", space, limit);
        return None;
    }

    let mut search = Search {
        candidates,
        loads,
        finish: loads.iter().map(|load| load.backlog).collect(),
        free: loads.iter().map(|load| load.free).collect(),
        current: Vec::with_capacity(candidates.len()),
        best: None,
    };
    search.run(0, 0.0);
    let (_, choice) = search.best?;
    Some(
        candidates
            .iter()
            .zip(choice)
            .map(|(candidate, pile)| (candidate.id, loads[pile].id))
            .collect(),
    )
}

/// The plan placing the most requests, then the cheapest. Earlier plans win ties.
pub(crate) fn pick_best(candidates: &[Candidate], loads: &[PileLoad], plans: Vec<Plan>) -> Plan {
    let mut best: Option<(usize, f64, Plan)> = None;
    for plan in plans {
        let placed = plan.len();
        let cost = plan_cost(candidates, loads, &plan);
        let better = match &best {
            None => true,
            Some((best_placed, best_cost, _)) => {
                placed > *best_placed || (placed == *best_placed && cost < best_cost - EPSILON)
            }
        };
        if better {
            best = Some((placed, cost, plan));
        }
    }
    best.map(|(_, _, plan)| plan).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u128, class: PileClass, energy: f64) -> Candidate {
        Candidate {
            id: RequestId(uuid::Uuid::from_u128(n)),
            class,
            energy,
        }
    }

    fn load(id: u32, class: PileClass, power: f64, backlog: f64, free: usize) -> PileLoad {
        PileLoad {
            id: PileId(id),
            class,
            power,
            backlog,
            free,
        }
    }

    #[test]
    fn test_fifo_places_in_order_on_soonest_pile() {
        let candidates = vec![
            candidate(1, PileClass::Fast, 30.0),
            candidate(2, PileClass::Fast, 15.0),
        ];
        let loads = vec![
            load(1, PileClass::Fast, 30.0, 0.0, 2),
            load(2, PileClass::Fast, 30.0, 10.0, 1),
        ];
        let plan = plan_fifo(&candidates, &loads);
        // 60 min on pile 1 vs 70 on pile 2, then 90 on pile 1 vs 40 on pile 2
        assert_eq!(plan, vec![(candidates[0].id, PileId(1)), (candidates[1].id, PileId(2))]);
        assert!((plan_cost(&candidates, &loads, &plan) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_exhaustive_beats_fifo() {
        // One idle pile and one with a long backlog, two free slots on the idle pile.
        let candidates = vec![
            candidate(1, PileClass::Fast, 30.0),
            candidate(2, PileClass::Fast, 3.0),
        ];
        let loads = vec![
            load(1, PileClass::Fast, 30.0, 0.0, 2),
            load(2, PileClass::Fast, 30.0, 55.0, 1),
        ];
        let fifo = plan_fifo(&candidates, &loads);
        let exhaustive = plan_exhaustive(&candidates, &loads, 64).unwrap();
        let fifo_cost = plan_cost(&candidates, &loads, &fifo);
        let best_cost = plan_cost(&candidates, &loads, &exhaustive);
        assert!(best_cost <= fifo_cost + 1e-9);
    }

    #[test]
    fn test_exhaustive_respects_class_and_capacity() {
        let candidates = vec![
            candidate(1, PileClass::Slow, 7.0),
            candidate(2, PileClass::Slow, 7.0),
        ];
        let loads = vec![
            load(1, PileClass::Fast, 30.0, 0.0, 2),
            load(2, PileClass::Slow, 7.0, 0.0, 1),
            load(3, PileClass::Slow, 7.0, 30.0, 1),
        ];
        let plan = plan_exhaustive(&candidates, &loads, 64).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|(_, pile)| *pile != PileId(1)));
        assert_ne!(plan[0].1, plan[1].1);
    }

    #[test]
    fn test_exhaustive_gives_up_beyond_limit() {
        let candidates: Vec<Candidate> = (0..8)
            .map(|n| candidate(n, PileClass::Fast, 10.0))
            .collect();
        let loads = vec![
            load(1, PileClass::Fast, 30.0, 0.0, 4),
            load(2, PileClass::Fast, 30.0, 0.0, 4),
        ];
        assert!(plan_exhaustive(&candidates, &loads, 255).is_none());
        assert!(plan_exhaustive(&candidates, &loads, 256).is_some());
    }

    #[test]
    fn test_greedy_takes_largest_first_and_may_cross_classes() {
        let candidates = vec![
            candidate(1, PileClass::Slow, 7.0),
            candidate(2, PileClass::Slow, 14.0),
        ];
        let loads = vec![
            load(1, PileClass::Fast, 30.0, 0.0, 1),
            load(2, PileClass::Slow, 7.0, 0.0, 1),
        ];
        let plan = plan_greedy(&candidates, &loads, false);
        assert_eq!(plan[0], (candidates[1].id, PileId(1)));
        assert_eq!(plan[1], (candidates[0].id, PileId(2)));
    }

    #[test]
    fn test_pick_best_prefers_more_placements() {
        let candidates = vec![
            candidate(1, PileClass::Fast, 30.0),
            candidate(2, PileClass::Slow, 7.0),
        ];
        let loads = vec![load(1, PileClass::Fast, 30.0, 0.0, 2)];
        let fifo = plan_fifo(&candidates, &loads);
        let greedy = plan_greedy(&candidates, &loads, false);
        assert_eq!(fifo.len(), 1);
        let best = pick_best(&candidates, &loads, vec![fifo, greedy.clone()]);
        assert_eq!(best, greedy);
    }
}

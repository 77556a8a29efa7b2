//! Waiting area and per-pile queues.

use crate::error::DispatchError;
use crate::events::StationEvent;
use crate::models::{ChargeRequest, PileClass, PileId, RequestId, RequestStatus};
use crate::station::Station;

impl Station {
    pub fn waiting_count(&self) -> usize {
        self.requests
            .values()
            .filter(|request| request.status == RequestStatus::Waiting)
            .count()
    }

    /// Waiting requests in admission order.
    ///
    /// Within a class this is strict ticket order. Across classes requests are
    /// ordered by admission time first.
    pub fn waiting(&self, class: Option<PileClass>) -> Vec<&ChargeRequest> {
        let mut waiting: Vec<&ChargeRequest> = self
            .requests
            .values()
            .filter(|request| request.status == RequestStatus::Waiting)
            .filter(|request| class.is_none_or(|class| request.class == class))
            .collect();
        match class {
            Some(_) => waiting.sort_by_key(|request| request.ticket.number),
            None => waiting.sort_by(|a, b| {
                a.requested_at
                    .cmp(&b.requested_at)
                    .then(a.class.cmp(&b.class))
                    .then(a.ticket.number.cmp(&b.ticket.number))
            }),
        }
        waiting
    }

    /// Oldest-ticket waiting request of `class`.
    pub fn waiting_head(&self, class: PileClass) -> Option<RequestId> {
        self.requests
            .values()
            .filter(|request| request.status == RequestStatus::Waiting && request.class == class)
            .min_by_key(|request| request.ticket.number)
            .map(|request| request.id)
    }

    pub(crate) fn enqueue_waiting(
        &mut self,
        request: ChargeRequest,
        capacity: usize,
    ) -> Result<RequestId, DispatchError> {
        if self.waiting_count() >= capacity {
            return Err(DispatchError::WaitingAreaFull { capacity });
        }
        let id = request.id;
        self.requests.insert(id, request);
        Ok(id)
    }

    /// Active requests of a pile ordered by queue position.
    ///
    /// On a shared position the charging request comes first, then ticket order.
    pub fn pile_queue(&self, pile: PileId) -> Vec<&ChargeRequest> {
        let mut queue: Vec<&ChargeRequest> = self
            .requests
            .values()
            .filter(|request| request.pile == Some(pile) && request.status.is_active())
            .collect();
        queue.sort_by_key(|request| {
            (
                request.position.unwrap_or(usize::MAX),
                request.status != RequestStatus::Charging,
                request.ticket.number,
            )
        });
        queue
    }

    /// Queuing plus charging requests attached to `pile`.
    pub fn pile_occupancy(&self, pile: PileId) -> usize {
        self.requests
            .values()
            .filter(|request| request.pile == Some(pile) && request.status.is_active())
            .count()
    }

    /// Append `id` to the tail of `pile`'s queue and return its position.
    ///
    /// Only the slot is claimed here; the caller owns the status transition.
    pub(crate) fn assign_slot(
        &mut self,
        id: RequestId,
        pile: PileId,
        capacity: usize,
    ) -> Result<usize, DispatchError> {
        let code = self.pile(pile)?.code.clone();
        let position = self.pile_occupancy(pile);
        if position >= capacity {
            return Err(DispatchError::PileQueueFull {
                pile: code,
                capacity,
            });
        }
        let request = self.request_mut(id)?;
        request.pile = Some(pile);
        request.position = Some(position);
        self.emit(StationEvent::QueueChanged {
            pile,
            occupancy: position + 1,
        });
        Ok(position)
    }

    /// Detach `id` from its pile and close the gap it leaves behind.
    ///
    /// Returns the pile and position the request held, if any.
    pub(crate) fn release_slot(
        &mut self,
        id: RequestId,
    ) -> Result<Option<(PileId, usize)>, DispatchError> {
        let request = self.request_mut(id)?;
        let (Some(pile), Some(position)) = (request.pile.take(), request.position.take()) else {
            return Ok(None);
        };
        for other in self.requests.values_mut() {
            if other.id != id && other.pile == Some(pile) && other.status.is_active() {
                if let Some(p) = other.position.as_mut() {
                    if *p > position {
                        *p -= 1;
                    }
                }
            }
        }
        let occupancy = self.pile_occupancy(pile);
        self.emit(StationEvent::QueueChanged { pile, occupancy });
        Ok(Some((pile, position)))
    }
}

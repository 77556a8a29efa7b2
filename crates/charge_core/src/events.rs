use serde::{Deserialize, Serialize};

use crate::models::{PileId, PileStatus, RequestId, RequestStatus};

/// State change worth telling the outside world about.
///
/// Events accumulate in the station outbox and are only handed to a notifier
/// once the operation that produced them has been committed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StationEvent {
    #[serde(rename_all = "camelCase")]
    PileStatusChanged {
        pile: PileId,
        code: String,
        status: PileStatus,
    },
    #[serde(rename_all = "camelCase")]
    RequestStatusChanged {
        request: RequestId,
        requester: String,
        from: RequestStatus,
        to: RequestStatus,
    },
    #[serde(rename_all = "camelCase")]
    QueueChanged { pile: PileId, occupancy: usize },
}

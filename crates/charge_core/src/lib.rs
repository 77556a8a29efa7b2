mod batch;
mod config;
mod dispatch;
mod error;
mod estimate;
mod events;
mod fault;
mod lifecycle;
mod models;
mod queue;
mod rates;
mod station;
mod status;
mod sweep;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::events::*;
pub use crate::fault::{RerouteOutcome, RerouteStrategy};
pub use crate::lifecycle::Admission;
pub use crate::models::*;
pub use crate::rates::*;
pub use crate::station::Station;
pub use crate::status::{PileSnapshot, Progress, QueueEntry, RequestView, StationSnapshot};
pub use crate::sweep::SweepReport;

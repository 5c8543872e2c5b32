// Supervisor module - Fleet ownership, health-check scheduling and the external API

pub mod api;
pub mod clock;
mod fleet;

pub use api::{ActionResponse, LogsResponse};
pub use clock::{Clock, ManualClock, SystemClock};
pub use fleet::{CycleReport, FleetState, FleetSupervisor, ServerOutcome, SUPERVISOR_REQUESTER};

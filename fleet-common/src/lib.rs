//! Fleet Common Types
//!
//! Shared types used by the fleet router core and its transport adapters.

pub mod head;
pub mod policy;
pub mod protocol;

pub use head::{parse_size, HeadRecord, HeadStatus, LOAD_HISTORY_WINDOW};
pub use policy::{RoutingPolicy, Strategy};
pub use protocol::{
    FleetEvent, OperationResponse, RegisterHeadRequest, RoutingCriteria, RoutingDecision,
    UpdateHeadStatusRequest,
};

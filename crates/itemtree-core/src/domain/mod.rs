//! Domain model (ids, job, state machine, parameters, result container).
//!
//! 純粋なデータと状態機械のみ。I/O は ports 経由で app 層が行う。

pub mod container;
pub mod errors;
pub mod events;
pub mod ids;
pub mod job;
pub mod parameter;
pub mod state;

pub use self::container::{
    Descriptor, EnrichmentGap, ItemContainer, PartyName, ProcessStep, ProcessingError,
    Relationship, Submodel, SubmodelRef, Tombstone,
};
pub use self::errors::{
    AggregateError, RaceFailure, RemoteError, Retryable, TransitionError, ValidationError,
};
pub use self::events::DomainEvent;
pub use self::ids::{JobId, NodeId, ProcessId};
pub use self::job::{
    Job, JobErrorDetails, JobErrorKind, JobHandle, JobResult, JobSummary, TransferDirection,
};
pub use self::parameter::{AspectKind, AspectType, BomLifecycle, Depth, Direction, JobParameter};
pub use self::state::JobState;

//! OTA login core: data model, connector descriptors, page message
//! contracts, and the pure per-job state machine.
mod connector;
mod cycle;
mod effect;
mod job;
mod message;
mod msg;
mod pairing;
mod state;
mod update;

pub use connector::{ConnectorDescriptor, ConnectorRegistry, ExtraField, LoginSelectors};
pub use cycle::{CycleGate, CyclePermit};
pub use effect::JobEffect;
pub use job::{
    sort_oldest_first, ErrorCode, JobCredentials, JobId, JobListing, JobReport, JobStatus,
    JobType, PendingJob, ReportAck, ResultStatus,
};
pub use message::{LoginRequest, LoginResult, PageMessage};
pub use msg::JobMsg;
pub use pairing::{
    PairRequest, PairResponse, PairingError, PairingToken, MAX_DEVICE_NAME_LEN, PAIRING_CODE_LEN,
};
pub use state::{JobFlow, Phase};
pub use update::update;

use crate::{JobCredentials, LoginResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobMsg {
    /// The scheduler picked the job up.
    Start,
    CredentialsFetched(JobCredentials),
    /// The job source answered, but not with usable credentials.
    CredentialsUnavailable { message: String },
    /// The job source rejected the pairing token.
    NotPaired,
    TabOpened,
    TabFailed { browser_offline: bool, message: String },
    /// The tab finished loading, or the load wait ran out.
    PageReady { timed_out: bool },
    /// No listener in the page accepted the execute request.
    DeliveryFailed { message: String },
    ResultReceived(LoginResult),
    ResultTimedOut,
    /// Anything the scheduler did not anticipate.
    Crashed { message: String },
    /// The report effect ran (successfully or not).
    Reported,
}

use thiserror::Error;

/// Protocol-level failures surfaced to the message caller.
///
/// Everything else (path walks onto non-objects, listener compilation, engine
/// failures) propagates as plain runtime errors without translation.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid method")]
    InvalidMethod,
    #[error("Listener is not defined")]
    ListenerNotDefined,
    #[error("no element registered for guid '{0}'")]
    UnknownElement(String),
    #[error("message is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("cannot read '{segment}' of undefined while resolving '{path}'")]
    UndefinedSegment { path: String, segment: String },
    #[error("'{0}' is not a function")]
    NotCallable(String),
}

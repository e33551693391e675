//! Session control for AI practice calls: credit metering, transcript
//! capture, saving finished sessions and the call lifecycle that ties them
//! together.

pub mod backend;
pub mod call_controller;
pub mod context;
pub mod credit_meter;
pub mod error;
pub mod finalizer;
pub mod models;
pub mod persona;
pub mod transcript;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backend::{Backend, BackendClient};
pub use call_controller::{
    CallController, CallOutcome, CallSettings, CallSnapshot, CallState, CallUpdate,
    TerminationReason,
};
pub use context::{CredentialProvider, StaticCredential, UserContext, UserIdentity};
pub use credit_meter::CreditMeter;
pub use error::{BackendError, CallError, CredentialError, FinalizeError, PreconditionError};
pub use finalizer::{FinalizeOutcome, SessionFinalizer, SessionReceipt, SkipReason};
pub use transcript::{Speaker, TranscriptAccumulator, TranscriptTurn};
pub use transport::{
    CallEvent, ConnectionStatus, ConnectionTarget, EventSink, MicrophoneAccess, StartSession,
    TransportEvent, VoiceTransport,
};

//! Batched, resumable delivery of validated rows.

pub mod dispatcher;
pub mod session;

pub use dispatcher::{
    BatchDispatcher, DispatchConfig, DispatchOutcome, DispatchState, DispatchStatus, FailedRow,
    ProgressEvent,
};
pub use session::UploadSession;

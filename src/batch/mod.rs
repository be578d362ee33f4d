//! Atomic batch module - EIP-5792 batch construction, submission and tracking

mod builder;
mod poller;
mod submitter;
mod types;

pub use builder::{parse_amount, BatchBuilder, CallInput, BATCH_VERSION};
pub use poller::{classify_status, ConfirmationPoller, PollHandle, PollOutcome, PollStep, POLL_INTERVAL};
pub use submitter::{classify_response, submit_batch};
pub use types::{
    to_hex_quantity, BatchId, BatchRequest, Call, CallReceipt, CallsStatus,
    PaymasterServiceDirective, RequestCapabilities, SubmissionOutcome,
};

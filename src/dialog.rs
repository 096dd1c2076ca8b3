//! Call progress state machine
//!
//! Given where a call is in the sales script and what the caller just said,
//! picks the next utterances and what the provider should do afterwards.
//! Everything here is pure; the webhook handlers own the session side effects.

mod decide;
mod marker;
mod script;

#[cfg(test)]
mod proptests;

#[allow(unused_imports)] // Public API re-exports
pub use decide::{decide, Decision, NextAction, Turn, LOW_CONFIDENCE_THRESHOLD, MAX_RETRIES};
pub use marker::ProgressMarker;
pub use script::{OPERATOR_ROUTE, TRANSFER, WEB_CALL};

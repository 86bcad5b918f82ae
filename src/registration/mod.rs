//! Patient sign-up and the five-step doctor registration wizard.
//!
//! A doctor's progress is the `registration_step` stored on their profile.
//! Each wizard request is gated on it: later steps redirect back to the
//! first step not yet completed, earlier steps can be revisited freely.

pub mod forms;
pub mod manager;
pub mod routes;
pub mod state;

pub use forms::{FormErrors, NON_FIELD_ERRORS};
pub use manager::{RegistrationManager, StepOutcome, StepRequest, StepSubmission};
pub use routes::registration_routes;
pub use state::{Gate, RegistrationState, WizardStep};

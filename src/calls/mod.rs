//! Call tracking and recording decisions

pub mod call;
pub mod registry;

pub use call::{Call, CallContext, ConfirmationRequest, Partner};
pub use registry::CallRegistry;

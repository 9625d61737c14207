//! HTTP middleware: request logging and the `Source-Type` header guard.

pub mod logging;
pub mod source_type;

pub use logging::request_logging;
pub use source_type::{require_source_type, SOURCE_TYPE_HEADER};

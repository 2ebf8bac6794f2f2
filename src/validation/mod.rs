//! Request validation using the `validator` crate.
//!
//! ```rust,ignore
//! async fn register(ValidatedJson(req): ValidatedJson<RegisterRequest>) -> Result<...> {
//!     // req has passed its #[validate] rules
//! }
//! ```

mod extractor;

pub(crate) use extractor::json_rejection;
pub use extractor::{ValidatedJson, validation_messages};

//! Errors shared by the ingestion crates, and the classification every
//! component error implements so retry loops can decide without matching on
//! concrete variants.
//!
//! ```rust,ignore
//! use trading_common::error::ErrorClassification;
//!
//! match fetch_page().await {
//!     Err(e) if e.is_configuration() => return Err(e),
//!     Err(e) if e.is_transient() => sleep(policy.delay_for(attempt)).await,
//!     ...
//! }
//! ```

mod common;
mod traits;

pub use common::*;
pub use traits::*;

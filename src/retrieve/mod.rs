//! Dataset retrieval: downloads, calibration associations, decompression.
//!
//! [`RetrievalEngine`] drives the per-dataset download loop with retry and
//! pacing; [`CalSelectorClient`] resolves associated calibration files;
//! compressed products are inflated in-process after download.

mod calselector;
mod engine;
mod error;
mod filename;
mod pacing;
mod retry;
mod unzip;

pub use calselector::{CalSelectorClient, CalibScope};
pub use engine::{RetrievalEngine, RetrievalOptions, RetrievalOutcome};
pub use error::RetrieveError;
pub use filename::{filename_from_content_disposition, sanitize_filename};
pub use pacing::{RequestPacer, parse_retry_after};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
};
pub use unzip::{inflated_path, is_compressed_product, unpack_product, unpack_products};

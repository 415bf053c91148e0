//! On-disk formats for the exposure store.
//!
//! - `frame`: checksummed entries inside segment logs
//! - `batch_file`: staged key batches, one file per epoch
//! - `watermark`: epoch-completion and retention watermarks
//! - `layout`: where each file lives under the data directory

pub mod error;
pub mod frame;
pub mod batch_file;
pub mod watermark;
pub mod layout;
pub mod fixtures;

pub use error::{PersistenceError, Result};

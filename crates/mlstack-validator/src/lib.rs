//! Data validator flavors for mlstack.
//!
//! - [`profiler`]: deterministic dataset profiling and drift against a baseline
//! - [`writer`]: profile export, with the WhyLabs HTTP writer
//! - [`whylogs`]: the `whylogs` data validator component

pub mod profiler;
pub mod whylogs;
pub mod writer;

pub use profiler::profile_dataset;
pub use whylogs::WhylogsDataValidator;
pub use writer::{ProfileWriter, UploadTarget, WhyLabsWriter};

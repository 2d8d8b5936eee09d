//! Detector adapters.
//!
//! The pipeline never runs inference itself. A `DetectorBackend` turns one
//! frame into a list of `Detection`s; the registry picks which backend a
//! session uses.

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
pub use backends::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::{BackendRegistry, SharedBackend};
pub use result::Detection;

mod backend;
mod backends;
mod registry;
mod result;

pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::{TractBackend, TractConfig};
pub use backends::{ScriptedBackend, ScriptedConfig, StubBackend};
pub use registry::BackendRegistry;
pub use result::{Detection, COCO_LABELS};

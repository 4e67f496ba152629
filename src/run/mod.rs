//! Run registry: run ids, on-disk layout, manifests, and artifact I/O.

pub mod artifacts;
pub mod manifest;
pub mod paths;
pub mod registry;

pub use artifacts::{ArtifactData, ArtifactFormat, ArtifactSpec};
pub use manifest::{ArtifactDigest, RunInputs, RunManifest, StageRecord};
pub use paths::RunPaths;
pub use registry::{run_id_for, RunHandle, RunRegistry};

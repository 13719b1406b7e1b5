#[path = "common/mod.rs"]
mod common;

#[path = "session/session_load.rs"]
mod session_load;
#[path = "session/session_invoke.rs"]
mod session_invoke;
#[path = "session/session_generation.rs"]
mod session_generation;

#[path = "registry/registry_custom.rs"]
mod registry_custom;
#[path = "registry/registry_failures.rs"]
mod registry_failures;

#[path = "host/host_exports.rs"]
mod host_exports;

#[path = "segmentation/segmentation_pipeline.rs"]
mod segmentation_pipeline;

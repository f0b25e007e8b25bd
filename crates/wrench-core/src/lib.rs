mod config;
mod context;
mod descriptor;
mod error;
mod layout;
mod version;

pub use config::WorkspaceConfig;
pub use context::WorkspaceContext;
pub use descriptor::{AppDescriptor, DescriptorMap, Resolution};
pub use error::WrenchError;
pub use layout::{is_workspace_dir, WorkspaceLayout, DEFAULT_PRIMARY_APP, WORKSPACE_DIRS};
pub use version::{
    parse_lenient_version, parse_version_assignment, read_declared_version, VersionUpgrade,
};

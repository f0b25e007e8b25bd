mod descriptor_store;
mod excluded;
mod git_ops;
mod probe;
mod registry;

pub use descriptor_store::{read_descriptors, write_descriptors};
pub use excluded::{exclude_app, include_app, read_excluded_apps};
pub use git_ops::{
    clone_app_source, current_branch, has_local_changes, is_git_repo, is_shallow_repo,
    pull_app_source, upstream_remote, PullMode,
};
pub use probe::{AppProbe, GitAppProbe};
pub use registry::{AppInstaller, AppRegistry, AppRequest, RemoveOptions, SyncRequest};

#[cfg(test)]
mod tests;

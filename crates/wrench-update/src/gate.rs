use anyhow::Result;
use wrench_core::{VersionUpgrade, WorkspaceConfig, WrenchError};
use wrench_registry::AppProbe;

use crate::ops::WorkspaceOps;
use crate::reporter::{Prompt, Reporter};

/// Cancellation window shown before repositories are un-shallowed.
pub const SHALLOW_PAUSE_SECONDS: u64 = 10;

/// Compare the installed primary app with the version its remote branch carries.
pub fn detect_upgrade(probe: &dyn AppProbe, primary: &str) -> Result<VersionUpgrade> {
    let from = probe.current_version(primary)?;
    let to = probe.upstream_version(primary)?;
    let upgrade = VersionUpgrade::between(from.as_deref(), to.as_deref());
    tracing::debug!(
        primary,
        is_major = upgrade.is_major,
        versions = %upgrade.describe(),
        "version upgrade detected"
    );
    Ok(upgrade)
}

/// Decides whether an update may proceed across a version boundary.
pub struct VersionGate<'a> {
    prompt: &'a dyn Prompt,
    reporter: &'a dyn Reporter,
    ops: &'a dyn WorkspaceOps,
}

impl<'a> VersionGate<'a> {
    pub fn new(prompt: &'a dyn Prompt, reporter: &'a dyn Reporter, ops: &'a dyn WorkspaceOps) -> Self {
        Self {
            prompt,
            reporter,
            ops,
        }
    }

    pub fn handle(
        &self,
        upgrade: &VersionUpgrade,
        force: bool,
        reset: bool,
        config: &WorkspaceConfig,
    ) -> Result<()> {
        if upgrade.is_major {
            if force {
                self.reporter.warn(
                    "force flag used for a major version change; migrating will take \
                     significant time and might break custom apps",
                );
            } else {
                let message = format!(
                    "This update will cause a major version change ({}). It will take \
                     significant time to migrate and might break custom apps. Do you want to continue?",
                    upgrade.describe()
                );
                if !self.prompt.confirm(&message)? {
                    return Err(WrenchError::Cancelled {
                        reason: "major version upgrade declined".to_string(),
                    }
                    .into());
                }
            }
        }

        if !reset && config.shallow_clone() {
            self.reporter.warn(
                "shallow_clone is set but --reset was not passed, so repositories will be \
                 unshallowed; cancel now and rerun `wrench update --reset` to keep them shallow",
            );
            self.prompt.pause(SHALLOW_PAUSE_SECONDS)?;
        }

        if upgrade.is_major || force {
            self.ops.validate_environment(upgrade)?;
        }
        Ok(())
    }
}

mod gate;
mod ops;
mod orchestrator;
mod patches;
mod reporter;

pub use gate::{detect_upgrade, VersionGate, SHALLOW_PAUSE_SECONDS};
pub use ops::{
    reload_processes, restart_processes, RestartPlan, RestartRequest, RestartTarget, WorkspaceOps};
pub use orchestrator::{parse_app_subset, UpdateOptions, UpdateOrchestrator, UpdateReport, UpdateState};
pub use patches::{
    declared_patch_ids, read_patch_ledger, ArchivedSitesMigration, Migration, MigrationOutcome,
    PatchReport, PatchRunner, DECLARED_PATCHES,
};
pub use reporter::{HeadlessReporter, Prompt, Reporter, ScriptedPrompt};

//! Sequential stage runner with cooperative cancellation.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use super::{plan, released_after, validate_plan, PipelineStage, Stage};
use crate::artifact::filesystem::{ensure_dir, remove_tree, remove_tree_with_retries};
use crate::error::BuildError;
use crate::interrupt::InterruptGuard;
use crate::phases::Layout;

const CLEANUP_ATTEMPTS: u32 = 3;
const CLEANUP_DELAY: Duration = Duration::from_secs(1);

/// Executes one stage. The production implementation is
/// [`Phases`](crate::phases::Phases).
pub trait StageHandler {
    fn run_stage(&mut self, stage: Stage) -> Result<()>;
}

pub struct PhaseRunner {
    layout: Layout,
    guard: InterruptGuard,
    plan: Vec<PipelineStage>,
}

impl PhaseRunner {
    pub fn new(build_dir: impl Into<PathBuf>, guard: InterruptGuard) -> Self {
        Self::with_plan(build_dir, guard, plan())
    }

    pub fn with_plan(build_dir: impl Into<PathBuf>, guard: InterruptGuard, plan: Vec<PipelineStage>) -> Self {
        let build_dir: PathBuf = build_dir.into();
        Self {
            layout: Layout::new(&build_dir),
            guard,
            plan,
        }
    }

    /// Run every stage in order against a fresh build directory.
    ///
    /// The build directory is removed afterwards whatever the outcome. An
    /// interrupt observed between stages ends the run with
    /// [`BuildError::Cancelled`].
    pub fn run(&self, handler: &mut dyn StageHandler) -> Result<(), BuildError> {
        validate_plan(&self.plan).map_err(BuildError::InvalidPlan)?;

        let build_dir = &self.layout.build_dir;
        remove_tree(build_dir)
            .and_then(|()| ensure_dir(build_dir))
            .map_err(BuildError::Workspace)?;
        self.guard.register(build_dir);

        let result = self.run_stages(handler);

        info!("Cleaning up build directory...");
        remove_tree_with_retries(build_dir, CLEANUP_ATTEMPTS, CLEANUP_DELAY);
        self.guard.clear();

        result
    }

    fn run_stages(&self, handler: &mut dyn StageHandler) -> Result<(), BuildError> {
        let mut released = HashSet::new();

        for (index, step) in self.plan.iter().enumerate() {
            let stage = step.stage;
            if self.guard.is_interrupted() {
                return Err(BuildError::Cancelled { stage });
            }

            info!("Phase {}: {}", stage.number(), stage);
            if let Err(source) = handler.run_stage(stage) {
                if self.guard.is_interrupted() {
                    return Err(BuildError::Cancelled { stage });
                }
                return Err(BuildError::StageFailed { stage, source });
            }

            for name in released_after(&self.plan, index) {
                if !released.insert(name) {
                    continue;
                }
                let Some(path) = self.layout.intermediate(name) else {
                    continue;
                };
                debug!("Removing {} (no longer needed)", path.display());
                if let Err(e) = remove_tree(path) {
                    warn!("{:#}", e);
                }
            }
        }

        // A signal during the last stage still counts as a cancel.
        if self.guard.is_interrupted() {
            return Err(BuildError::Cancelled {
                stage: Stage::Assembly,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Records stages and, for each, the intermediates that still exist when
    /// it starts. Each stage writes its own output.
    struct FakeStages {
        layout: Layout,
        ran: Vec<Stage>,
        present: Vec<(Stage, Vec<&'static str>)>,
        fail_at: Option<Stage>,
        interrupt_at: Option<(Stage, InterruptGuard)>,
    }

    impl FakeStages {
        fn new(build_dir: &Path) -> Self {
            Self {
                layout: Layout::new(build_dir),
                ran: Vec::new(),
                present: Vec::new(),
                fail_at: None,
                interrupt_at: None,
            }
        }
    }

    impl StageHandler for FakeStages {
        fn run_stage(&mut self, stage: Stage) -> Result<()> {
            self.ran.push(stage);
            let present = ["components", "base", "rootfs.tar.gz", "carrier"]
                .into_iter()
                .filter(|name| self.layout.intermediate(name).is_some_and(|p| p.exists()))
                .collect();
            self.present.push((stage, present));

            if let Some((at, guard)) = &self.interrupt_at {
                if *at == stage {
                    guard.trigger();
                }
            }
            if self.fail_at == Some(stage) {
                bail!("{} exploded", stage);
            }

            let output = match stage {
                Stage::Preparation => &self.layout.components,
                Stage::Base => &self.layout.base,
                Stage::Target => &self.layout.rootfs_tarball,
                Stage::Carrier => &self.layout.carrier,
                Stage::Assembly => return Ok(()),
            };
            if stage == Stage::Target {
                fs::write(output, b"tarball")?;
            } else {
                fs::create_dir_all(output)?;
            }
            Ok(())
        }
    }

    #[test]
    fn runs_all_stages_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let build_dir = temp.path().join("build");
        fs::create_dir_all(build_dir.join("stale")).unwrap();

        let runner = PhaseRunner::new(&build_dir, InterruptGuard::new());
        let mut stages = FakeStages::new(&build_dir);
        runner.run(&mut stages).unwrap();

        assert_eq!(stages.ran, Stage::ALL.to_vec());
        assert!(!build_dir.exists());
    }

    #[test]
    fn intermediates_removed_when_no_longer_read() {
        let temp = TempDir::new().unwrap();
        let build_dir = temp.path().join("build");
        let runner = PhaseRunner::new(&build_dir, InterruptGuard::new());
        let mut stages = FakeStages::new(&build_dir);
        runner.run(&mut stages).unwrap();

        assert_eq!(
            stages.present[3],
            (Stage::Carrier, vec!["components", "base", "rootfs.tar.gz"])
        );
        assert_eq!(stages.present[4], (Stage::Assembly, vec!["carrier"]));
    }

    #[test]
    fn failure_stops_pipeline() {
        let temp = TempDir::new().unwrap();
        let build_dir = temp.path().join("build");
        let runner = PhaseRunner::new(&build_dir, InterruptGuard::new());
        let mut stages = FakeStages::new(&build_dir);
        stages.fail_at = Some(Stage::Target);

        let err = runner.run(&mut stages).unwrap_err();
        match &err {
            BuildError::StageFailed { stage, source } => {
                assert_eq!(*stage, Stage::Target);
                assert!(source.to_string().contains("Target exploded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.exit_code(), 1);
        assert_eq!(stages.ran, vec![Stage::Preparation, Stage::Base, Stage::Target]);
        assert!(!build_dir.exists());
    }

    #[test]
    fn interrupt_cancels_at_next_boundary() {
        let temp = TempDir::new().unwrap();
        let build_dir = temp.path().join("build");
        let guard = InterruptGuard::new();
        let runner = PhaseRunner::new(&build_dir, guard.clone());
        let mut stages = FakeStages::new(&build_dir);
        stages.interrupt_at = Some((Stage::Base, guard.clone()));

        let err = runner.run(&mut stages).unwrap_err();
        assert!(matches!(err, BuildError::Cancelled { stage: Stage::Target }));
        assert_eq!(err.exit_code(), 130);
        assert_eq!(stages.ran, vec![Stage::Preparation, Stage::Base]);
        assert!(!build_dir.exists());
        // Cleared after the run: a fresh signal is needed to cancel again.
        assert!(!guard.is_interrupted());
    }

    #[test]
    fn failure_after_interrupt_reports_cancel() {
        let temp = TempDir::new().unwrap();
        let build_dir = temp.path().join("build");
        let guard = InterruptGuard::new();
        let runner = PhaseRunner::new(&build_dir, guard.clone());
        let mut stages = FakeStages::new(&build_dir);
        stages.interrupt_at = Some((Stage::Carrier, guard.clone()));
        stages.fail_at = Some(Stage::Carrier);

        let err = runner.run(&mut stages).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn invalid_plan_runs_nothing() {
        let temp = TempDir::new().unwrap();
        let build_dir = temp.path().join("build");
        let mut bad = plan();
        bad.reverse();
        let runner = PhaseRunner::with_plan(&build_dir, InterruptGuard::new(), bad);
        let mut stages = FakeStages::new(&build_dir);

        assert!(matches!(runner.run(&mut stages), Err(BuildError::InvalidPlan(_))));
        assert!(stages.ran.is_empty());
        assert!(!build_dir.exists());
    }
}

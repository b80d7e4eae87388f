//! Build stages and the order they run in.
//!
//! The plan is data: each [`PipelineStage`] names the artifacts it reads
//! and the one it produces. [`validate_plan`] checks that every input is
//! either external (a host dependency) or produced by an earlier stage,
//! and the runner uses the same declarations to decide when an
//! intermediate artifact can be deleted.

mod runner;

pub use runner::{PhaseRunner, StageHandler};

use std::collections::HashSet;
use std::fmt;

/// Build stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Resolve and fetch component binaries.
    Preparation = 1,
    /// Bootstrap (or restore) the shared base rootfs.
    Base = 2,
    /// Derive and package the disk-installable rootfs.
    Target = 3,
    /// Derive the live installer rootfs.
    Carrier = 4,
    /// Bootloaders, splash and the hybrid ISO.
    Assembly = 5,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Preparation,
        Stage::Base,
        Stage::Target,
        Stage::Carrier,
        Stage::Assembly,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Preparation => write!(f, "Preparation"),
            Stage::Base => write!(f, "Base"),
            Stage::Target => write!(f, "Target"),
            Stage::Carrier => write!(f, "Carrier"),
            Stage::Assembly => write!(f, "Assembly"),
        }
    }
}

/// Inputs that come from the host rather than from a stage.
pub const EXTERNAL_INPUTS: &[&str] = &["release-host", "local-bin", "debootstrap", "host-boot-files"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStage {
    pub stage: Stage,
    pub inputs: &'static [&'static str],
    pub output: &'static str,
    /// Whether the stage consults the cache store.
    pub cache_applicable: bool,
}

pub fn plan() -> Vec<PipelineStage> {
    vec![
        PipelineStage {
            stage: Stage::Preparation,
            inputs: &["release-host", "local-bin"],
            output: "components",
            cache_applicable: false,
        },
        PipelineStage {
            stage: Stage::Base,
            inputs: &["debootstrap"],
            output: "base",
            cache_applicable: true,
        },
        PipelineStage {
            stage: Stage::Target,
            inputs: &["base"],
            output: "rootfs.tar.gz",
            cache_applicable: true,
        },
        PipelineStage {
            stage: Stage::Carrier,
            inputs: &["base", "rootfs.tar.gz", "components"],
            output: "carrier",
            cache_applicable: true,
        },
        PipelineStage {
            stage: Stage::Assembly,
            inputs: &["carrier", "host-boot-files"],
            output: "iso",
            cache_applicable: false,
        },
    ]
}

/// Check ordering and data flow of a plan. Returns a description of the
/// first problem found.
pub fn validate_plan(plan: &[PipelineStage]) -> Result<(), String> {
    let mut produced: HashSet<&str> = HashSet::new();
    let mut previous: Option<Stage> = None;

    for step in plan {
        if let Some(prev) = previous {
            if step.stage <= prev {
                return Err(format!("{} scheduled after {}", step.stage, prev));
            }
        }
        for input in step.inputs {
            if !produced.contains(input) && !EXTERNAL_INPUTS.contains(input) {
                return Err(format!(
                    "{} reads '{}' before any stage produces it",
                    step.stage, input
                ));
            }
        }
        if EXTERNAL_INPUTS.contains(&step.output) || !produced.insert(step.output) {
            return Err(format!("'{}' is produced more than once", step.output));
        }
        previous = Some(step.stage);
    }
    Ok(())
}

/// Outputs of stages up to and including `index` that no later stage reads.
pub fn released_after<'p>(plan: &'p [PipelineStage], index: usize) -> Vec<&'p str> {
    let still_needed: HashSet<&str> = plan
        .iter()
        .skip(index + 1)
        .flat_map(|step| step.inputs.iter().copied())
        .collect();
    plan.iter()
        .take(index + 1)
        .map(|step| step.output)
        .filter(|output| !still_needed.contains(output))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_is_valid() {
        let plan = plan();
        assert_eq!(validate_plan(&plan), Ok(()));
        let stages: Vec<Stage> = plan.iter().map(|s| s.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
    }

    #[test]
    fn stage_display_and_order() {
        assert_eq!(Stage::Carrier.to_string(), "Carrier");
        assert_eq!(Stage::Preparation.number(), 1);
        assert!(Stage::Base < Stage::Target);
    }

    #[test]
    fn input_from_later_stage_is_rejected() {
        let mut plan = plan();
        plan.swap(1, 2);
        let err = validate_plan(&plan).unwrap_err();
        assert!(err.contains("Base scheduled after Target") || err.contains("reads 'base'"));
    }

    #[test]
    fn unknown_input_is_rejected() {
        let mut plan = plan();
        plan[4].inputs = &["carrier", "initramfs"];
        assert_eq!(
            validate_plan(&plan),
            Err("Assembly reads 'initramfs' before any stage produces it".to_string())
        );
    }

    #[test]
    fn duplicate_output_is_rejected() {
        let mut plan = plan();
        plan[2].output = "base";
        assert!(validate_plan(&plan).unwrap_err().contains("more than once"));
    }

    #[test]
    fn base_released_once_both_derivatives_exist() {
        let plan = plan();
        assert_eq!(released_after(&plan, 0), Vec::<&str>::new());
        assert_eq!(released_after(&plan, 2), Vec::<&str>::new());
        assert_eq!(
            released_after(&plan, 3),
            vec!["components", "base", "rootfs.tar.gz"]
        );
        assert_eq!(
            released_after(&plan, 4),
            vec!["components", "base", "rootfs.tar.gz", "carrier", "iso"]
        );
    }
}

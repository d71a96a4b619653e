//! Post-run verification: last-chance copy, completeness score, reward file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::artifacts::{ArtifactBundle, Category, Layout, SyncPlan, fsops};

pub const REWARD_FILE: &str = "reward.txt";
pub const REPORT_FILE: &str = "verification.json";

/// Reward directory inside the sandbox.
pub const DEFAULT_REWARD_DIR: &str = "/logs/verifier";

/// Completeness reward. Anything short of full credit is truncated to whole
/// percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reward {
    pub score: u32,
    pub total: u32,
}

impl Reward {
    pub const fn is_full(self) -> bool {
        self.total > 0 && self.score >= self.total
    }

    /// `score * 100 / total`, integer division.
    pub const fn percent(self) -> u32 {
        if self.total == 0 { 0 } else { self.score * 100 / self.total }
    }

    pub fn value(self) -> f64 {
        if self.is_full() { 1.0 } else { f64::from(self.percent()) / 100.0 }
    }
}

impl fmt::Display for Reward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_full() {
            f.write_str("1")
        } else {
            write!(f, "{:.2}", self.value())
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckItem {
    pub category: Category,
    pub present: bool,
    pub files: usize,
}

/// Everything the verifier concluded.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    /// The sink whose bundle was graded.
    pub graded_sink: PathBuf,
    pub checklist: Vec<CheckItem>,
    pub missing: Vec<Category>,
    pub score: u32,
    pub total: u32,
    pub reward: f64,
    pub reward_text: String,
    /// Whether the last-chance copy from the workspace ran cleanly.
    pub last_copy_clean: Option<bool>,
}

#[derive(Debug)]
pub struct VerifyRequest<'a> {
    /// Live workspace to copy from first; None skips the last-chance copy.
    pub workspace: Option<&'a Path>,
    /// Sinks in preference order.
    pub sinks: &'a [PathBuf],
    pub required: &'a [Category],
    /// Where reward.txt and verification.json go.
    pub reward_dir: &'a Path,
}

/// Grade the best sink: highest score wins, ties go to the earlier sink.
pub fn grade(sinks: &[PathBuf], required: &[Category]) -> Option<(ArtifactBundle, Reward)> {
    let mut best: Option<(ArtifactBundle, Reward)> = None;
    for sink in sinks {
        let bundle = ArtifactBundle::inspect(sink, Layout::Sink);
        let c = bundle.completeness(required);
        let reward = Reward { score: c.score, total: c.total };
        if best.as_ref().is_none_or(|(_, r)| reward.score > r.score) {
            best = Some((bundle, reward));
        }
    }
    best
}

pub fn verify(req: &VerifyRequest<'_>) -> anyhow::Result<Verification> {
    let _span = tracing::info_span!("verify", sinks = req.sinks.len()).entered();

    let last_copy_clean = req.workspace.filter(|ws| ws.is_dir()).map(|ws| {
        let report = SyncPlan::new(ws, req.sinks.to_vec()).run_pass();
        report.is_clean()
    });

    let (bundle, reward) = grade(req.sinks, req.required)
        .ok_or_else(|| anyhow::anyhow!("no sinks to verify"))?;
    let c = bundle.completeness(req.required);

    let verification = Verification {
        graded_sink: bundle.root.clone(),
        checklist: req
            .required
            .iter()
            .map(|&category| {
                let p = bundle.presence(category);
                CheckItem { category, present: p.present, files: p.files }
            })
            .collect(),
        missing: c.missing,
        score: reward.score,
        total: reward.total,
        reward: reward.value(),
        reward_text: reward.to_string(),
        last_copy_clean,
    };

    fsops::atomic_write_bytes(&req.reward_dir.join(REWARD_FILE), verification.reward_text.as_bytes())?;
    fsops::atomic_write_json_pretty(&req.reward_dir.join(REPORT_FILE), &verification)?;
    tracing::info!(
        score = verification.score,
        total = verification.total,
        reward = %verification.reward_text,
        sink = %verification.graded_sink.display(),
        "verification complete"
    );
    Ok(verification)
}

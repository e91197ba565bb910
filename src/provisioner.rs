use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actions::{Action, ActionState, Policy};
use crate::host::Host;
use crate::ui;

/// What happened to an action during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Applied,
    Satisfied,
    Skipped,
    Failed,
    /// Would change the host (`plan` only).
    Pending,
    /// Never reached because a required action failed earlier.
    NotRun,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Applied => "applied",
            Outcome::Satisfied => "satisfied",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
            Outcome::Pending => "pending",
            Outcome::NotRun => "not run",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionReport {
    pub name: String,
    pub policy: Policy,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl ActionReport {
    fn new(action: &dyn Action, outcome: Outcome, detail: Option<String>) -> Self {
        Self {
            name: action.name(),
            policy: action.policy(),
            outcome,
            detail,
            revision: None,
        }
    }
}

/// Per-action record of a run, in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    actions: Vec<ActionReport>,
}

impl From<Vec<ActionReport>> for Report {
    fn from(actions: Vec<ActionReport>) -> Self {
        Self { actions }
    }
}

impl Report {
    pub fn actions(&self) -> &[ActionReport] {
        &self.actions
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.actions
            .iter()
            .filter(|entry| entry.outcome == outcome)
            .count()
    }

    /// The required action that stopped the run, if any.
    pub fn required_failure(&self) -> Option<&ActionReport> {
        self.actions
            .iter()
            .find(|entry| entry.policy == Policy::Required && entry.outcome == Outcome::Failed)
    }

    /// One-line tally, omitting outcomes that did not occur.
    pub fn tally(&self) -> String {
        let parts: Vec<String> = [
            Outcome::Applied,
            Outcome::Satisfied,
            Outcome::Pending,
            Outcome::Skipped,
            Outcome::Failed,
            Outcome::NotRun,
        ]
        .into_iter()
        .filter_map(|outcome| match self.count(outcome) {
            0 => None,
            n => Some(format!("{n} {outcome}")),
        })
        .collect();

        if parts.is_empty() {
            "nothing to do".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Print the end-of-run summary: one line per action, then the tally.
    pub fn print_summary(&self) {
        for entry in &self.actions {
            let line = match &entry.detail {
                Some(detail) => format!("{} [{}]: {detail}", entry.name, entry.policy),
                None => format!("{} [{}]", entry.name, entry.policy),
            };
            match entry.outcome {
                Outcome::Failed if entry.policy == Policy::Required => ui::error(line),
                Outcome::Failed => ui::warn(line),
                Outcome::Applied => ui::success("Applied", line),
                Outcome::Satisfied => ui::status("Satisfied", line),
                Outcome::Skipped => ui::status("Skipped", line),
                Outcome::Pending => ui::status("Pending", line),
                Outcome::NotRun => ui::status("Not run", line),
            }
        }

        if self.required_failure().is_some() {
            ui::error(format!("Provisioning stopped: {}", self.tally()));
        } else {
            ui::success("Finished", self.tally());
        }
    }
}

/// Bring the host into the desired state, one action at a time.
///
/// A failed required action stops the run; every later action is recorded as
/// [`Outcome::NotRun`]. Best-effort failures are recorded and the run goes on.
pub fn apply(actions: &[Box<dyn Action>], host: &Host) -> Report {
    let mut reports = Vec::with_capacity(actions.len());
    let mut stopped = false;

    for action in actions {
        let action = action.as_ref();
        if stopped {
            reports.push(ActionReport::new(action, Outcome::NotRun, None));
            continue;
        }

        let report = apply_one(action, host);
        if report.outcome == Outcome::Failed && report.policy == Policy::Required {
            stopped = true;
        }
        reports.push(report);
    }

    Report::from(reports)
}

fn apply_one(action: &dyn Action, host: &Host) -> ActionReport {
    let name = action.name();

    let pending = match action.check(host) {
        Ok(ActionState::Satisfied) => {
            ui::status("Fresh", &name);
            return ActionReport::new(action, Outcome::Satisfied, None);
        }
        Ok(ActionState::Skip(reason)) => {
            ui::status("Skipping", format!("{name} ({reason})"));
            return ActionReport::new(action, Outcome::Skipped, Some(reason));
        }
        Ok(ActionState::Pending(change)) => change,
        Err(err) => {
            tracing::debug!(action = %name, error = %format!("{err:#}"), "check failed; applying");
            "state unknown".to_string()
        }
    };

    tracing::debug!(action = %name, change = %pending, "applying");
    let progress = ui::Progress::new("Applying", name.clone());

    match action.apply(host) {
        Ok(applied) => {
            progress.success("Applied", applied.detail.clone());
            ActionReport {
                detail: applied.detail.or(Some(pending)),
                revision: applied.revision,
                ..ActionReport::new(action, Outcome::Applied, None)
            }
        }
        Err(err) => {
            let message = format!("{err:#}");
            match action.policy() {
                Policy::Required => progress.fail("Failed", &message),
                Policy::BestEffort => progress.warn("Failed", &message),
            }
            ActionReport::new(action, Outcome::Failed, Some(message))
        }
    }
}

/// Evaluate every check without touching the host.
pub fn plan(actions: &[Box<dyn Action>], host: &Host) -> Report {
    let reports = actions
        .iter()
        .map(|action| {
            let action = action.as_ref();
            let name = action.name();
            match action.check(host) {
                Ok(ActionState::Satisfied) => {
                    ui::status("Fresh", &name);
                    ActionReport::new(action, Outcome::Satisfied, None)
                }
                Ok(ActionState::Pending(change)) => {
                    ui::status("Would apply", format!("{name}: {change}"));
                    ActionReport::new(action, Outcome::Pending, Some(change))
                }
                Ok(ActionState::Skip(reason)) => {
                    ui::status("Would skip", format!("{name} ({reason})"));
                    ActionReport::new(action, Outcome::Skipped, Some(reason))
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    ui::warn(format!("{name}: check failed: {message}"));
                    ActionReport::new(action, Outcome::Failed, Some(message))
                }
            }
        })
        .collect::<Vec<_>>();

    Report::from(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{build_plan, Applied};
    use crate::host::fake::{host, FakeFetcher, FakeRunner};
    use crate::layout::{HostPath, Layout};
    use crate::manifest::{Manifest, PathsConfig};
    use anyhow::Result;
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Scripted action counting how often it is applied.
    struct Scripted {
        name: &'static str,
        policy: Policy,
        state: ActionState,
        fails: bool,
        applied: Rc<Cell<usize>>,
    }

    impl Scripted {
        fn boxed(
            name: &'static str,
            policy: Policy,
            fails: bool,
        ) -> (Box<dyn Action>, Rc<Cell<usize>>) {
            let applied = Rc::new(Cell::new(0));
            let action = Scripted {
                name,
                policy,
                state: ActionState::Pending("change".to_string()),
                fails,
                applied: applied.clone(),
            };
            (Box::new(action), applied)
        }
    }

    impl Action for Scripted {
        fn name(&self) -> String {
            self.name.to_string()
        }

        fn policy(&self) -> Policy {
            self.policy
        }

        fn check(&self, _host: &Host) -> Result<ActionState> {
            Ok(self.state.clone())
        }

        fn apply(&self, _host: &Host) -> Result<Applied> {
            self.applied.set(self.applied.get() + 1);
            if self.fails {
                anyhow::bail!("{} broke", self.name);
            }
            Ok(Applied::default())
        }
    }

    fn scratch_host(temp: &TempDir) -> Host {
        host(
            Layout::new(temp.path(), &PathsConfig::default()),
            &FakeRunner::new(),
            &FakeFetcher::default(),
        )
    }

    #[test]
    fn test_required_failure_stops_run() {
        let temp = TempDir::new().unwrap();
        let (first, first_count) = Scripted::boxed("first", Policy::Required, false);
        let (broken, _) = Scripted::boxed("broken", Policy::Required, true);
        let (later, later_count) = Scripted::boxed("later", Policy::BestEffort, false);

        let report = apply(&[first, broken, later], &scratch_host(&temp));

        let outcomes: Vec<Outcome> = report.actions().iter().map(|a| a.outcome).collect();
        assert_eq!(outcomes, vec![Outcome::Applied, Outcome::Failed, Outcome::NotRun]);
        assert_eq!(first_count.get(), 1);
        assert_eq!(later_count.get(), 0);
        assert_eq!(report.required_failure().unwrap().name, "broken");
        assert_eq!(
            report.actions()[1].detail.as_deref(),
            Some("broken broke")
        );
    }

    #[test]
    fn test_best_effort_failure_continues() {
        let temp = TempDir::new().unwrap();
        let (flaky, _) = Scripted::boxed("flaky", Policy::BestEffort, true);
        let (later, later_count) = Scripted::boxed("later", Policy::Required, false);

        let report = apply(&[flaky, later], &scratch_host(&temp));

        assert_eq!(report.actions()[0].outcome, Outcome::Failed);
        assert_eq!(report.actions()[1].outcome, Outcome::Applied);
        assert_eq!(later_count.get(), 1);
        assert!(report.required_failure().is_none());
        assert_eq!(report.tally(), "1 applied, 1 failed");
    }

    #[test]
    fn test_plan_never_applies() {
        let temp = TempDir::new().unwrap();
        let (action, count) = Scripted::boxed("pending", Policy::Required, false);

        let report = plan(&[action], &scratch_host(&temp));

        assert_eq!(report.actions()[0].outcome, Outcome::Pending);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_second_run_is_satisfied_and_byte_identical() {
        let temp = TempDir::new().unwrap();
        let manifest = Manifest::embedded().unwrap();
        let mut manifest = manifest;
        let required: Vec<_> = manifest.required_sources().cloned().collect();
        manifest.python.sources = required;

        let fetcher = FakeFetcher::default();
        fetcher.serve(&manifest.runtime.setup_url, b"true\n");
        let host = host(
            Layout::new(temp.path(), &manifest.paths),
            &FakeRunner::new(),
            &fetcher,
        );
        // The fake runner installs nothing, so stand in for the venv and checkout.
        let python = host.layout.venv_executable("python");
        fs::create_dir_all(python.parent().unwrap()).unwrap();
        fs::write(&python, "").unwrap();
        fs::create_dir_all(host.layout.source_dir("PyRIT")).unwrap();

        let actions = build_plan(&manifest, &host);
        let first = apply(&actions, &host);
        assert!(first.required_failure().is_none(), "{:?}", first);

        let wrapper = host.layout.path(HostPath::Bin).join("garak");
        let entry = host
            .layout
            .path(HostPath::Applications)
            .join("garak.desktop");
        let menu = host.layout.path(HostPath::MenusMerged).join("aisec.menu");
        let before: Vec<Vec<u8>> = [&wrapper, &entry, &menu]
            .iter()
            .map(|path| fs::read(path).unwrap())
            .collect();

        let second = apply(&actions, &host);
        for name in [
            "wrapper garak",
            "wrapper aisec-python",
            "desktop entry garak.desktop",
            "menu category aisec",
        ] {
            let record = second
                .actions()
                .iter()
                .find(|record| record.name == name)
                .unwrap();
            assert_eq!(record.outcome, Outcome::Satisfied, "{name}");
        }
        assert_eq!(
            second
                .actions()
                .iter()
                .find(|entry| entry.name == "desktop entry vigil.desktop")
                .unwrap()
                .outcome,
            Outcome::Skipped
        );

        let after: Vec<Vec<u8>> = [&wrapper, &entry, &menu]
            .iter()
            .map(|path| fs::read(path).unwrap())
            .collect();
        assert_eq!(before, after);
    }
}

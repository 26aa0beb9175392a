//! Run orchestration.
//!
//! A run parses the whole plan file first. Any configuration error stops the
//! run before the report is created or the platform is contacted. Otherwise
//! the report header is written, the plans execute strictly one after the
//! other against a single shared [`Client`], and the report is closed.
//!
//! A failed or interrupted run leaves the report open on purpose: the loader
//! synthesizes the missing delimiters, so whatever was recorded stays
//! readable.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::{Client, PlatformApi};
use crate::config::{Settings, version};
use crate::errors::{ParseError, RunError};
use crate::parser::parse_plans;
use crate::plan::{Plan, PlanSummary};
use crate::report::{ReportMeta, ReportSink, ReportWriter};
use crate::rules::{ExecutionContext, RuleRegistry};

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub report_path: PathBuf,
    pub plans: Vec<(String, PlanSummary)>,
}

pub struct Runner {
    settings: Settings,
    registry: RuleRegistry,
}

impl Runner {
    pub fn new(settings: Settings) -> Result<Self, RunError> {
        Ok(Self {
            settings,
            registry: RuleRegistry::builtin()?,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Read and parse a plan file without touching the platform.
    pub fn check(&self, plan_file: &Path) -> Result<Vec<Plan>, RunError> {
        let text = std::fs::read_to_string(plan_file).map_err(|e| RunError::PlanFile {
            path: plan_file.display().to_string(),
            details: e.to_string(),
        })?;
        let plans = parse_plans(&text, &self.registry).map_err(RunError::Config)?;
        info!(
            plan_file = %plan_file.display(),
            plans = plans.len(),
            "Plan file is valid"
        );
        Ok(plans)
    }

    /// Execute every plan in `plan_file` against `api`.
    ///
    /// The report goes to `report_path` when given, otherwise to
    /// `report_<run id>.json` in the configured report directory.
    pub async fn start(
        &self,
        plan_file: &Path,
        api: Arc<dyn PlatformApi>,
        report_path: Option<&Path>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, RunError> {
        let plans = self.check(plan_file)?;

        let meta = ReportMeta::new(
            &version().unwrap_or_else(|_| "unknown".to_string()),
            &plan_file.display().to_string(),
            settings_value(&self.settings),
        );
        let report_path = match report_path {
            Some(path) => path.to_path_buf(),
            None => self
                .settings
                .report_directory
                .join(format!("report_{}.json", meta.run_id)),
        };

        let writer = Arc::new(ReportWriter::create(&report_path, &meta)?);
        let sink: Arc<dyn ReportSink> = writer.clone();
        let client = Arc::new(Client::new(api, sink.clone()));
        let ctx = Arc::new(ExecutionContext::new(client, sink, &self.settings));

        info!(
            run_id = %meta.run_id,
            report = %report_path.display(),
            plans = plans.len(),
            "Run started"
        );

        let mut outcome = RunOutcome {
            report_path,
            plans: Vec::with_capacity(plans.len()),
        };
        for plan in &plans {
            if cancel.is_cancelled() {
                warn!(plan.name = %plan.name(), "Run interrupted before plan started");
                return Err(RunError::Interrupted);
            }

            writer.begin_plan(plan.name())?;
            let summary = plan.execute(&ctx, &cancel).await.inspect_err(|e| {
                error!(plan.name = %plan.name(), error = %e, "Plan aborted");
            })?;
            writer.end_plan()?;
            outcome.plans.push((plan.name().to_string(), summary));
        }

        writer.finish()?;
        info!(run_id = %meta.run_id, "Run finished");
        Ok(outcome)
    }
}

/// Render configuration errors one per line, for the terminal.
pub fn describe_config_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| format!("  {}: {}", e.path, e.message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Settings echoed into the report header.
pub fn settings_value(settings: &Settings) -> Value {
    serde_json::to_value(settings).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Fixture, InMemoryPlatform};
    use crate::report::load_report;
    use crate::test_helpers::user_json;

    const PLANS: &str = r#"
plans:
  - plan_name: first
    from: [{handles: [alice]}]
    do: [block]
  - plan_name: second
    from: [{ids: [12]}]
    that: [{follower: {more_than: 1000}}]
    do: [block]
"#;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn platform() -> Arc<InMemoryPlatform> {
        Arc::new(InMemoryPlatform::new(Fixture {
            users: vec![user_json(11, "alice", 5), user_json(12, "bob", 100)],
            ..Fixture::default()
        }))
    }

    #[tokio::test]
    async fn test_plans_run_in_order_into_one_report() {
        let dir = tempfile::tempdir().unwrap();
        let plan_file = write(dir.path(), "plans.yml", PLANS);
        let settings = Settings {
            report_directory: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let runner = Runner::new(settings).unwrap();
        let platform = platform();

        let outcome = runner
            .start(&plan_file, platform.clone(), None, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.plans.len(), 2);
        assert_eq!(outcome.plans[1].1.matched, 0);
        assert!(outcome.report_path.starts_with(dir.path()));
        assert_eq!(platform.block_calls(), vec![11]);

        let report = load_report(&outcome.report_path).unwrap();
        assert_eq!(report.meta.plan_file, plan_file.display().to_string());
        assert_eq!(report.meta.settings["block_follower"], true);
        let names: Vec<&str> = report.plans.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(report.plans[0].records.len(), 1);
        assert_eq!(report.plans[1].records.len(), 1);
    }

    #[tokio::test]
    async fn test_config_errors_stop_before_any_remote_call() {
        let dir = tempfile::tempdir().unwrap();
        let plan_file = write(
            dir.path(),
            "bad.yml",
            "plans: [{plan_name: bad, from: [{nope: 1}], do: [mute]}]",
        );
        let report_path = dir.path().join("report.json");
        let runner = Runner::new(Settings::default()).unwrap();
        let platform = platform();

        let result = runner
            .start(
                &plan_file,
                platform.clone(),
                Some(&report_path),
                CancellationToken::new(),
            )
            .await;
        match result {
            Err(RunError::Config(errors)) => {
                assert_eq!(errors.len(), 2);
                let text = describe_config_errors(&errors);
                assert!(text.contains("plans[0].from[0]"));
                assert!(text.contains("plans[0].do[0]"));
            }
            other => panic!("expected config errors, got {other:?}"),
        }
        assert_eq!(platform.call_count("me"), 0);
        assert_eq!(platform.call_count("users_by_ids"), 0);
        assert!(!report_path.exists());
    }

    #[tokio::test]
    async fn test_missing_plan_file() {
        let runner = Runner::new(Settings::default()).unwrap();
        let result = runner.check(Path::new("/nonexistent/plans.yml"));
        assert!(matches!(result, Err(RunError::PlanFile { .. })));
        assert_eq!(result.unwrap_err().exit_code(), 1);
    }

    #[test]
    fn test_settings_value() {
        let value = settings_value(&Settings::default());
        assert_eq!(value["block_following"], false);
        assert_eq!(value["max_slow_fan_out"], 8);
    }
}

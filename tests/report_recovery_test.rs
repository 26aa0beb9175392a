//! The report stays loadable however the run ends.

use anyhow::Result;
use async_trait::async_trait;
use puntgun::{
    client::{ApiResponse, Fixture, InMemoryPlatform, PlatformApi, UserList},
    config::Settings,
    errors::{ClientError, ReportError, RunError},
    model::Account,
    plan::Decision,
    report::{
        Recordable, Report, ReportMeta, ReportSink, ReportWriter, Warning, load_report,
        parse_report,
    },
    runner::Runner,
};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn user(id: u64, handle: &str) -> Value {
    json!({
        "id": id.to_string(),
        "username": handle,
        "name": handle,
        "public_metrics": {"followers_count": 3, "following_count": 4, "tweet_count": 5}
    })
}

/// Platform that fires the cancellation token as soon as anything is blocked,
/// standing in for a process killed right after the first decision.
struct InterruptAfterBlock {
    inner: InMemoryPlatform,
    token: CancellationToken,
}

#[async_trait]
impl PlatformApi for InterruptAfterBlock {
    async fn me(&self) -> Result<ApiResponse, ClientError> {
        self.inner.me().await
    }

    async fn users_by_handles(&self, handles: &[String]) -> Result<ApiResponse, ClientError> {
        self.inner.users_by_handles(handles).await
    }

    async fn users_by_ids(&self, ids: &[u64]) -> Result<ApiResponse, ClientError> {
        self.inner.users_by_ids(ids).await
    }

    async fn posts_by_ids(&self, ids: &[u64]) -> Result<ApiResponse, ClientError> {
        self.inner.posts_by_ids(ids).await
    }

    async fn list_page(
        &self,
        list: UserList,
        next_token: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        self.inner.list_page(list, next_token).await
    }

    async fn block(&self, source_id: u64, target_id: u64) -> Result<bool, ClientError> {
        let blocked = self.inner.block(source_id, target_id).await;
        self.token.cancel();
        blocked
    }
}

#[tokio::test]
async fn test_interrupted_run_leaves_loadable_report() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let plan_file = dir.path().join("plans.yml");
    std::fs::write(
        &plan_file,
        "plans: [{plan_name: p5, from: [{ids: [11, 12]}], do: [block]}]",
    )?;
    let report_path = dir.path().join("report.json");

    let token = CancellationToken::new();
    let platform = Arc::new(InterruptAfterBlock {
        inner: InMemoryPlatform::new(Fixture {
            users: vec![user(11, "first"), user(12, "second")],
            ..Fixture::default()
        }),
        token: token.clone(),
    });

    let runner = Runner::new(Settings::default())?;
    let result = runner
        .start(&plan_file, platform.clone(), Some(&report_path), token)
        .await;
    let error = result.expect_err("run should be interrupted");
    assert!(matches!(error, RunError::Interrupted));
    assert_eq!(error.exit_code(), 130);
    assert_eq!(platform.inner.block_calls(), vec![11]);

    let text = std::fs::read_to_string(&report_path)?;
    assert!(!text.trim_end().ends_with("]}\n]}"));

    let report = load_report(&report_path)?;
    assert_eq!(report.plans.len(), 1);
    assert_eq!(report.plans[0].name, "p5");
    assert_eq!(report.plans[0].records.len(), 1);
    let decision = Decision::from_record(&report.plans[0].records[0])?;
    assert_eq!(
        serde_json::to_value(&decision.account)?,
        serde_json::to_value(Account::from_api(&user(11, "first"), None))?
    );
    assert!(decision.actions[0].is_true());
    Ok(())
}

fn write_sample_report(path: &Path) -> Result<()> {
    let meta = ReportMeta::new("1.0.0", "plans.yml", json!({"block_follower": true}));
    let writer = ReportWriter::create(path, &meta)?;
    for (plan, count) in [("first", 2), ("second", 1)] {
        writer.begin_plan(plan)?;
        for index in 0..count {
            let warning = Warning {
                source: format!("plans[0].from[{index}]"),
                message: format!("note {index}, with ]}} inside"),
            };
            writer.emit(warning.to_record()?)?;
        }
        writer.end_plan()?;
    }
    writer.finish()?;
    Ok(())
}

fn assert_prefix_of(partial: &Report, full: &Report) {
    assert_eq!(partial.meta, full.meta);
    assert!(partial.plans.len() <= full.plans.len());
    for (plan, complete) in partial.plans.iter().zip(&full.plans) {
        assert_eq!(plan.name, complete.name);
        assert!(plan.records.len() <= complete.records.len());
        assert_eq!(plan.records[..], complete.records[..plan.records.len()]);
    }
}

#[test]
fn test_truncation_at_every_byte() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("report.json");
    write_sample_report(&path)?;
    let text = std::fs::read_to_string(&path)?;
    let full = parse_report(&text)?;
    assert_eq!(full.plans.len(), 2);
    assert_eq!(full.plans[0].records.len(), 2);

    let mut loadable = 0;
    for cut in (0..=text.len()).filter(|cut| text.is_char_boundary(*cut)) {
        match parse_report(&text[..cut]) {
            Ok(partial) => {
                assert_prefix_of(&partial, &full);
                loadable += 1;
            }
            Err(ReportError::Unloadable { attempts }) => assert_eq!(attempts.len(), 3),
            Err(other) => panic!("unexpected error at byte {cut}: {other}"),
        }
    }
    // at least: after the header, after each record and plan, the full file
    assert!(loadable >= 7, "only {loadable} loadable prefixes");
    Ok(())
}

#[test]
fn test_killed_after_first_record() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("report.json");
    let meta = ReportMeta::new("1.0.0", "plans.yml", json!({}));
    let warning = Warning {
        source: "plans[0].from[0]".into(),
        message: "first".into(),
    };
    {
        let writer = ReportWriter::create(&path, &meta)?;
        writer.begin_plan("p")?;
        writer.emit(warning.to_record()?)?;
        // dropped without end_plan or finish
    }

    let report = load_report(&path)?;
    assert_eq!(report.meta, meta);
    assert_eq!(report.plans[0].records.len(), 1);
    assert_eq!(Warning::from_record(&report.plans[0].records[0])?, warning);
    Ok(())
}

#[test]
fn test_writer_is_a_report_sink() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("report.json");
    let writer: Arc<dyn ReportSink> = Arc::new(ReportWriter::create(
        &path,
        &ReportMeta::new("1.0.0", "plans.yml", json!({})),
    )?);
    // no plan is open yet, so the record is dropped rather than corrupting the header
    writer.emit_recordable(&Warning {
        source: "x".into(),
        message: "y".into(),
    })?;
    assert!(load_report(&path)?.plans.is_empty());
    Ok(())
}

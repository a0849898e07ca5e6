mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{jan, FakeAgent, Harness};
use keeper_core::{CronFields, RunType};
use keeper_jobs::{Dispatcher, ReconcileReport, Reconciler};
use keeper_scheduler::{EntryOptions, RunOutcome, ScheduledJob, SchedulerEngine, Trigger};
use keeper_store::{NewJobDefinition, StoreContext};

struct Noop;

#[async_trait]
impl ScheduledJob for Noop {
    fn name(&self) -> &str {
        "noop"
    }
    async fn run(&self) -> RunOutcome {
        RunOutcome::Completed
    }
}

fn every_five() -> CronFields {
    CronFields::every_minute_matching("*/5")
}

#[test]
fn each_prescheduled_definition_gets_one_entry() {
    let h = Harness::new(FakeAgent::default());
    let pid = h.project("news");
    let job = h.periodic_job(pid, "news_spider", every_five(), jan(1));

    let report = h.reconciler.reconcile(&h.store()).unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            added: 1,
            removed: 0,
            invalid: 0
        }
    );
    assert_eq!(h.sorted_ids(), vec![format!("spider_job_{}:1704067200", job.id)]);

    let entry = h.engine.entry(&format!("spider_job_{}:1704067200", job.id)).unwrap();
    assert_eq!(entry.trigger, "cron[*/5 * * * *]");
    assert_eq!(entry.options.misfire_grace, Duration::from_secs(3600));
    assert_eq!(entry.options.max_instances, 999);
    assert!(entry.options.coalesce);
}

#[test]
fn second_pass_without_changes_is_a_noop() {
    let h = Harness::new(FakeAgent::default());
    let pid = h.project("news");
    h.periodic_job(pid, "news_spider", every_five(), jan(1));
    h.periodic_job(pid, "sports_spider", CronFields::every_minute_matching("0"), jan(1));

    let first = h.reconciler.reconcile(&h.store()).unwrap();
    assert_eq!(first.added, 2);
    let before = h.sorted_ids();

    let second = h.reconciler.reconcile(&h.store()).unwrap();
    assert!(second.is_noop());
    assert_eq!(h.sorted_ids(), before);
}

#[test]
fn cron_edit_rotates_the_entry_id() {
    let h = Harness::new(FakeAgent::default());
    let pid = h.project("news");
    let job = h.periodic_job(pid, "news_spider", every_five(), jan(1));
    h.reconciler.reconcile(&h.store()).unwrap();

    h.store()
        .update_job_cron(job.id, &CronFields::every_minute_matching("*/10"), jan(2))
        .unwrap();
    let report = h.reconciler.reconcile(&h.store()).unwrap();
    assert_eq!((report.added, report.removed), (1, 1));

    let new_id = format!("spider_job_{}:1704153600", job.id);
    assert_eq!(h.sorted_ids(), vec![new_id.clone()]);
    assert_eq!(h.engine.entry(&new_id).unwrap().trigger, "cron[*/10 * * * *]");

    h.reconciler.reconcile(&h.store()).unwrap();
    assert_eq!(h.sorted_ids(), vec![new_id]);
}

#[test]
fn deleted_definition_is_unscheduled() {
    let h = Harness::new(FakeAgent::default());
    let pid = h.project("news");
    let job = h.periodic_job(pid, "news_spider", every_five(), jan(1));
    h.reconciler.reconcile(&h.store()).unwrap();

    h.store().delete_job_definition(job.id).unwrap();
    let report = h.reconciler.reconcile(&h.store()).unwrap();
    assert_eq!(report.removed, 1);
    assert!(h.sorted_ids().is_empty());
}

#[test]
fn scheduled_and_on_demand_definitions_are_ignored() {
    let h = Harness::new(FakeAgent::default());
    let pid = h.project("news");
    let scheduled = h.periodic_job(pid, "news_spider", every_five(), jan(1));
    h.store().set_scheduled(scheduled.id, true).unwrap();
    h.store()
        .insert_job_definition(&NewJobDefinition {
            run_type: RunType::OnDemand,
            ..NewJobDefinition::periodic(pid, "adhoc_spider", every_five())
        })
        .unwrap();

    let report = h.reconciler.reconcile(&h.store()).unwrap();
    assert!(report.is_noop());
    assert!(h.sorted_ids().is_empty());
}

#[test]
fn entries_outside_the_job_namespace_survive() {
    let h = Harness::new(FakeAgent::default());
    h.engine
        .add_entry(
            "sys_sync_status",
            Trigger::every(Duration::from_secs(5)),
            Arc::new(Noop),
            EntryOptions::default(),
        )
        .unwrap();

    let report = h.reconciler.reconcile(&h.store()).unwrap();
    assert!(report.is_noop());
    assert_eq!(h.sorted_ids(), vec!["sys_sync_status".to_string()]);
}

#[test]
fn malformed_cron_is_counted_and_skipped() {
    let h = Harness::new(FakeAgent::default());
    let pid = h.project("news");
    let bad = CronFields {
        minute: "61".into(),
        ..CronFields::default()
    };
    h.periodic_job(pid, "broken_spider", bad, jan(1));
    let good = h.periodic_job(pid, "news_spider", every_five(), jan(1));

    let report = h.reconciler.reconcile(&h.store()).unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            added: 1,
            removed: 0,
            invalid: 1
        }
    );
    assert_eq!(h.sorted_ids(), vec![format!("spider_job_{}:1704067200", good.id)]);
}

#[test]
fn entry_removed_by_someone_else_is_not_an_error() {
    let h = Harness::new(FakeAgent::default());
    let pid = h.project("news");
    let job = h.periodic_job(pid, "news_spider", every_five(), jan(1));
    h.reconciler.reconcile(&h.store()).unwrap();

    h.store().delete_job_definition(job.id).unwrap();
    h.engine
        .remove_entry(&format!("spider_job_{}:1704067200", job.id))
        .unwrap();
    let report = h.reconciler.reconcile(&h.store()).unwrap();
    assert!(report.is_noop());
}

#[test]
fn unreadable_row_is_counted_and_the_rest_still_scheduled() {
    let h = Harness::new(FakeAgent::default());
    let pid = h.project("news");
    let bad = h.periodic_job(pid, "broken_spider", every_five(), jan(1));
    let good = h.periodic_job(pid, "news_spider", every_five(), jan(1));
    h.corrupt_job(bad.id, "modified_at", "2024-01-01 00:00:00");

    let report = h.reconciler.reconcile(&h.store()).unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            added: 1,
            removed: 0,
            invalid: 1
        }
    );
    assert_eq!(h.sorted_ids(), vec![format!("spider_job_{}:1704067200", good.id)]);
}

#[test]
fn pass_after_engine_drop_does_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = StoreContext::open(dir.path().join("keeper.db")).unwrap();
    let engine = Arc::new(SchedulerEngine::new(Duration::from_secs(1)));
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(FakeAgent::default())));
    let reconciler = Reconciler::new(&engine, dispatcher, ctx.clone());

    let store = ctx.scope().unwrap();
    store.insert_project_if_missing("news").unwrap();
    let pid = store.list_projects().unwrap()[0].id;
    store
        .insert_job_definition(&NewJobDefinition::periodic(pid, "news_spider", every_five()))
        .unwrap();

    drop(engine);
    let report = reconciler.reconcile(&store).unwrap();
    assert!(report.is_noop());
}

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    job::ScheduledJob,
    schedule::{next_fire_after, next_fire_at_or_after},
    types::{EntryOptions, EntrySnapshot, RunOutcome, Trigger},
};

/// Upper bound on overdue run times walked for one entry in one tick.
const MAX_CATCH_UP: usize = 1_000;

/// Counters shared between an entry and its in-flight instances.
#[derive(Default)]
struct EntryState {
    running: AtomicUsize,
    runs: AtomicU64,
    failures: AtomicU64,
    misfired: AtomicU64,
    last_outcome: Mutex<Option<RunOutcome>>,
}

impl EntryState {
    fn record(&self, outcome: &RunOutcome) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        if outcome.is_failed() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        *self
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome.clone());
    }
}

/// Holds one instance slot; released on drop, whatever way the instance ends.
struct InstanceSlot(Arc<EntryState>);

impl Drop for InstanceSlot {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::AcqRel);
    }
}

struct Entry {
    trigger: Trigger,
    options: EntryOptions,
    job: Arc<dyn ScheduledJob>,
    /// First fire time of an interval trigger.
    anchor: DateTime<Utc>,
    next_fire: Option<DateTime<Utc>>,
    state: Arc<EntryState>,
}

struct Launch {
    id: String,
    job: Arc<dyn ScheduledJob>,
    state: Arc<EntryState>,
    slot: InstanceSlot,
    scheduled_for: DateTime<Utc>,
}

/// In-process scheduler: a live set of entries keyed by id, each with a
/// trigger and a job, fired from a tokio tick loop.
///
/// Every launched instance runs in its own task, so entries never block each
/// other and a slow instance never delays the tick.
pub struct SchedulerEngine {
    entries: DashMap<String, Entry>,
    tick: Duration,
}

impl SchedulerEngine {
    pub fn new(tick: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            tick,
        }
    }

    /// Ids of every live entry, in no particular order.
    pub fn list_entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Add an entry. Fails with `EntryExists` unless `options.replace_existing`.
    pub fn add_entry(
        &self,
        id: impl Into<String>,
        trigger: Trigger,
        job: Arc<dyn ScheduledJob>,
        options: EntryOptions,
    ) -> Result<()> {
        self.add_entry_at(id, trigger, job, options, Utc::now())
    }

    /// [`add_entry`](Self::add_entry) with an explicit "now", for deterministic callers.
    pub fn add_entry_at(
        &self,
        id: impl Into<String>,
        trigger: Trigger,
        job: Arc<dyn ScheduledJob>,
        options: EntryOptions,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let id = id.into();
        let anchor = match &trigger {
            Trigger::Interval { every } => {
                if every.is_zero() {
                    return Err(SchedulerError::InvalidTrigger(format!(
                        "{id}: interval must be positive"
                    )));
                }
                chrono::Duration::from_std(*every)
                    .ok()
                    .and_then(|step| now.checked_add_signed(step))
                    .ok_or_else(|| {
                        SchedulerError::InvalidTrigger(format!("{id}: interval out of range"))
                    })?
            }
            Trigger::Cron { .. } => now,
        };
        let next_fire = match &trigger {
            Trigger::Interval { .. } => anchor,
            Trigger::Cron { .. } => next_fire_after(&trigger, anchor, now).ok_or_else(|| {
                SchedulerError::InvalidTrigger(format!("{id}: {trigger} never fires"))
            })?,
        };

        let entry = Entry {
            trigger,
            options,
            job,
            anchor,
            next_fire: Some(next_fire),
            state: Arc::default(),
        };

        match self.entries.entry(id) {
            MapEntry::Occupied(mut slot) => {
                if !entry.options.replace_existing {
                    return Err(SchedulerError::EntryExists {
                        id: slot.key().clone(),
                    });
                }
                debug!(entry_id = %slot.key(), next_fire = %next_fire, "entry replaced");
                slot.insert(entry);
            }
            MapEntry::Vacant(slot) => {
                debug!(entry_id = %slot.key(), next_fire = %next_fire, "entry added");
                slot.insert(entry);
            }
        }
        Ok(())
    }

    /// Remove an entry. In-flight instances run to completion.
    pub fn remove_entry(&self, id: &str) -> Result<()> {
        match self.entries.remove(id) {
            Some(_) => {
                debug!(entry_id = %id, "entry removed");
                Ok(())
            }
            None => Err(SchedulerError::EntryNotFound { id: id.to_string() }),
        }
    }

    pub fn entry(&self, id: &str) -> Option<EntrySnapshot> {
        self.entries.get(id).map(|e| snapshot(e.key(), e.value()))
    }

    /// Snapshots of every live entry, sorted by id.
    pub fn entries(&self) -> Vec<EntrySnapshot> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|e| snapshot(e.key(), e.value()))
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Launch every run time due at `now` and advance each entry past it.
    ///
    /// Returns the handles of the launched instances; the tick loop detaches
    /// them.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let mut launches = Vec::new();
        let mut exhausted = Vec::new();

        for mut item in self.entries.iter_mut() {
            let id = item.key().clone();
            let entry = item.value_mut();
            let Some(mut next) = entry.next_fire else {
                continue;
            };
            if next > now {
                continue;
            }

            let window_start = chrono::Duration::from_std(entry.options.misfire_grace)
                .ok()
                .and_then(|grace| now.checked_sub_signed(grace))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            if next < window_start {
                entry.state.misfired.fetch_add(1, Ordering::Relaxed);
                let resumed = next_fire_at_or_after(&entry.trigger, entry.anchor, window_start);
                warn!(
                    entry_id = %id,
                    missed = %next,
                    grace_secs = entry.options.misfire_grace.as_secs(),
                    "run time missed by more than the misfire grace, skipped"
                );
                match resumed {
                    Some(t) => next = t,
                    None => {
                        entry.next_fire = None;
                        exhausted.push(id);
                        continue;
                    }
                }
            }

            let mut due = Vec::new();
            let mut cursor = Some(next);
            while let Some(t) = cursor {
                if t > now || due.len() >= MAX_CATCH_UP {
                    break;
                }
                due.push(t);
                cursor = next_fire_after(&entry.trigger, entry.anchor, t);
            }
            if entry.options.coalesce && due.len() > 1 {
                due.drain(..due.len() - 1);
            }

            for scheduled_for in due {
                let running = entry.state.running.load(Ordering::Acquire);
                if running >= entry.options.max_instances {
                    warn!(
                        entry_id = %id,
                        running,
                        max_instances = entry.options.max_instances,
                        "maximum running instances reached, run skipped"
                    );
                    continue;
                }
                entry.state.running.fetch_add(1, Ordering::AcqRel);
                launches.push(Launch {
                    id: id.clone(),
                    job: Arc::clone(&entry.job),
                    state: Arc::clone(&entry.state),
                    slot: InstanceSlot(Arc::clone(&entry.state)),
                    scheduled_for,
                });
            }

            entry.next_fire = next_fire_after(&entry.trigger, entry.anchor, now);
            if entry.next_fire.is_none() {
                exhausted.push(id);
            }
        }

        for id in exhausted {
            if self.entries.remove(&id).is_some() {
                info!(entry_id = %id, "trigger exhausted, entry removed");
            }
        }

        launches.into_iter().map(spawn_instance).collect()
    }

    /// Main event loop. Ticks until `shutdown` broadcasts `true` or its sender drops.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "scheduler engine started");
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let launched = self.fire_due(Utc::now());
                    if !launched.is_empty() {
                        debug!(count = launched.len(), "instances launched");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn snapshot(id: &str, entry: &Entry) -> EntrySnapshot {
    EntrySnapshot {
        id: id.to_string(),
        trigger: entry.trigger.to_string(),
        next_fire: entry.next_fire,
        running: entry.state.running.load(Ordering::Acquire),
        runs: entry.state.runs.load(Ordering::Relaxed),
        failures: entry.state.failures.load(Ordering::Relaxed),
        misfired: entry.state.misfired.load(Ordering::Relaxed),
        last_outcome: entry
            .state
            .last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone(),
        options: entry.options.clone(),
    }
}

/// Run one instance in its own task; a panic inside the job becomes a failure.
fn spawn_instance(launch: Launch) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Launch {
            id,
            job,
            state,
            slot,
            scheduled_for,
        } = launch;
        let name = job.name().to_string();
        debug!(entry_id = %id, job = %name, %scheduled_for, "running entry");

        let outcome = match tokio::spawn(async move { job.run().await }).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => RunOutcome::Failed("job panicked".to_string()),
            Err(e) => RunOutcome::Failed(e.to_string()),
        };
        drop(slot);
        state.record(&outcome);

        match outcome {
            RunOutcome::Completed => debug!(entry_id = %id, job = %name, "entry run completed"),
            RunOutcome::Failed(reason) => {
                error!(entry_id = %id, job = %name, %reason, "entry run failed")
            }
        }
    })
}

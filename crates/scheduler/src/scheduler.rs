use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::task::{Task, TaskFn};

/// Fires registered tasks at their HH:MM wall-clock marks, at most once per
/// mark per calendar date. Task bodies run on their own tokio tasks; the
/// 1-second tick loop never waits on them.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    tasks: HashMap<String, Task>,
    running: bool,
    stop_tx: Option<watch::Sender<bool>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under `key`, replacing any existing task with that key.
    pub fn add_task(&self, key: &str, marks: impl IntoIterator<Item = String>, run: TaskFn) {
        let mut state = self.inner.state.lock().expect("scheduler state poisoned");
        state.tasks.insert(key.to_owned(), Task::new(key, marks, run));
    }

    pub fn remove_task(&self, key: &str) {
        let mut state = self.inner.state.lock().expect("scheduler state poisoned");
        state.tasks.remove(key);
    }

    pub fn task_count(&self) -> usize {
        let state = self.inner.state.lock().expect("scheduler state poisoned");
        state.tasks.len()
    }

    /// Start the tick loop. Idempotent.
    pub fn start(&self) {
        let mut state = self.inner.state.lock().expect("scheduler state poisoned");
        if state.running {
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        state.stop_tx = Some(stop_tx);
        state.running = true;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tick_loop(inner, stop_rx).await;
        });
    }

    /// Stop the tick loop. Idempotent; already-dispatched task bodies keep
    /// running.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock().expect("scheduler state poisoned");
        if !state.running {
            return;
        }
        if let Some(stop_tx) = state.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        state.running = false;
    }
}

async fn tick_loop(inner: Arc<Inner>, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                fire_due(&inner, Utc::now());
            }
            _ = stop_rx.changed() => {
                return;
            }
        }
    }
}

/// One tick: dispatch every task whose mark matches the current minute and
/// has not fired today, recording the firing before the body is spawned.
fn fire_due(inner: &Inner, now: DateTime<Utc>) -> usize {
    let mut state = inner.state.lock().expect("scheduler state poisoned");
    let mut fired = 0;

    for task in state.tasks.values_mut() {
        for mark in task.due_marks(now) {
            task.last_exec.insert(mark.clone(), now);
            tracing::debug!(task = %task.key, %mark, "firing scheduled task");
            tokio::spawn((task.run)());
            fired += 1;
        }
    }
    fired
}

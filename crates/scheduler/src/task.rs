use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// A task body; invoked on its own tokio task so it can never stall the tick
/// loop.
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Task {
    pub key: String,
    /// Wall-clock HH:MM marks; duplicates collapse.
    pub marks: BTreeSet<String>,
    /// Per-mark timestamp of the last firing.
    pub last_exec: HashMap<String, DateTime<Utc>>,
    pub run: TaskFn,
}

impl Task {
    pub fn new(key: &str, marks: impl IntoIterator<Item = String>, run: TaskFn) -> Self {
        Self {
            key: key.to_owned(),
            marks: marks.into_iter().collect(),
            last_exec: HashMap::new(),
            run,
        }
    }

    /// Marks due at `now`: the mark equals the current minute and has not
    /// already fired on the current date.
    pub fn due_marks(&self, now: DateTime<Utc>) -> Vec<String> {
        let minute = now.format("%H:%M").to_string();
        let today = now.format("%Y-%m-%d").to_string();

        self.marks
            .iter()
            .filter(|mark| **mark == minute)
            .filter(|mark| {
                self.last_exec
                    .get(*mark)
                    .map(|last| last.format("%Y-%m-%d").to_string() != today)
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}

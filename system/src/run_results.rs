use crate::settings::ProblemData;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one run as reported by the judge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunResult {
    pub status: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub time: Option<String>,
    pub memory: Option<String>,
}

/// Slots at or past this index are never allocated, whoever asks.
pub const MAX_RESULT_SLOTS: usize = 256;

/// One slot per input tab, possibly sparse.
///
/// With a problem attached, slot 0 is the judge submission, slot 1 the custom
/// input and the samples follow. Without one there is only the custom input.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResults {
    slots: Vec<Option<RunResult>>,
    sample_count: Option<usize>,
}

impl Default for RunResults {
    fn default() -> Self {
        Self {
            slots: vec![None],
            sample_count: None,
        }
    }
}

impl RunResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot_count_for(sample_count: Option<usize>) -> usize {
        match sample_count {
            Some(samples) => 2 + samples,
            None => 1,
        }
    }

    pub fn primary_input_index(has_problem: bool) -> usize {
        if has_problem {
            1
        } else {
            0
        }
    }

    pub fn sample_index(sample: usize) -> usize {
        2 + sample
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RunResult> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn as_slice(&self) -> &[Option<RunResult>] {
        &self.slots
    }

    /// Grows the slots up to `index` when needed. Returns false for an index past `MAX_RESULT_SLOTS`.
    pub fn set_at(&mut self, index: usize, value: RunResult) -> bool {
        let needed = match index.checked_add(1) {
            Some(needed) if needed <= MAX_RESULT_SLOTS => needed,
            _ => {
                log::warn!("Refusing run result slot {}", index);
                return false;
            }
        };
        if needed > self.slots.len() {
            self.slots.resize(needed, None);
        }
        self.slots[index] = Some(value);
        true
    }

    pub fn resize(&mut self, new_size: usize) {
        self.slots.resize(new_size, None);
    }

    /// Resizes only when the number of samples actually changed.
    pub fn sync_with_problem(&mut self, problem: Option<&ProblemData>) -> bool {
        let sample_count = problem.map(|p| p.samples.len());
        if self.sample_count == sample_count {
            return false;
        }
        self.sample_count = sample_count;
        let new_size = Self::slot_count_for(sample_count).min(MAX_RESULT_SLOTS);
        log::debug!("Run result slots: {} -> {}", self.slots.len(), new_size);
        self.resize(new_size);
        true
    }

    /// Stored results come back as an array, or as an object keyed by index when sparse.
    pub fn merge_remote(&mut self, value: Option<&Value>) {
        let entries: Vec<(usize, &Value)> = match value {
            Some(Value::Array(items)) => items.iter().enumerate().collect(),
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
                .collect(),
            _ => Vec::new(),
        };
        for (index, v) in entries {
            if v.is_null() {
                continue;
            }
            if index >= MAX_RESULT_SLOTS {
                log::warn!("Ignoring remote run result at slot {}", index);
                continue;
            }
            match serde_json::from_value::<RunResult>(v.clone()) {
                Ok(result) => {
                    if self.get(index) != Some(&result) {
                        self.set_at(index, result);
                    }
                }
                Err(e) => log::warn!("Ignoring malformed run result {}: {}", index, e),
            }
        }
    }
}

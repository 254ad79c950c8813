//! Persistence seam for tasks, blocks, snapshots and results.
//!
//! Every row is keyed by task id (plus page / block number where that
//! applies). [`MemoryRepository`] is the bundled implementation; anything
//! relational only needs to honour the same contract, in particular that
//! [`Repository::commit_snapshots`] is all-or-nothing.

use crate::error::ValidatorError;
use crate::model::{Block, BlockFilter, PageSnapshot, TaskStatus, ValidationTask};
use crate::output::ValidationResult;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a new task. Ids must be unique.
    async fn insert_task(&self, task: ValidationTask) -> Result<(), ValidatorError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<ValidationTask>, ValidatorError>;

    /// Overwrite an existing task row.
    async fn update_task(&self, task: &ValidationTask) -> Result<(), ValidatorError>;

    /// Replace the task's block set.
    async fn replace_blocks(&self, task_id: &str, blocks: Vec<Block>) -> Result<(), ValidatorError>;

    async fn query_blocks(
        &self,
        task_id: &str,
        filter: &BlockFilter,
    ) -> Result<Vec<Block>, ValidatorError>;

    /// Replace the task's snapshot set in one batch. Either every record in
    /// `snapshots` is stored or none is and the previous set is untouched.
    async fn commit_snapshots(
        &self,
        task_id: &str,
        snapshots: Vec<PageSnapshot>,
    ) -> Result<(), ValidatorError>;

    /// Snapshots ordered by page.
    async fn list_snapshots(&self, task_id: &str) -> Result<Vec<PageSnapshot>, ValidatorError>;

    /// Remove the task's snapshot records; returns how many were removed.
    async fn delete_snapshots(&self, task_id: &str) -> Result<usize, ValidatorError>;

    async fn insert_result(&self, result: ValidationResult) -> Result<(), ValidatorError>;

    /// Results in insertion order.
    async fn results(&self, task_id: &str) -> Result<Vec<ValidationResult>, ValidatorError>;
}

#[derive(Debug, Default)]
struct Tables {
    tasks: HashMap<String, ValidationTask>,
    blocks: HashMap<String, Vec<Block>>,
    snapshots: HashMap<String, Vec<PageSnapshot>>,
    results: HashMap<String, Vec<ValidationResult>>,
}

/// Mutex-guarded in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
    fail_snapshot_commits: AtomicBool,
    failing_updates: Mutex<HashMap<TaskStatus, usize>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make snapshot commits fail until switched off again.
    pub fn fail_snapshot_commits(&self, fail: bool) {
        self.fail_snapshot_commits.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` task updates that write `status` fail.
    pub fn fail_task_updates(&self, status: TaskStatus, count: usize) {
        if let Ok(mut f) = self.failing_updates.lock() {
            f.insert(status, count);
        }
    }

    fn take_update_failure(&self, status: TaskStatus) -> bool {
        let Ok(mut f) = self.failing_updates.lock() else {
            return false;
        };
        match f.get_mut(&status) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    /// Every task, oldest first.
    pub fn tasks(&self) -> Result<Vec<ValidationTask>, ValidatorError> {
        let mut tasks: Vec<ValidationTask> = self.lock()?.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.task_id.cmp(&b.task_id)));
        Ok(tasks)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, ValidatorError> {
        self.tables
            .lock()
            .map_err(|_| ValidatorError::Persistence("repository lock poisoned".into()))
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn insert_task(&self, task: ValidationTask) -> Result<(), ValidatorError> {
        let mut t = self.lock()?;
        if t.tasks.contains_key(&task.task_id) {
            return Err(ValidatorError::Persistence(format!(
                "task '{}' already exists",
                task.task_id
            )));
        }
        t.tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<ValidationTask>, ValidatorError> {
        Ok(self.lock()?.tasks.get(task_id).cloned())
    }

    async fn update_task(&self, task: &ValidationTask) -> Result<(), ValidatorError> {
        if self.take_update_failure(task.status) {
            return Err(ValidatorError::Persistence(format!(
                "injected update failure for task '{}'",
                task.task_id
            )));
        }
        let mut t = self.lock()?;
        match t.tasks.get_mut(&task.task_id) {
            Some(row) => {
                *row = task.clone();
                Ok(())
            }
            None => Err(ValidatorError::TaskNotFound {
                task_id: task.task_id.clone(),
            }),
        }
    }

    async fn replace_blocks(&self, task_id: &str, blocks: Vec<Block>) -> Result<(), ValidatorError> {
        self.lock()?.blocks.insert(task_id.to_string(), blocks);
        Ok(())
    }

    async fn query_blocks(
        &self,
        task_id: &str,
        filter: &BlockFilter,
    ) -> Result<Vec<Block>, ValidatorError> {
        let t = self.lock()?;
        Ok(t.blocks
            .get(task_id)
            .map(|blocks| filter.apply(blocks))
            .unwrap_or_default())
    }

    async fn commit_snapshots(
        &self,
        task_id: &str,
        mut snapshots: Vec<PageSnapshot>,
    ) -> Result<(), ValidatorError> {
        if self.fail_snapshot_commits.load(Ordering::SeqCst) {
            return Err(ValidatorError::Persistence(
                "injected snapshot commit failure".into(),
            ));
        }
        let mut pages = BTreeSet::new();
        for s in &snapshots {
            if s.task_id != task_id {
                return Err(ValidatorError::Persistence(format!(
                    "snapshot for task '{}' in batch for '{}'",
                    s.task_id, task_id
                )));
            }
            if !pages.insert(s.page_num) {
                return Err(ValidatorError::Persistence(format!(
                    "duplicate snapshot for page {} of task '{}'",
                    s.page_num, task_id
                )));
            }
        }
        snapshots.sort_by_key(|s| s.page_num);
        self.lock()?.snapshots.insert(task_id.to_string(), snapshots);
        Ok(())
    }

    async fn list_snapshots(&self, task_id: &str) -> Result<Vec<PageSnapshot>, ValidatorError> {
        Ok(self
            .lock()?
            .snapshots
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_snapshots(&self, task_id: &str) -> Result<usize, ValidatorError> {
        Ok(self
            .lock()?
            .snapshots
            .remove(task_id)
            .map(|s| s.len())
            .unwrap_or(0))
    }

    async fn insert_result(&self, result: ValidationResult) -> Result<(), ValidatorError> {
        self.lock()?
            .results
            .entry(result.task_id.clone())
            .or_default()
            .push(result);
        Ok(())
    }

    async fn results(&self, task_id: &str) -> Result<Vec<ValidationResult>, ValidatorError> {
        Ok(self
            .lock()?
            .results
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }
}

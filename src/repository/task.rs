//! Task facade: remote calls with optimistic local writes.
//!
//! Every remote failure is absorbed here. It is logged, the entity's sync state
//! is updated and the caller gets `None`.

use chrono::NaiveDate;
use color_eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::habitica::types::{
  ChecklistItem, EmptyResponse, Reminder, ScoringDirection, SyncState, Tag, Task, TaskResponse,
  TaskType, UserStats,
};
use crate::habitica::{ApiResult, TaskApi};
use crate::store::{LiveQuery, LocalStore, Query};

use super::task_local::TaskLocalRepository;

/// Stat changes caused by scoring a task, for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreNotification {
  pub health_diff: f64,
  pub mana_diff: f64,
  pub experience_diff: f64,
  pub gold_diff: f64,
  pub quest_damage: f64,
  pub positive: bool,
}

impl ScoreNotification {
  /// Difference between the stats before the call and the server's response.
  pub fn from_diff(before: &UserStats, after: &TaskResponse) -> Self {
    let health_diff = after.health.unwrap_or(0.0) - before.health;
    Self {
      health_diff,
      mana_diff: after.mana.unwrap_or(0.0) - before.mana,
      experience_diff: after.experience.unwrap_or(0.0) - before.experience,
      gold_diff: after.gold.unwrap_or(0.0) - before.gold,
      quest_damage: 0.0,
      positive: health_diff >= 0.0,
    }
  }
}

pub struct TaskRepository<A: TaskApi> {
  api: A,
  local: TaskLocalRepository,
  user_id: String,
  notifications: mpsc::UnboundedSender<ScoreNotification>,
}

/// Log and drop a remote failure.
pub(super) fn absorb<T>(operation: &str, result: ApiResult<T>) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(operation, status = ?e.status(), error = %e, "Remote call failed");
      None
    }
  }
}

/// Log and drop a local store failure.
pub(super) fn log_local<T>(operation: &str, result: Result<T>) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(operation, error = %e, "Local store write failed");
      None
    }
  }
}

impl<A: TaskApi> TaskRepository<A> {
  /// Build the facade and the receiving end of its score notifications.
  pub fn new(
    api: A,
    store: LocalStore,
    user_id: impl Into<String>,
  ) -> (Self, mpsc::UnboundedReceiver<ScoreNotification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let repo = Self {
      api,
      local: TaskLocalRepository::new(store),
      user_id: user_id.into(),
      notifications: tx,
    };
    (repo, rx)
  }

  pub fn local(&self) -> &TaskLocalRepository {
    &self.local
  }

  pub fn user_id(&self) -> &str {
    &self.user_id
  }

  // ---- Remote reads ----

  /// Fetch tasks. A full list (no due day) replaces the stored list.
  pub async fn retrieve_tasks(&self, due_on_day: Option<NaiveDate>) -> Option<Vec<Task>> {
    let tasks = absorb("retrieve_tasks", self.api.retrieve_tasks(due_on_day).await)?;
    if due_on_day.is_none() {
      log_local(
        "save_tasks",
        self.local.save_tasks(&self.user_id, tasks.clone()),
      );
      info!(count = tasks.len(), "Synced tasks");
    }
    Some(tasks)
  }

  pub async fn retrieve_completed_todos(&self) -> Option<Vec<Task>> {
    absorb(
      "retrieve_completed_todos",
      self.api.retrieve_completed_todos().await,
    )
  }

  pub async fn clear_completed_todos(&self) -> Option<Vec<Task>> {
    absorb(
      "clear_completed_todos",
      self.api.clear_completed_todos().await,
    )
  }

  pub async fn retrieve_user_stats(&self) -> Option<UserStats> {
    let mut stats = absorb("retrieve_user_stats", self.api.retrieve_user_stats().await)?;
    stats.user_id = self.user_id.clone();
    log_local("save_user_stats", self.local.save_user_stats(stats.clone()));
    Some(stats)
  }

  // ---- Local reads ----

  pub fn get_tasks(&self, query: Query<Task>) -> Result<LiveQuery<Task>> {
    self.local.get_tasks(&self.user_id, query)
  }

  pub fn get_tasks_of_type(&self, task_type: TaskType) -> Result<LiveQuery<Task>> {
    self.local.get_tasks_of_type(&self.user_id, task_type)
  }

  pub fn get_due_tasks(&self) -> Result<LiveQuery<Task>> {
    self.local.get_due_tasks(&self.user_id)
  }

  pub fn get_tags(&self) -> Result<LiveQuery<Tag>> {
    self.local.get_tags(&self.user_id)
  }

  pub fn get_reminders(&self) -> Result<LiveQuery<Task>> {
    self.local.get_reminders(&self.user_id)
  }

  pub fn save_tasks(&self, tasks: Vec<Task>) -> Result<()> {
    self.local.save_tasks(&self.user_id, tasks)
  }

  pub fn save_task(&self, task: Task) -> Result<()> {
    self.local.save_task(task)
  }

  pub fn get_new_task(&self, task_type: TaskType) -> Result<Task> {
    self.local.get_new_task(&self.user_id, task_type)
  }

  pub fn get_new_tag(&self) -> Tag {
    self.local.get_new_tag(&self.user_id)
  }

  pub fn get_new_checklist_item(&self) -> ChecklistItem {
    self.local.get_new_checklist_item()
  }

  pub fn get_new_reminder(&self) -> Reminder {
    self.local.get_new_reminder()
  }

  pub fn get_editable_task(&self, task_id: &str) -> Result<Option<Task>> {
    self.local.get_editable_task(task_id)
  }

  pub fn get_editable_tag(&self, tag_id: &str) -> Result<Option<Tag>> {
    self.local.get_editable_tag(tag_id)
  }

  pub fn fix_task_order(&self, task: &Task, position: i64) -> Result<bool> {
    self.local.fix_task_order(&task.id, position)
  }

  // ---- Remote writes ----

  /// Score a task and report the resulting stat changes.
  ///
  /// Without stored stats there is nothing to diff against, so the response is
  /// returned without touching the store or notifying.
  pub async fn score(&self, task: &Task, direction: ScoringDirection) -> Option<TaskResponse> {
    let response = absorb(
      "score_task",
      self.api.score_task(&task.id, direction).await,
    )?;

    let stats = log_local("get_user_stats", self.local.get_user_stats(&self.user_id)).flatten();
    let Some(stats) = stats else {
      debug!(task_id = %task.id, "No stored stats, skipping score bookkeeping");
      return Some(response);
    };

    let notification = ScoreNotification::from_diff(&stats, &response);
    // Buying a reward only notifies; the next sync brings the new stats
    if task.task_type != TaskType::Reward {
      log_local(
        "update_scored_task",
        self
          .local
          .update_scored_task(&self.user_id, &task.id, direction, &response),
      );
    }

    if self.notifications.send(notification).is_err() {
      debug!("Score notification dropped, no receiver");
    }
    Some(response)
  }

  /// Store the task right away, then replace it with the server's copy.
  pub async fn create_task(&self, task: &Task) -> Option<Task> {
    let mut local = task.clone();
    local.user_id = Some(self.user_id.clone());
    local.sync_state = SyncState::PendingSync;
    log_local("save_task", self.local.save_task(local.clone()));

    match self.api.create_task(&local).await {
      Ok(mut created) => {
        created.order = local.order;
        created.user_id = Some(self.user_id.clone());
        created.is_new = false;
        created.sync_state = SyncState::Clean;
        log_local(
          "replace_task",
          self.local.replace_task(&local.id, created.clone()),
        );
        debug!(local_id = %local.id, task_id = %created.id, "Created task");
        Some(created)
      }
      Err(e) => {
        warn!(task_id = %local.id, error = %e, "Creating task failed");
        self.mark_failed(&local.id);
        None
      }
    }
  }

  pub async fn create_tasks(&self, tasks: &[Task]) -> Option<Vec<Task>> {
    absorb("create_tasks", self.api.create_tasks(tasks).await)
  }

  /// Store the edit right away, then overwrite it with the server's copy.
  ///
  /// On failure the edit stays in the store, marked as failed.
  pub async fn update_task(&self, task: &Task) -> Option<Task> {
    let mut local = task.clone();
    local.sync_state = SyncState::PendingSync;
    log_local("save_task", self.local.save_task(local.clone()));

    match self.api.update_task(&local).await {
      Ok(mut updated) => {
        updated.order = local.order;
        updated.user_id = local.user_id.clone().or_else(|| Some(self.user_id.clone()));
        updated.is_new = false;
        updated.sync_state = SyncState::Clean;
        log_local("save_task", self.local.save_task(updated.clone()));
        Some(updated)
      }
      Err(e) => {
        warn!(task_id = %local.id, error = %e, "Updating task failed");
        self.mark_failed(&local.id);
        None
      }
    }
  }

  /// Create the task if the server has never seen it, otherwise update it.
  pub async fn sync_task(&self, task: &Task) -> Option<Task> {
    if task.is_new {
      self.create_task(task).await
    } else {
      self.update_task(task).await
    }
  }

  /// Delete remotely, then locally once the server confirms with 200.
  pub async fn delete_task(&self, task: &Task) -> Option<EmptyResponse> {
    let response = absorb("delete_task", self.api.delete_task(&task.id).await)?;
    if response.status == 200 {
      log_local("delete_task", self.local.delete_task(&task.id));
    } else {
      warn!(task_id = %task.id, status = response.status, "Delete not confirmed, keeping task");
    }
    Some(response)
  }

  pub async fn move_task(&self, task: &Task, position: i64) -> Option<Vec<String>> {
    absorb("move_task", self.api.move_task(&task.id, position).await)
  }

  pub async fn create_tag(&self, tag: &Tag) -> Option<Tag> {
    let mut created = absorb("create_tag", self.api.create_tag(tag).await)?;
    created.order = tag.order;
    created.user_id = Some(self.user_id.clone());
    log_local("save_tag", self.local.save_tag(created.clone()));
    Some(created)
  }

  pub async fn update_tag(&self, tag: &Tag) -> Option<Tag> {
    let mut updated = absorb("update_tag", self.api.update_tag(tag).await)?;
    updated.order = tag.order;
    updated.user_id = tag.user_id.clone().or_else(|| Some(self.user_id.clone()));
    log_local("save_tag", self.local.save_tag(updated.clone()));
    Some(updated)
  }

  pub async fn delete_tag(&self, tag: &Tag) -> Option<EmptyResponse> {
    let response = absorb("delete_tag", self.api.delete_tag(&tag.id).await)?;
    if response.status == 200 {
      log_local("delete_tag", self.local.delete_tag(&tag.id));
    } else {
      warn!(tag_id = %tag.id, status = response.status, "Delete not confirmed, keeping tag");
    }
    Some(response)
  }

  fn mark_failed(&self, task_id: &str) {
    log_local(
      "set_task_syncing",
      self.local.set_task_syncing(task_id, SyncState::SyncFailed),
    );
  }
}

//! Domain types mirrored from the Habitica API and kept in the local store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::form::LabeledValue;

/// Kind of task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
  Habit,
  Daily,
  Todo,
  Reward,
}

impl TaskType {
  pub fn as_str(&self) -> &'static str {
    match self {
      TaskType::Habit => "habit",
      TaskType::Daily => "daily",
      TaskType::Todo => "todo",
      TaskType::Reward => "reward",
    }
  }

  /// Key of this type's list in the server's `tasksOrder` map.
  pub fn order_key(&self) -> &'static str {
    match self {
      TaskType::Habit => "habits",
      TaskType::Daily => "dailys",
      TaskType::Todo => "todos",
      TaskType::Reward => "rewards",
    }
  }

  pub fn all() -> &'static [TaskType] {
    &[
      TaskType::Habit,
      TaskType::Daily,
      TaskType::Todo,
      TaskType::Reward,
    ]
  }

  /// Choices for pickers, labeled for display.
  pub fn choices() -> Vec<LabeledValue<TaskType>> {
    Self::all()
      .iter()
      .map(|t| {
        let label = match t {
          TaskType::Habit => "Habit",
          TaskType::Daily => "Daily",
          TaskType::Todo => "To-Do",
          TaskType::Reward => "Reward",
        };
        LabeledValue::new(*t, label)
      })
      .collect()
  }
}

impl fmt::Display for TaskType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "habit" | "habits" => Ok(TaskType::Habit),
      "daily" | "dailys" | "dailies" => Ok(TaskType::Daily),
      "todo" | "todos" => Ok(TaskType::Todo),
      "reward" | "rewards" => Ok(TaskType::Reward),
      other => Err(format!("unknown task type '{}'", other)),
    }
  }
}

/// Direction of a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringDirection {
  Up,
  Down,
}

impl ScoringDirection {
  pub fn as_str(&self) -> &'static str {
    match self {
      ScoringDirection::Up => "up",
      ScoringDirection::Down => "down",
    }
  }

  pub fn choices() -> Vec<LabeledValue<ScoringDirection>> {
    vec![
      LabeledValue::new(ScoringDirection::Up, "+"),
      LabeledValue::new(ScoringDirection::Down, "-"),
    ]
  }
}

/// Sync state of a locally written entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncState {
  /// Matches the last server response
  #[default]
  Clean,
  /// A remote write is in flight
  PendingSync,
  /// The last remote write failed; the local edit was kept
  SyncFailed,
}

impl SyncState {
  pub fn is_syncing(&self) -> bool {
    matches!(self, SyncState::PendingSync)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
  pub id: String,
  pub text: String,
  pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
  pub id: String,
  pub start_date: Option<DateTime<Utc>>,
  pub time: Option<DateTime<Utc>>,
  /// Owning task, filled in when reminders are listed across tasks
  #[serde(default)]
  pub task_id: Option<String>,
}

/// A task as stored locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  pub text: String,
  pub notes: String,
  pub task_type: TaskType,
  pub priority: f64,
  pub value: f64,
  pub completed: bool,
  pub is_due: bool,
  pub up: bool,
  pub down: bool,
  pub counter_up: i64,
  pub counter_down: i64,
  pub streak: i64,
  pub frequency: Option<String>,
  pub every_x: Option<i64>,
  pub start_date: Option<DateTime<Utc>>,
  pub due_date: Option<DateTime<Utc>>,
  pub checklist: Vec<ChecklistItem>,
  pub reminders: Vec<Reminder>,
  pub tags: Vec<String>,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,

  // Client-only fields
  /// Position within the list of this task's type
  pub order: i64,
  pub user_id: Option<String>,
  /// Created locally and never confirmed by the server
  pub is_new: bool,
  pub sync_state: SyncState,
}

impl Task {
  /// Blank task of the given type with a fresh local identifier.
  pub fn new_local(task_type: TaskType) -> Self {
    Self {
      id: new_local_id(),
      text: String::new(),
      notes: String::new(),
      task_type,
      priority: 1.0,
      value: 0.0,
      completed: false,
      is_due: false,
      up: true,
      down: true,
      counter_up: 0,
      counter_down: 0,
      streak: 0,
      frequency: None,
      every_x: None,
      start_date: None,
      due_date: None,
      checklist: Vec::new(),
      reminders: Vec::new(),
      tags: Vec::new(),
      created_at: None,
      updated_at: None,
      order: 0,
      user_id: None,
      is_new: true,
      sync_state: SyncState::Clean,
    }
  }

  /// Dailies that are due and unfinished to-dos.
  pub fn is_due_today(&self) -> bool {
    match self.task_type {
      TaskType::Daily => self.is_due,
      TaskType::Todo => !self.completed,
      _ => false,
    }
  }

  pub fn is_syncing(&self) -> bool {
    self.sync_state.is_syncing()
  }
}

/// Server-side list ordering keyed by `habits`, `dailys`, `todos`, `rewards`.
pub type TasksOrder = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
  pub id: String,
  pub name: String,
  pub challenge: bool,

  // Client-only fields
  pub order: i64,
  pub user_id: Option<String>,
}

impl Tag {
  pub fn new_local(id: Option<String>) -> Self {
    Self {
      id: id.unwrap_or_else(new_local_id),
      name: String::new(),
      challenge: false,
      order: 0,
      user_id: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Contributor {
  pub level: i64,
  pub text: Option<String>,
  pub admin: bool,
}

/// A reaction (like or flag) on a chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageReaction {
  pub user_id: String,
  pub has_reacted: bool,
}

impl ChatMessageReaction {
  /// Build a reaction list from the API's `{userId: bool}` map, sorted by user.
  pub fn from_map(map: HashMap<String, bool>) -> Vec<Self> {
    let mut reactions: Vec<Self> = map
      .into_iter()
      .map(|(user_id, has_reacted)| Self {
        user_id,
        has_reacted,
      })
      .collect();
    reactions.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    reactions
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub id: String,
  pub group_id: Option<String>,
  pub user_id: Option<String>,
  pub text: Option<String>,
  pub timestamp: Option<DateTime<Utc>>,
  pub username: Option<String>,
  pub flag_count: i64,
  pub contributor: Option<Contributor>,
  pub user_styles: Option<serde_json::Value>,
  pub likes: Vec<ChatMessageReaction>,
  pub flags: Vec<ChatMessageReaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
  pub id: String,
  pub name: String,
  pub summary: Option<String>,
  pub description: Option<String>,
  pub group_type: Option<String>,
  pub privacy: Option<String>,
  pub member_count: i64,
  pub leader_id: Option<String>,
  /// Latest chat as delivered with the group
  #[serde(default)]
  pub chat: Vec<ChatMessage>,
}

/// Numeric user stats used for score diffs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserStats {
  pub user_id: String,
  pub health: f64,
  pub max_health: f64,
  pub mana: f64,
  pub max_mana: f64,
  pub experience: f64,
  pub to_next_level: f64,
  pub gold: f64,
  pub level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
  pub id: String,
  pub display_name: Option<String>,
  pub username: Option<String>,
  pub stats: Option<UserStats>,
  pub contributor: Option<Contributor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxMessage {
  pub id: String,
  /// Owner of the inbox
  pub own_user_id: Option<String>,
  /// The other party of the conversation
  pub user_id: Option<String>,
  pub text: Option<String>,
  pub timestamp: Option<DateTime<Utc>>,
  pub username: Option<String>,
  pub sent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMembership {
  pub user_id: String,
  pub group_id: String,
}

impl GroupMembership {
  pub fn new(user_id: impl Into<String>, group_id: impl Into<String>) -> Self {
    Self {
      user_id: user_id.into(),
      group_id: group_id.into(),
    }
  }

  /// Primary key: user id followed by group id.
  pub fn key(user_id: &str, group_id: &str) -> String {
    format!("{}{}", user_id, group_id)
  }
}

/// Result of scoring a task
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskResponse {
  pub delta: Option<f64>,
  pub health: Option<f64>,
  pub mana: Option<f64>,
  pub experience: Option<f64>,
  pub gold: Option<f64>,
  pub level: Option<i64>,
}

/// Body of a successful response that carries no data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyResponse {
  /// HTTP status the server answered with
  pub status: u16,
}

pub fn new_local_id() -> String {
  uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_task_type_parsing_accepts_list_names() {
    assert_eq!("dailys".parse::<TaskType>(), Ok(TaskType::Daily));
    assert_eq!("Todo".parse::<TaskType>(), Ok(TaskType::Todo));
    assert!("chore".parse::<TaskType>().is_err());
  }

  #[test]
  fn test_due_today() {
    let mut daily = Task::new_local(TaskType::Daily);
    assert!(!daily.is_due_today());
    daily.is_due = true;
    assert!(daily.is_due_today());

    let mut todo = Task::new_local(TaskType::Todo);
    assert!(todo.is_due_today());
    todo.completed = true;
    assert!(!todo.is_due_today());

    let mut habit = Task::new_local(TaskType::Habit);
    habit.is_due = true;
    assert!(!habit.is_due_today());
  }

  #[test]
  fn test_new_local_ids_are_unique() {
    let a = Task::new_local(TaskType::Habit);
    let b = Task::new_local(TaskType::Habit);
    assert_ne!(a.id, b.id);
    assert!(a.is_new);
  }

  #[test]
  fn test_reactions_from_map_are_sorted() {
    let map = HashMap::from([("b".to_string(), true), ("a".to_string(), false)]);
    let reactions = ChatMessageReaction::from_map(map);
    assert_eq!(reactions[0].user_id, "a");
    assert!(!reactions[0].has_reacted);
    assert_eq!(reactions[1].user_id, "b");
  }

  #[test]
  fn test_membership_key_concatenates_ids() {
    assert_eq!(GroupMembership::key("u1", "g1"), "u1g1");
  }
}

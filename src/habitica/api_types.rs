//! Serde-deserializable types matching Habitica API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on what the local store keeps.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::types::{
  ChatMessage, ChatMessageReaction, ChecklistItem, Contributor, Group, InboxMessage, Member,
  Reminder, SyncState, Tag, Task, TaskResponse, TaskType, UserStats,
};

// ============================================================================
// Envelope and lenient field helpers
// ============================================================================

/// Every v3 response is wrapped as `{ "success": bool, "data": ..., "message": ... }`.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
  #[serde(default)]
  pub success: bool,
  pub data: Option<T>,
  pub message: Option<String>,
}

/// Decode a field, treating a value of the wrong shape as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned,
{
  let value = Value::deserialize(deserializer)?;
  Ok(serde_json::from_value(value).ok())
}

/// Decode a milliseconds-since-epoch number. Anything else is absent.
fn millis_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  Ok(
    value
      .as_f64()
      .and_then(|millis| DateTime::from_timestamp_millis(millis as i64)),
  )
}

/// Decode either milliseconds since epoch or an RFC 3339 string.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  if let Some(millis) = value.as_f64() {
    return Ok(DateTime::from_timestamp_millis(millis as i64));
  }
  Ok(
    value
      .as_str()
      .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
      .map(|dt| dt.with_timezone(&Utc)),
  )
}

/// Group leaders arrive either as an id string or as a populated user object.
fn leader_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  if let Some(id) = value.as_str() {
    return Ok(Some(id.to_string()));
  }
  Ok(
    value
      .get("_id")
      .or_else(|| value.get("id"))
      .and_then(|v| v.as_str())
      .map(String::from),
  )
}

fn default_true() -> bool {
  true
}

fn default_priority() -> f64 {
  1.0
}

/// The API sends both `id` and `_id` on most documents; either will do.
fn pick_id(id: Option<String>, underscore_id: Option<String>) -> Option<String> {
  id.filter(|s| !s.is_empty())
    .or(underscore_id.filter(|s| !s.is_empty()))
}

// ============================================================================
// Tasks and tags
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiChecklistItem {
  #[serde(default)]
  pub id: String,
  #[serde(default)]
  pub text: String,
  #[serde(default)]
  pub completed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiReminder {
  #[serde(default)]
  pub id: String,
  #[serde(rename = "startDate", default, deserialize_with = "lenient")]
  pub start_date: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "lenient")]
  pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTask {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(rename = "_id", default)]
  pub underscore_id: Option<String>,
  #[serde(default)]
  pub text: String,
  #[serde(default)]
  pub notes: String,
  #[serde(rename = "type")]
  pub task_type: TaskType,
  #[serde(default = "default_priority")]
  pub priority: f64,
  #[serde(default)]
  pub value: f64,
  #[serde(default)]
  pub completed: bool,
  #[serde(default)]
  pub is_due: bool,
  #[serde(default = "default_true")]
  pub up: bool,
  #[serde(default = "default_true")]
  pub down: bool,
  #[serde(default)]
  pub counter_up: i64,
  #[serde(default)]
  pub counter_down: i64,
  #[serde(default)]
  pub streak: i64,
  #[serde(default, deserialize_with = "lenient")]
  pub frequency: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub every_x: Option<i64>,
  #[serde(default, deserialize_with = "lenient")]
  pub start_date: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "lenient")]
  pub date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub checklist: Vec<ApiChecklistItem>,
  #[serde(default)]
  pub reminders: Vec<ApiReminder>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "lenient")]
  pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ApiTag {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "lenient")]
  pub challenge: Option<bool>,
}

/// Result of `POST /tasks/{id}/score/{direction}`
#[derive(Debug, Deserialize)]
pub struct ApiScoreResponse {
  #[serde(default, deserialize_with = "lenient")]
  pub delta: Option<f64>,
  #[serde(default, deserialize_with = "lenient")]
  pub hp: Option<f64>,
  #[serde(default, deserialize_with = "lenient")]
  pub mp: Option<f64>,
  #[serde(default, deserialize_with = "lenient")]
  pub exp: Option<f64>,
  #[serde(default, deserialize_with = "lenient")]
  pub gp: Option<f64>,
  #[serde(default, deserialize_with = "lenient")]
  pub lvl: Option<i64>,
}

// ============================================================================
// User and members
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ApiStats {
  #[serde(default)]
  pub hp: f64,
  #[serde(rename = "maxHealth", default)]
  pub max_health: f64,
  #[serde(default)]
  pub mp: f64,
  #[serde(rename = "maxMP", default)]
  pub max_mp: f64,
  #[serde(default)]
  pub exp: f64,
  #[serde(rename = "toNextLevel", default)]
  pub to_next_level: f64,
  #[serde(default)]
  pub gp: f64,
  #[serde(default)]
  pub lvl: i64,
}

#[derive(Debug, Deserialize)]
pub struct ApiUser {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(rename = "_id", default)]
  pub underscore_id: Option<String>,
  #[serde(default)]
  pub stats: Option<ApiStats>,
}

#[derive(Debug, Deserialize)]
pub struct ApiContributor {
  #[serde(default)]
  pub level: i64,
  #[serde(default)]
  pub text: Option<String>,
  #[serde(default)]
  pub admin: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiProfile {
  pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiLocalAuth {
  pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAuth {
  pub local: Option<ApiLocalAuth>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMember {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(rename = "_id", default)]
  pub underscore_id: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub profile: Option<ApiProfile>,
  #[serde(default, deserialize_with = "lenient")]
  pub auth: Option<ApiAuth>,
  #[serde(default, deserialize_with = "lenient")]
  pub stats: Option<ApiStats>,
  #[serde(default, deserialize_with = "lenient")]
  pub contributor: Option<ApiContributor>,
}

// ============================================================================
// Groups and messages
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiChatMessage {
  #[serde(default, deserialize_with = "lenient")]
  pub id: Option<String>,
  #[serde(rename = "uuid", default, deserialize_with = "lenient")]
  pub user_id: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub text: Option<String>,
  #[serde(default, deserialize_with = "millis_timestamp")]
  pub timestamp: Option<DateTime<Utc>>,
  #[serde(rename = "user", default, deserialize_with = "lenient")]
  pub username: Option<String>,
  #[serde(rename = "flagCount", default, deserialize_with = "lenient")]
  pub flag_count: Option<i64>,
  #[serde(default, deserialize_with = "lenient")]
  pub contributor: Option<ApiContributor>,
  #[serde(rename = "userStyles", default)]
  pub user_styles: Option<Value>,
  /// Required: a message without a likes map is rejected
  pub likes: HashMap<String, bool>,
  pub flags: HashMap<String, bool>,
}

/// `POST /groups/{id}/chat` wraps the new message
#[derive(Debug, Deserialize)]
pub struct ApiPostChatResponse {
  pub message: ApiChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct ApiGroup {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(rename = "_id", default)]
  pub underscore_id: Option<String>,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "lenient")]
  pub summary: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub description: Option<String>,
  #[serde(rename = "type", default, deserialize_with = "lenient")]
  pub group_type: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub privacy: Option<String>,
  #[serde(rename = "memberCount", default)]
  pub member_count: i64,
  #[serde(default, deserialize_with = "leader_id")]
  pub leader: Option<String>,
  #[serde(default)]
  pub chat: Vec<ApiChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ApiInboxMessage {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(rename = "_id", default)]
  pub underscore_id: Option<String>,
  #[serde(rename = "uuid", default, deserialize_with = "lenient")]
  pub user_id: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  pub text: Option<String>,
  #[serde(default, deserialize_with = "flexible_timestamp")]
  pub timestamp: Option<DateTime<Utc>>,
  #[serde(rename = "user", default, deserialize_with = "lenient")]
  pub username: Option<String>,
  #[serde(default)]
  pub sent: bool,
}

// ============================================================================
// Conversions to domain types
// ============================================================================

impl ApiTask {
  /// Convert to a stored task. Returns None when the server sent no id.
  pub fn into_task(self) -> Option<Task> {
    let id = pick_id(self.id, self.underscore_id)?;
    Some(Task {
      id,
      text: self.text,
      notes: self.notes,
      task_type: self.task_type,
      priority: self.priority,
      value: self.value,
      completed: self.completed,
      is_due: self.is_due,
      up: self.up,
      down: self.down,
      counter_up: self.counter_up,
      counter_down: self.counter_down,
      streak: self.streak,
      frequency: self.frequency,
      every_x: self.every_x,
      start_date: self.start_date,
      due_date: self.date,
      checklist: self
        .checklist
        .into_iter()
        .map(|item| ChecklistItem {
          id: item.id,
          text: item.text,
          completed: item.completed,
        })
        .collect(),
      reminders: self
        .reminders
        .into_iter()
        .map(|r| Reminder {
          id: r.id,
          start_date: r.start_date,
          time: r.time,
          task_id: None,
        })
        .collect(),
      tags: self.tags,
      created_at: self.created_at,
      updated_at: self.updated_at,
      order: 0,
      user_id: None,
      is_new: false,
      sync_state: SyncState::Clean,
    })
  }
}

impl ApiTag {
  pub fn into_tag(self) -> Option<Tag> {
    Some(Tag {
      id: self.id.filter(|s| !s.is_empty())?,
      name: self.name,
      challenge: self.challenge.unwrap_or(false),
      order: 0,
      user_id: None,
    })
  }
}

impl From<ApiScoreResponse> for TaskResponse {
  fn from(r: ApiScoreResponse) -> Self {
    TaskResponse {
      delta: r.delta,
      health: r.hp,
      mana: r.mp,
      experience: r.exp,
      gold: r.gp,
      level: r.lvl,
    }
  }
}

impl ApiStats {
  pub fn into_stats(self, user_id: &str) -> UserStats {
    UserStats {
      user_id: user_id.to_string(),
      health: self.hp,
      max_health: self.max_health,
      mana: self.mp,
      max_mana: self.max_mp,
      experience: self.exp,
      to_next_level: self.to_next_level,
      gold: self.gp,
      level: self.lvl,
    }
  }
}

impl From<ApiContributor> for Contributor {
  fn from(c: ApiContributor) -> Self {
    Contributor {
      level: c.level,
      text: c.text,
      admin: c.admin,
    }
  }
}

impl ApiMember {
  pub fn into_member(self) -> Option<Member> {
    let id = pick_id(self.id, self.underscore_id)?;
    Some(Member {
      stats: self.stats.map(|s| s.into_stats(&id)),
      display_name: self.profile.and_then(|p| p.name),
      username: self.auth.and_then(|a| a.local).and_then(|l| l.username),
      contributor: self.contributor.map(Contributor::from),
      id,
    })
  }
}

impl ApiChatMessage {
  /// Convert to a stored message belonging to `group_id`. Messages without an id are dropped.
  pub fn into_message(self, group_id: Option<&str>) -> Option<ChatMessage> {
    Some(ChatMessage {
      id: self.id.filter(|s| !s.is_empty())?,
      group_id: group_id.map(String::from),
      user_id: self.user_id,
      text: self.text,
      timestamp: self.timestamp,
      username: self.username,
      flag_count: self.flag_count.unwrap_or(0),
      contributor: self.contributor.map(Contributor::from),
      user_styles: self.user_styles.filter(|v| !v.is_null()),
      likes: ChatMessageReaction::from_map(self.likes),
      flags: ChatMessageReaction::from_map(self.flags),
    })
  }
}

impl ApiGroup {
  pub fn into_group(self) -> Option<Group> {
    let id = pick_id(self.id, self.underscore_id)?;
    let chat = self
      .chat
      .into_iter()
      .filter_map(|m| m.into_message(Some(&id)))
      .collect();
    Some(Group {
      name: self.name,
      summary: self.summary,
      description: self.description,
      group_type: self.group_type,
      privacy: self.privacy,
      member_count: self.member_count,
      leader_id: self.leader,
      chat,
      id,
    })
  }
}

impl ApiInboxMessage {
  pub fn into_message(self, own_user_id: Option<&str>) -> Option<InboxMessage> {
    Some(InboxMessage {
      id: pick_id(self.id, self.underscore_id)?,
      own_user_id: own_user_id.map(String::from),
      user_id: self.user_id,
      text: self.text,
      timestamp: self.timestamp,
      username: self.username,
      sent: self.sent,
    })
  }
}

// ============================================================================
// Request bodies
// ============================================================================

/// JSON body for creating or updating a task. Client-only fields are not sent.
pub fn task_body(task: &Task) -> Value {
  let checklist: Vec<Value> = task
    .checklist
    .iter()
    .map(|item| json!({ "id": item.id, "text": item.text, "completed": item.completed }))
    .collect();
  let reminders: Vec<Value> = task
    .reminders
    .iter()
    .map(|r| json!({ "id": r.id, "startDate": r.start_date, "time": r.time }))
    .collect();

  let mut body = json!({
    "text": task.text,
    "notes": task.notes,
    "type": task.task_type.as_str(),
    "priority": task.priority,
    "tags": task.tags,
    "checklist": checklist,
    "reminders": reminders,
  });

  // The server accepts client-chosen ids on create
  if task.is_new {
    body["id"] = json!(task.id);
  }

  match task.task_type {
    TaskType::Habit => {
      body["up"] = json!(task.up);
      body["down"] = json!(task.down);
    }
    TaskType::Daily => {
      body["frequency"] = json!(task.frequency);
      body["everyX"] = json!(task.every_x);
      body["startDate"] = json!(task.start_date);
    }
    TaskType::Todo => {
      body["date"] = json!(task.due_date);
    }
    TaskType::Reward => {
      body["value"] = json!(task.value);
    }
  }

  body
}

pub fn tag_body(tag: &Tag) -> Value {
  json!({
    "id": tag.id,
    "name": tag.name,
  })
}

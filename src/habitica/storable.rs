//! Store keys for Habitica types.

use crate::store::Storable;

use super::types::{
  ChatMessage, Group, GroupMembership, InboxMessage, Member, Tag, Task, UserStats,
};

impl Storable for Task {
  fn store_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "task"
  }
}

impl Storable for Tag {
  fn store_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "tag"
  }
}

impl Storable for Group {
  fn store_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "group"
  }
}

impl Storable for ChatMessage {
  fn store_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "chat_message"
  }
}

impl Storable for Member {
  fn store_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "member"
  }
}

impl Storable for InboxMessage {
  fn store_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "inbox_message"
  }
}

impl Storable for GroupMembership {
  fn store_key(&self) -> String {
    GroupMembership::key(&self.user_id, &self.group_id)
  }

  fn entity_type() -> &'static str {
    "group_membership"
  }
}

impl Storable for UserStats {
  fn store_key(&self) -> String {
    self.user_id.clone()
  }

  fn entity_type() -> &'static str {
    "user_stats"
  }
}

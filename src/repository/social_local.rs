//! Local reads and writes for groups, chat, members and the inbox.

use color_eyre::Result;
use std::collections::HashSet;
use tracing::debug;

use crate::habitica::types::{ChatMessage, Group, GroupMembership, InboxMessage, Member};
use crate::store::{LiveQuery, LocalStore, Query, WriteTxn};

#[derive(Clone, Debug)]
pub struct SocialLocalRepository {
  store: LocalStore,
}

impl SocialLocalRepository {
  pub fn new(store: LocalStore) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &LocalStore {
    &self.store
  }

  /// Save a group and treat its chat as the complete message list.
  pub fn save_group(&self, group: Group) -> Result<()> {
    self.store.write(|txn| put_group(txn, group, true))
  }

  /// Save several groups. Their chat is merged into what is stored.
  pub fn save_groups(&self, groups: Vec<Group>) -> Result<()> {
    self.store.write(|txn| {
      for group in groups {
        put_group(txn, group, false)?;
      }
      Ok(())
    })
  }

  pub fn save_member(&self, member: Member) -> Result<()> {
    self.store.write(|txn| txn.upsert(member))
  }

  /// Save the complete chat of a group, dropping stored messages not in `messages`.
  pub fn save_chat_messages(&self, group_id: &str, messages: Vec<ChatMessage>) -> Result<()> {
    self
      .store
      .write(|txn| put_chat(txn, group_id, messages, true))
  }

  /// Save one new message without touching the rest of the chat.
  pub fn save_chat_message(&self, group_id: &str, mut message: ChatMessage) -> Result<()> {
    message.group_id = Some(group_id.to_string());
    self.store.write(|txn| txn.upsert(message))
  }

  pub fn save_inbox_message(&self, own_user_id: &str, message: InboxMessage) -> Result<()> {
    self.save_inbox_messages(own_user_id, vec![message])
  }

  pub fn save_inbox_messages(
    &self,
    own_user_id: &str,
    messages: Vec<InboxMessage>,
  ) -> Result<()> {
    self.store.write(|txn| {
      for mut message in messages {
        message.own_user_id = Some(own_user_id.to_string());
        txn.upsert(message)?;
      }
      Ok(())
    })
  }

  /// Record a membership for every group id. Blank ids are skipped.
  ///
  /// The groups themselves need not be stored yet.
  pub fn save_group_memberships(&self, user_id: &str, group_ids: &[String]) -> Result<usize> {
    self.store.write(|txn| {
      let mut saved = 0;
      for group_id in group_ids.iter().filter(|id| !id.trim().is_empty()) {
        txn.upsert(GroupMembership::new(user_id, group_id.as_str()))?;
        saved += 1;
      }
      Ok(saved)
    })
  }

  /// Record the membership and store the group. Its chat is merged, never pruned.
  pub fn join_group(&self, user_id: &str, group: Group) -> Result<()> {
    self.store.write(|txn| {
      txn.upsert(GroupMembership::new(user_id, group.id.as_str()))?;
      put_group(txn, group, false)
    })
  }

  /// Drop the membership and store the group as it is after leaving.
  ///
  /// Does nothing unless the user was a member. Stored chat is kept.
  /// Returns whether anything changed.
  pub fn leave_group(&self, user_id: &str, group: Group) -> Result<bool> {
    self.store.write(|txn| {
      let key = GroupMembership::key(user_id, &group.id);
      if txn.delete::<GroupMembership>(&key)?.is_none() {
        return Ok(false);
      }
      put_group(txn, group, false)?;
      Ok(true)
    })
  }

  // ---- Queries ----

  pub fn get_group(&self, group_id: &str) -> Result<LiveQuery<Group>> {
    let group_id = group_id.to_string();
    self.store.live(Query::filter(move |g: &Group| g.id == group_id))
  }

  /// Chat of a group, newest first.
  pub fn get_chat_messages(&self, group_id: &str) -> Result<LiveQuery<ChatMessage>> {
    let group_id = group_id.to_string();
    self.store.live(
      Query::filter(move |m: &ChatMessage| m.group_id.as_deref() == Some(group_id.as_str()))
        .sort_by_key(|m| m.timestamp, false),
    )
  }

  /// Groups matching `query`, largest first.
  pub fn get_groups(&self, query: Query<Group>) -> Result<LiveQuery<Group>> {
    self.store.live(query.sort_by_key(|g| g.member_count, false))
  }

  pub fn get_group_memberships(&self, user_id: &str) -> Result<LiveQuery<GroupMembership>> {
    let user_id = user_id.to_string();
    self
      .store
      .live(Query::filter(move |m: &GroupMembership| m.user_id == user_id))
  }

  pub fn get_group_membership(
    &self,
    user_id: &str,
    group_id: &str,
  ) -> Result<Option<GroupMembership>> {
    self
      .store
      .get::<GroupMembership>(&GroupMembership::key(user_id, group_id))
  }

  pub fn get_member(&self, member_id: &str) -> Result<LiveQuery<Member>> {
    let member_id = member_id.to_string();
    self.store.live(Query::filter(move |m: &Member| m.id == member_id))
  }

  /// Latest message of each inbox conversation, newest first.
  pub fn get_messages_threads(&self, own_user_id: &str) -> Result<LiveQuery<InboxMessage>> {
    let own_user_id = own_user_id.to_string();
    self.store.live(
      Query::filter(move |m: &InboxMessage| {
        m.own_user_id.as_deref() == Some(own_user_id.as_str())
      })
      .sort_by_key(|m| m.timestamp, false)
      .distinct_by(|m| m.user_id.clone().unwrap_or_default()),
    )
  }

  /// One conversation, newest first.
  pub fn get_messages(
    &self,
    own_user_id: &str,
    with_user_id: &str,
  ) -> Result<LiveQuery<InboxMessage>> {
    let own_user_id = own_user_id.to_string();
    let with_user_id = with_user_id.to_string();
    self.store.live(
      Query::filter(move |m: &InboxMessage| {
        m.own_user_id.as_deref() == Some(own_user_id.as_str())
          && m.user_id.as_deref() == Some(with_user_id.as_str())
      })
      .sort_by_key(|m| m.timestamp, false),
    )
  }
}

fn put_group(txn: &mut WriteTxn<'_>, mut group: Group, complete_chat: bool) -> Result<()> {
  let chat = std::mem::take(&mut group.chat);
  let group_id = group.id.clone();
  txn.upsert(group)?;
  put_chat(txn, &group_id, chat, complete_chat)
}

fn put_chat(
  txn: &mut WriteTxn<'_>,
  group_id: &str,
  messages: Vec<ChatMessage>,
  complete: bool,
) -> Result<()> {
  if complete {
    let keep: HashSet<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    let owner = group_id.to_string();
    let stored = txn.select(&Query::filter(move |m: &ChatMessage| {
      m.group_id.as_deref() == Some(owner.as_str())
    }))?;
    let mut pruned = 0;
    for stale in stored.iter().filter(|m| !keep.contains(m.id.as_str())) {
      txn.delete::<ChatMessage>(&stale.id)?;
      pruned += 1;
    }
    if pruned > 0 {
      debug!(group_id, pruned, "Pruned chat messages");
    }
  }

  for mut message in messages {
    message.group_id = Some(group_id.to_string());
    txn.upsert(message)?;
  }
  Ok(())
}

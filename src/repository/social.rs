//! Social facade: groups, chat, members and the inbox.

use color_eyre::Result;
use tracing::{debug, warn};

use crate::habitica::types::{ChatMessage, EmptyResponse, Group, InboxMessage, Member};
use crate::habitica::SocialApi;
use crate::store::{LiveQuery, LocalStore, Query};

use super::social_local::SocialLocalRepository;
use super::task::{absorb, log_local};

pub struct SocialRepository<A: SocialApi> {
  api: A,
  local: SocialLocalRepository,
  user_id: String,
}

impl<A: SocialApi> SocialRepository<A> {
  pub fn new(api: A, store: LocalStore, user_id: impl Into<String>) -> Self {
    Self {
      api,
      local: SocialLocalRepository::new(store),
      user_id: user_id.into(),
    }
  }

  pub fn local(&self) -> &SocialLocalRepository {
    &self.local
  }

  pub async fn retrieve_group(&self, group_id: &str) -> Option<Group> {
    let group = absorb("retrieve_group", self.api.retrieve_group(group_id).await)?;
    log_local("save_group", self.local.save_group(group.clone()));
    Some(group)
  }

  /// Fetch a group's complete chat and replace the stored one.
  pub async fn retrieve_chat(&self, group_id: &str) -> Option<Vec<ChatMessage>> {
    let messages = absorb("retrieve_chat", self.api.retrieve_chat(group_id).await)?;
    log_local(
      "save_chat_messages",
      self.local.save_chat_messages(group_id, messages.clone()),
    );
    Some(messages)
  }

  pub async fn post_chat_message(&self, group_id: &str, text: &str) -> Option<ChatMessage> {
    let message = absorb(
      "post_chat_message",
      self.api.post_chat_message(group_id, text).await,
    )?;
    log_local(
      "save_chat_message",
      self.local.save_chat_message(group_id, message.clone()),
    );
    Some(message)
  }

  pub async fn join_group(&self, group_id: &str) -> Option<Group> {
    let group = absorb("join_group", self.api.join_group(group_id).await)?;
    log_local(
      "join_group",
      self.local.join_group(&self.user_id, group.clone()),
    );
    Some(group)
  }

  /// Leave remotely, then drop the local membership once the server confirms with 200.
  pub async fn leave_group(&self, group_id: &str) -> Option<EmptyResponse> {
    let response = absorb("leave_group", self.api.leave_group(group_id).await)?;
    if response.status != 200 {
      warn!(group_id, status = response.status, "Leave not confirmed, keeping membership");
      return Some(response);
    }

    let group = match self.api.retrieve_group(group_id).await {
      Ok(group) => Some(group),
      Err(e) => {
        debug!(group_id, error = %e, "Group not readable after leaving, using stored copy");
        self.stored_group_after_leave(group_id)
      }
    };

    match group {
      Some(group) => {
        log_local("leave_group", self.local.leave_group(&self.user_id, group));
      }
      None => {
        warn!(group_id, "Left a group that is not stored locally");
      }
    }
    Some(response)
  }

  fn stored_group_after_leave(&self, group_id: &str) -> Option<Group> {
    let live = log_local("get_group", self.local.get_group(group_id))?;
    let mut group = live.first()?.clone();
    group.member_count = (group.member_count - 1).max(0);
    Some(group)
  }

  pub async fn retrieve_member(&self, member_id: &str) -> Option<Member> {
    let member = absorb("retrieve_member", self.api.retrieve_member(member_id).await)?;
    log_local("save_member", self.local.save_member(member.clone()));
    Some(member)
  }

  pub async fn retrieve_inbox_messages(&self) -> Option<Vec<InboxMessage>> {
    let messages = absorb(
      "retrieve_inbox_messages",
      self.api.retrieve_inbox_messages().await,
    )?;
    log_local(
      "save_inbox_messages",
      self.local.save_inbox_messages(&self.user_id, messages.clone()),
    );
    Some(messages)
  }

  // ---- Local reads ----

  pub fn get_group(&self, group_id: &str) -> Result<LiveQuery<Group>> {
    self.local.get_group(group_id)
  }

  pub fn get_groups(&self, query: Query<Group>) -> Result<LiveQuery<Group>> {
    self.local.get_groups(query)
  }

  pub fn get_chat_messages(&self, group_id: &str) -> Result<LiveQuery<ChatMessage>> {
    self.local.get_chat_messages(group_id)
  }

  pub fn get_messages_threads(&self) -> Result<LiveQuery<InboxMessage>> {
    self.local.get_messages_threads(&self.user_id)
  }

  pub fn get_messages(&self, with_user_id: &str) -> Result<LiveQuery<InboxMessage>> {
    self.local.get_messages(&self.user_id, with_user_id)
  }
}

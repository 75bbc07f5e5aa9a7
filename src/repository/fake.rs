//! Scripted API used by repository tests.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::habitica::types::{
  ChatMessage, EmptyResponse, Group, InboxMessage, Member, ScoringDirection, Tag, Task,
  TaskResponse, UserStats,
};
use crate::habitica::{ApiError, ApiResult, SocialApi, TaskApi};

/// Canned response for the next call of a kind.
pub enum Reply<T> {
  Ok(T),
  Fail(u16),
}

impl<T> Reply<T> {
  fn into_result(self) -> ApiResult<T> {
    match self {
      Reply::Ok(value) => Ok(value),
      Reply::Fail(status) => Err(ApiError::Status {
        status,
        message: "scripted failure".to_string(),
      }),
    }
  }
}

/// Every method pops the next scripted reply for its kind and fails with 503 when none is left.
#[derive(Default)]
pub struct FakeApi {
  pub tasks: Mutex<VecDeque<Reply<Vec<Task>>>>,
  pub task: Mutex<VecDeque<Reply<Task>>>,
  pub tag: Mutex<VecDeque<Reply<Tag>>>,
  pub empty: Mutex<VecDeque<Reply<EmptyResponse>>>,
  pub score: Mutex<VecDeque<Reply<TaskResponse>>>,
  pub order: Mutex<VecDeque<Reply<Vec<String>>>>,
  pub stats: Mutex<VecDeque<Reply<UserStats>>>,
  pub group: Mutex<VecDeque<Reply<Group>>>,
  pub chat: Mutex<VecDeque<Reply<Vec<ChatMessage>>>>,
  pub message: Mutex<VecDeque<Reply<ChatMessage>>>,
  pub member: Mutex<VecDeque<Reply<Member>>>,
  pub inbox: Mutex<VecDeque<Reply<Vec<InboxMessage>>>>,
  /// Names of the calls made, in order
  pub calls: Mutex<Vec<String>>,
}

fn next<T>(
  queue: &Mutex<VecDeque<Reply<T>>>,
  calls: &Mutex<Vec<String>>,
  call: &str,
) -> ApiResult<T> {
  calls.lock().unwrap().push(call.to_string());
  queue
    .lock()
    .unwrap()
    .pop_front()
    .unwrap_or(Reply::Fail(503))
    .into_result()
}

impl FakeApi {
  pub fn push<T>(queue: &Mutex<VecDeque<Reply<T>>>, reply: Reply<T>) {
    queue.lock().unwrap().push_back(reply);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl TaskApi for FakeApi {
  async fn retrieve_tasks(&self, due_on_day: Option<NaiveDate>) -> ApiResult<Vec<Task>> {
    let call = match due_on_day {
      Some(day) => format!("retrieve_tasks {}", day),
      None => "retrieve_tasks".to_string(),
    };
    next(&self.tasks, &self.calls, &call)
  }

  async fn retrieve_completed_todos(&self) -> ApiResult<Vec<Task>> {
    next(&self.tasks, &self.calls, "retrieve_completed_todos")
  }

  async fn clear_completed_todos(&self) -> ApiResult<Vec<Task>> {
    next(&self.tasks, &self.calls, "clear_completed_todos")
  }

  async fn create_task(&self, task: &Task) -> ApiResult<Task> {
    next(&self.task, &self.calls, &format!("create_task {}", task.id))
  }

  async fn create_tasks(&self, tasks: &[Task]) -> ApiResult<Vec<Task>> {
    next(&self.tasks, &self.calls, &format!("create_tasks {}", tasks.len()))
  }

  async fn update_task(&self, task: &Task) -> ApiResult<Task> {
    next(&self.task, &self.calls, &format!("update_task {}", task.id))
  }

  async fn delete_task(&self, task_id: &str) -> ApiResult<EmptyResponse> {
    next(&self.empty, &self.calls, &format!("delete_task {}", task_id))
  }

  async fn score_task(
    &self,
    task_id: &str,
    direction: ScoringDirection,
  ) -> ApiResult<TaskResponse> {
    next(
      &self.score,
      &self.calls,
      &format!("score_task {} {}", task_id, direction.as_str()),
    )
  }

  async fn move_task(&self, task_id: &str, position: i64) -> ApiResult<Vec<String>> {
    next(&self.order, &self.calls, &format!("move_task {} {}", task_id, position))
  }

  async fn create_tag(&self, tag: &Tag) -> ApiResult<Tag> {
    next(&self.tag, &self.calls, &format!("create_tag {}", tag.id))
  }

  async fn update_tag(&self, tag: &Tag) -> ApiResult<Tag> {
    next(&self.tag, &self.calls, &format!("update_tag {}", tag.id))
  }

  async fn delete_tag(&self, tag_id: &str) -> ApiResult<EmptyResponse> {
    next(&self.empty, &self.calls, &format!("delete_tag {}", tag_id))
  }

  async fn retrieve_user_stats(&self) -> ApiResult<UserStats> {
    next(&self.stats, &self.calls, "retrieve_user_stats")
  }
}

#[async_trait]
impl SocialApi for FakeApi {
  async fn retrieve_group(&self, group_id: &str) -> ApiResult<Group> {
    next(&self.group, &self.calls, &format!("retrieve_group {}", group_id))
  }

  async fn retrieve_chat(&self, group_id: &str) -> ApiResult<Vec<ChatMessage>> {
    next(&self.chat, &self.calls, &format!("retrieve_chat {}", group_id))
  }

  async fn post_chat_message(&self, group_id: &str, _text: &str) -> ApiResult<ChatMessage> {
    next(&self.message, &self.calls, &format!("post_chat_message {}", group_id))
  }

  async fn join_group(&self, group_id: &str) -> ApiResult<Group> {
    next(&self.group, &self.calls, &format!("join_group {}", group_id))
  }

  async fn leave_group(&self, group_id: &str) -> ApiResult<EmptyResponse> {
    next(&self.empty, &self.calls, &format!("leave_group {}", group_id))
  }

  async fn retrieve_member(&self, member_id: &str) -> ApiResult<Member> {
    next(&self.member, &self.calls, &format!("retrieve_member {}", member_id))
  }

  async fn retrieve_inbox_messages(&self) -> ApiResult<Vec<InboxMessage>> {
    next(&self.inbox, &self.calls, "retrieve_inbox_messages")
  }
}

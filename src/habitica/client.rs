//! Habitica v3 REST client.
//!
//! Each method issues exactly one request and yields one value or one error.
//! The `TaskApi` and `SocialApi` traits are the seams the repositories are written against.

use async_trait::async_trait;
use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;

use super::api_types::{
  tag_body, task_body, ApiChatMessage, ApiEnvelope, ApiGroup, ApiInboxMessage, ApiMember,
  ApiPostChatResponse, ApiScoreResponse, ApiTag, ApiTask, ApiUser,
};
use super::types::{
  ChatMessage, EmptyResponse, Group, InboxMessage, Member, ScoringDirection, Tag, Task,
  TaskResponse, UserStats,
};

/// Why a remote call produced no value.
#[derive(Debug, Error)]
pub enum ApiError {
  /// Network failure, or a body that could not be read
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),
  /// The server answered with a non-success status
  #[error("server responded with {status}: {message}")]
  Status { status: u16, message: String },
  /// The server answered successfully but not with what was asked for
  #[error("unexpected response: {0}")]
  Malformed(String),
}

impl ApiError {
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Status { status, .. } => Some(*status),
      ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
      ApiError::Malformed(_) => None,
    }
  }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Task and tag endpoints.
#[async_trait]
pub trait TaskApi: Send + Sync {
  /// `GET /tasks/user`, optionally only tasks due on a given day.
  async fn retrieve_tasks(&self, due_on_day: Option<NaiveDate>) -> ApiResult<Vec<Task>>;
  async fn retrieve_completed_todos(&self) -> ApiResult<Vec<Task>>;
  async fn clear_completed_todos(&self) -> ApiResult<Vec<Task>>;
  async fn create_task(&self, task: &Task) -> ApiResult<Task>;
  async fn create_tasks(&self, tasks: &[Task]) -> ApiResult<Vec<Task>>;
  async fn update_task(&self, task: &Task) -> ApiResult<Task>;
  async fn delete_task(&self, task_id: &str) -> ApiResult<EmptyResponse>;
  async fn score_task(&self, task_id: &str, direction: ScoringDirection)
    -> ApiResult<TaskResponse>;
  /// Returns the new id order of the moved task's list.
  async fn move_task(&self, task_id: &str, position: i64) -> ApiResult<Vec<String>>;
  async fn create_tag(&self, tag: &Tag) -> ApiResult<Tag>;
  async fn update_tag(&self, tag: &Tag) -> ApiResult<Tag>;
  async fn delete_tag(&self, tag_id: &str) -> ApiResult<EmptyResponse>;
  async fn retrieve_user_stats(&self) -> ApiResult<UserStats>;
}

/// Group, chat, member and inbox endpoints.
#[async_trait]
pub trait SocialApi: Send + Sync {
  async fn retrieve_group(&self, group_id: &str) -> ApiResult<Group>;
  async fn retrieve_chat(&self, group_id: &str) -> ApiResult<Vec<ChatMessage>>;
  async fn post_chat_message(&self, group_id: &str, text: &str) -> ApiResult<ChatMessage>;
  async fn join_group(&self, group_id: &str) -> ApiResult<Group>;
  async fn leave_group(&self, group_id: &str) -> ApiResult<EmptyResponse>;
  async fn retrieve_member(&self, member_id: &str) -> ApiResult<Member>;
  async fn retrieve_inbox_messages(&self) -> ApiResult<Vec<InboxMessage>>;
}

/// Habitica API client
#[derive(Clone)]
pub struct HabiticaClient {
  http: reqwest::Client,
  base: Url,
  user_id: String,
}

impl HabiticaClient {
  pub fn new(config: &Config) -> Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_credentials(
      &config.api.url,
      &config.api.user_id,
      &token,
      config.api.client_id.as_deref(),
    )
  }

  pub fn with_credentials(
    url: &str,
    user_id: &str,
    api_token: &str,
    client_id: Option<&str>,
  ) -> Result<Self> {
    let base = Url::parse(url)
      .and_then(|u| u.join("api/v3/"))
      .map_err(|e| eyre!("Invalid Habitica URL '{}': {}", url, e))?;

    let mut headers = HeaderMap::new();
    headers.insert(
      "x-api-user",
      HeaderValue::from_str(user_id).map_err(|e| eyre!("Invalid user id: {}", e))?,
    );
    let mut key = HeaderValue::from_str(api_token).map_err(|e| eyre!("Invalid API token: {}", e))?;
    key.set_sensitive(true);
    headers.insert("x-api-key", key);
    let client_header = format!("{}-{}", user_id, client_id.unwrap_or(env!("CARGO_PKG_NAME")));
    headers.insert(
      "x-client",
      HeaderValue::from_str(&client_header).map_err(|e| eyre!("Invalid client id: {}", e))?,
    );

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      user_id: user_id.to_string(),
    })
  }

  /// The authenticated user's id
  pub fn user_id(&self) -> &str {
    &self.user_id
  }

  fn endpoint(&self, path: &str) -> ApiResult<Url> {
    self
      .base
      .join(path)
      .map_err(|e| ApiError::Malformed(format!("bad endpoint '{}': {}", path, e)))
  }

  /// Send a request and unwrap the `data` member of the envelope.
  async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
    let (_, data) = self.send_raw(request).await?;
    let data = data.ok_or_else(|| ApiError::Malformed("response has no data".to_string()))?;
    serde_json::from_value(data).map_err(|e| ApiError::Malformed(e.to_string()))
  }

  /// Send a request whose body we don't need, keeping the status.
  ///
  /// Only the status counts; the body is not read.
  async fn send_empty(&self, request: RequestBuilder) -> ApiResult<EmptyResponse> {
    let response = self.send_checked(request).await?;
    Ok(EmptyResponse {
      status: response.status().as_u16(),
    })
  }

  async fn send_raw(&self, request: RequestBuilder) -> ApiResult<(u16, Option<Value>)> {
    let response = self.send_checked(request).await?;
    let status = response.status();
    let text = response.text().await?;
    if text.trim().is_empty() {
      return Ok((status.as_u16(), None));
    }
    let envelope: ApiEnvelope<Value> =
      serde_json::from_str(&text).map_err(|e| ApiError::Malformed(e.to_string()))?;
    Ok((status.as_u16(), envelope.data))
  }

  /// Send a request and turn a non-2xx status into `ApiError::Status`.
  async fn send_checked(&self, request: RequestBuilder) -> ApiResult<Response> {
    let response = request.send().await?;
    let status = response.status();
    debug!(status = status.as_u16(), url = %response.url(), "Habitica response");

    if status.is_success() {
      return Ok(response);
    }

    let message = response
      .json::<ApiEnvelope<Value>>()
      .await
      .ok()
      .and_then(|envelope| envelope.message)
      .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
    Err(ApiError::Status {
      status: status.as_u16(),
      message,
    })
  }

  async fn fetch_tasks(&self, url: Url) -> ApiResult<Vec<Task>> {
    let items: Vec<Value> = self.send(self.http.get(url)).await?;
    Ok(decode_tasks(items))
  }
}

/// Decode tasks one by one so a single odd task doesn't sink the whole list.
fn decode_tasks(items: Vec<Value>) -> Vec<Task> {
  items
    .into_iter()
    .filter_map(|item| match serde_json::from_value::<ApiTask>(item) {
      Ok(task) => task.into_task(),
      Err(e) => {
        warn!(error = %e, "Skipping undecodable task");
        None
      }
    })
    .collect()
}

fn into_task(task: ApiTask) -> ApiResult<Task> {
  task
    .into_task()
    .ok_or_else(|| ApiError::Malformed("task without id".to_string()))
}

fn into_tag(tag: ApiTag) -> ApiResult<Tag> {
  tag
    .into_tag()
    .ok_or_else(|| ApiError::Malformed("tag without id".to_string()))
}

#[async_trait]
impl TaskApi for HabiticaClient {
  async fn retrieve_tasks(&self, due_on_day: Option<NaiveDate>) -> ApiResult<Vec<Task>> {
    let mut url = self.endpoint("tasks/user")?;
    if let Some(day) = due_on_day {
      url
        .query_pairs_mut()
        .append_pair("dueDate", &day.format("%Y-%m-%d").to_string());
    }
    self.fetch_tasks(url).await
  }

  async fn retrieve_completed_todos(&self) -> ApiResult<Vec<Task>> {
    let mut url = self.endpoint("tasks/user")?;
    url.query_pairs_mut().append_pair("type", "completedTodos");
    self.fetch_tasks(url).await
  }

  async fn clear_completed_todos(&self) -> ApiResult<Vec<Task>> {
    let url = self.endpoint("tasks/clearCompletedTodos")?;
    let (_, data) = self.send_raw(self.http.post(url)).await?;
    // The server answers with the remaining tasks or with an empty object
    let items = data
      .and_then(|d| serde_json::from_value::<Vec<Value>>(d).ok())
      .unwrap_or_default();
    Ok(decode_tasks(items))
  }

  async fn create_task(&self, task: &Task) -> ApiResult<Task> {
    let url = self.endpoint("tasks/user")?;
    let created: ApiTask = self.send(self.http.post(url).json(&task_body(task))).await?;
    into_task(created)
  }

  async fn create_tasks(&self, tasks: &[Task]) -> ApiResult<Vec<Task>> {
    let url = self.endpoint("tasks/user")?;
    let body: Vec<Value> = tasks.iter().map(task_body).collect();
    let items: Vec<Value> = self.send(self.http.post(url).json(&body)).await?;
    Ok(decode_tasks(items))
  }

  async fn update_task(&self, task: &Task) -> ApiResult<Task> {
    let url = self.endpoint(&format!("tasks/{}", task.id))?;
    let updated: ApiTask = self.send(self.http.put(url).json(&task_body(task))).await?;
    into_task(updated)
  }

  async fn delete_task(&self, task_id: &str) -> ApiResult<EmptyResponse> {
    let url = self.endpoint(&format!("tasks/{}", task_id))?;
    self.send_empty(self.http.delete(url)).await
  }

  async fn score_task(
    &self,
    task_id: &str,
    direction: ScoringDirection,
  ) -> ApiResult<TaskResponse> {
    let url = self.endpoint(&format!("tasks/{}/score/{}", task_id, direction.as_str()))?;
    let response: ApiScoreResponse = self.send(self.http.post(url)).await?;
    Ok(response.into())
  }

  async fn move_task(&self, task_id: &str, position: i64) -> ApiResult<Vec<String>> {
    let url = self.endpoint(&format!("tasks/{}/move/to/{}", task_id, position))?;
    self.send(self.http.post(url)).await
  }

  async fn create_tag(&self, tag: &Tag) -> ApiResult<Tag> {
    let url = self.endpoint("tags")?;
    let created: ApiTag = self.send(self.http.post(url).json(&tag_body(tag))).await?;
    into_tag(created)
  }

  async fn update_tag(&self, tag: &Tag) -> ApiResult<Tag> {
    let url = self.endpoint(&format!("tags/{}", tag.id))?;
    let updated: ApiTag = self.send(self.http.put(url).json(&tag_body(tag))).await?;
    into_tag(updated)
  }

  async fn delete_tag(&self, tag_id: &str) -> ApiResult<EmptyResponse> {
    let url = self.endpoint(&format!("tags/{}", tag_id))?;
    self.send_empty(self.http.delete(url)).await
  }

  async fn retrieve_user_stats(&self) -> ApiResult<UserStats> {
    let mut url = self.endpoint("user")?;
    url.query_pairs_mut().append_pair("userFields", "stats");
    let user: ApiUser = self.send(self.http.get(url)).await?;
    user
      .stats
      .map(|stats| stats.into_stats(&self.user_id))
      .ok_or_else(|| ApiError::Malformed("user without stats".to_string()))
  }
}

#[async_trait]
impl SocialApi for HabiticaClient {
  async fn retrieve_group(&self, group_id: &str) -> ApiResult<Group> {
    let url = self.endpoint(&format!("groups/{}", group_id))?;
    let group: ApiGroup = self.send(self.http.get(url)).await?;
    group
      .into_group()
      .ok_or_else(|| ApiError::Malformed("group without id".to_string()))
  }

  async fn retrieve_chat(&self, group_id: &str) -> ApiResult<Vec<ChatMessage>> {
    let url = self.endpoint(&format!("groups/{}/chat", group_id))?;
    let messages: Vec<ApiChatMessage> = self.send(self.http.get(url)).await?;
    Ok(
      messages
        .into_iter()
        .filter_map(|m| m.into_message(Some(group_id)))
        .collect(),
    )
  }

  async fn post_chat_message(&self, group_id: &str, text: &str) -> ApiResult<ChatMessage> {
    let url = self.endpoint(&format!("groups/{}/chat", group_id))?;
    let response: ApiPostChatResponse = self
      .send(self.http.post(url).json(&json!({ "message": text })))
      .await?;
    response
      .message
      .into_message(Some(group_id))
      .ok_or_else(|| ApiError::Malformed("chat message without id".to_string()))
  }

  async fn join_group(&self, group_id: &str) -> ApiResult<Group> {
    let url = self.endpoint(&format!("groups/{}/join", group_id))?;
    let group: ApiGroup = self.send(self.http.post(url)).await?;
    group
      .into_group()
      .ok_or_else(|| ApiError::Malformed("group without id".to_string()))
  }

  async fn leave_group(&self, group_id: &str) -> ApiResult<EmptyResponse> {
    let url = self.endpoint(&format!("groups/{}/leave", group_id))?;
    self.send_empty(self.http.post(url)).await
  }

  async fn retrieve_member(&self, member_id: &str) -> ApiResult<Member> {
    let url = self.endpoint(&format!("members/{}", member_id))?;
    let member: ApiMember = self.send(self.http.get(url)).await?;
    member
      .into_member()
      .ok_or_else(|| ApiError::Malformed("member without id".to_string()))
  }

  async fn retrieve_inbox_messages(&self) -> ApiResult<Vec<InboxMessage>> {
    let url = self.endpoint("inbox/messages")?;
    let messages: Vec<ApiInboxMessage> = self.send(self.http.get(url)).await?;
    Ok(
      messages
        .into_iter()
        .filter_map(|m| m.into_message(Some(&self.user_id)))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio::net::TcpListener;

  /// Serve exactly one canned HTTP response and return the base URL.
  async fn serve_once(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut request = Vec::new();
      let mut buf = [0u8; 1024];
      // Read the head, then whatever body Content-Length announces
      loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
          break;
        }
        request.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&request).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
          let content_length = text[..head_end]
            .lines()
            .find_map(|line| {
              let (name, value) = line.split_once(':')?;
              if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
              } else {
                None
              }
            })
            .unwrap_or(0);
          if request.len() >= head_end + 4 + content_length {
            break;
          }
        }
      }

      let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line,
        body.len(),
        body
      );
      socket.write_all(response.as_bytes()).await.unwrap();
      socket.shutdown().await.ok();
    });

    format!("http://{}", addr)
  }

  fn client(url: &str) -> HabiticaClient {
    HabiticaClient::with_credentials(url, "user-1", "secret", None).unwrap()
  }

  #[test]
  fn test_endpoints_are_under_api_v3() {
    let client = client("https://habitica.com");
    assert_eq!(
      client.endpoint("tasks/abc/score/up").unwrap().as_str(),
      "https://habitica.com/api/v3/tasks/abc/score/up"
    );
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    assert!(HabiticaClient::with_credentials("not a url", "u", "t", None).is_err());
  }

  #[tokio::test]
  async fn test_tasks_are_decoded_from_envelope() {
    let url = serve_once(
      "200 OK",
      r#"{"success": true, "data": [
        {"_id": "t1", "type": "todo", "text": "A"},
        {"_id": "t2", "type": "chore", "text": "unknown type"},
        {"_id": "t3", "type": "habit", "text": "C"}
      ]}"#,
    )
    .await;

    let tasks = client(&url).retrieve_tasks(None).await.unwrap();
    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "t3"]);
  }

  #[tokio::test]
  async fn test_non_success_status_is_an_error() {
    let url = serve_once(
      "404 Not Found",
      r#"{"success": false, "error": "NotFound", "message": "Task not found."}"#,
    )
    .await;

    let err = client(&url).delete_task("missing").await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(err.to_string().contains("Task not found."));
  }

  #[tokio::test]
  async fn test_delete_reports_status() {
    let url = serve_once("200 OK", r#"{"success": true, "data": {}}"#).await;
    let response = client(&url).delete_tag("tag-1").await.unwrap();
    assert_eq!(response.status, 200);
  }

  #[tokio::test]
  async fn test_delete_ignores_body_of_successful_response() {
    let url = serve_once("200 OK", "OK").await;
    let response = client(&url).delete_task("t1").await.unwrap();
    assert_eq!(response.status, 200);
  }

  #[tokio::test]
  async fn test_transport_failure() {
    // Bind then drop so nothing is listening on the port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}", addr))
      .retrieve_completed_todos()
      .await
      .unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)));
  }

  #[tokio::test]
  async fn test_score_response() {
    let url = serve_once(
      "200 OK",
      r#"{"success": true, "data": {"delta": 0.9, "hp": 50, "mp": 20, "exp": 14, "gp": 3.5, "lvl": 4}}"#,
    )
    .await;

    let response = client(&url)
      .score_task("t1", ScoringDirection::Up)
      .await
      .unwrap();
    assert_eq!(response.experience, Some(14.0));
    assert_eq!(response.gold, Some(3.5));
  }
}

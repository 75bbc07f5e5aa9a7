//! Local reads and writes for tasks, tags and user stats.

use color_eyre::Result;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::habitica::types::{
  new_local_id, ChecklistItem, Reminder, ScoringDirection, SyncState, Tag, Task, TaskResponse,
  TaskType, TasksOrder, UserStats,
};
use crate::store::{LiveQuery, LocalStore, Query, WriteTxn};

#[derive(Clone, Debug)]
pub struct TaskLocalRepository {
  store: LocalStore,
}

impl TaskLocalRepository {
  pub fn new(store: LocalStore) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &LocalStore {
    &self.store
  }

  // ---- Queries ----

  /// Tasks of a user matching `query`, in list order unless the query orders them.
  pub fn get_tasks(&self, user_id: &str, query: Query<Task>) -> Result<LiveQuery<Task>> {
    let user_id = user_id.to_string();
    self
      .store
      .live(query.and(move |t: &Task| t.user_id.as_deref() == Some(user_id.as_str())))
  }

  pub fn get_tasks_of_type(&self, user_id: &str, task_type: TaskType) -> Result<LiveQuery<Task>> {
    self.get_tasks(user_id, Self::list_query(task_type))
  }

  /// Dailies due today and open to-dos.
  pub fn get_due_tasks(&self, user_id: &str) -> Result<LiveQuery<Task>> {
    self.get_tasks(
      user_id,
      Query::filter(Task::is_due_today).sort_by(|a: &Task, b: &Task| {
        a.task_type.cmp(&b.task_type).then(a.order.cmp(&b.order))
      }),
    )
  }

  pub fn get_tasks_by_completion(
    &self,
    user_id: &str,
    task_type: TaskType,
    completed: bool,
  ) -> Result<LiveQuery<Task>> {
    self.get_tasks(
      user_id,
      Self::list_query(task_type).and(move |t: &Task| t.completed == completed),
    )
  }

  /// Tasks carrying reminders. Use [`collect_reminders`] to flatten the results.
  pub fn get_reminders(&self, user_id: &str) -> Result<LiveQuery<Task>> {
    self.get_tasks(
      user_id,
      Query::filter(|t: &Task| !t.reminders.is_empty()).sort_by_key(|t| t.order, true),
    )
  }

  pub fn get_tags(&self, user_id: &str) -> Result<LiveQuery<Tag>> {
    let user_id = user_id.to_string();
    self.store.live(
      Query::filter(move |t: &Tag| t.user_id.as_deref() == Some(user_id.as_str()))
        .sort_by_key(|t| t.order, true),
    )
  }

  pub fn get_user_stats(&self, user_id: &str) -> Result<Option<UserStats>> {
    self.store.get::<UserStats>(user_id)
  }

  fn list_query(task_type: TaskType) -> Query<Task> {
    Query::filter(move |t: &Task| t.task_type == task_type).sort_by_key(|t| t.order, true)
  }

  // ---- Writes ----

  /// Replace the user's task list with `tasks`.
  ///
  /// Known tasks keep their local order. Tasks missing from the list are removed,
  /// except local drafts the server has not seen yet.
  pub fn save_tasks(&self, user_id: &str, tasks: Vec<Task>) -> Result<()> {
    self.replace_tasks(user_id, tasks, None)
  }

  /// Replace the user's task list, ordering each type by the server's `tasksOrder`.
  pub fn save_tasks_with_order(
    &self,
    user_id: &str,
    order: &TasksOrder,
    tasks: Vec<Task>,
  ) -> Result<()> {
    self.replace_tasks(user_id, tasks, Some(order))
  }

  fn replace_tasks(
    &self,
    user_id: &str,
    tasks: Vec<Task>,
    order: Option<&TasksOrder>,
  ) -> Result<()> {
    let count = tasks.len();
    self.store.write(|txn| {
      let owner = user_id.to_string();
      let existing =
        txn.select(&Query::filter(move |t: &Task| t.user_id.as_deref() == Some(owner.as_str())))?;
      let local_order: HashMap<String, i64> =
        existing.iter().map(|t| (t.id.clone(), t.order)).collect();
      let incoming: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

      for stale in existing
        .iter()
        .filter(|t| !t.is_new && !incoming.contains(t.id.as_str()))
      {
        txn.delete::<Task>(&stale.id)?;
      }

      for mut task in tasks.iter().cloned() {
        task.user_id = Some(user_id.to_string());
        let position = order.and_then(|order| {
          order
            .get(task.task_type.order_key())
            .and_then(|ids| ids.iter().position(|id| *id == task.id))
        });
        if let Some(position) = position {
          task.order = position as i64;
        } else if let Some(previous) = local_order.get(&task.id) {
          task.order = *previous;
        }
        txn.upsert(task)?;
      }
      Ok(())
    })?;
    debug!(user_id, count, "Saved task list");
    Ok(())
  }

  pub fn save_task(&self, task: Task) -> Result<()> {
    self.store.write(|txn| txn.upsert(task))
  }

  /// Swap a local entry for the server's version of it in one transaction.
  pub fn replace_task(&self, local_id: &str, task: Task) -> Result<()> {
    self.store.write(|txn| {
      if local_id != task.id {
        txn.delete::<Task>(local_id)?;
      }
      txn.upsert(task)
    })
  }

  pub fn set_task_syncing(&self, task_id: &str, state: SyncState) -> Result<bool> {
    self
      .store
      .write(|txn| txn.update::<Task, _>(task_id, |t| t.sync_state = state))
  }

  pub fn delete_task(&self, task_id: &str) -> Result<Option<Task>> {
    self.store.write(|txn| txn.delete::<Task>(task_id))
  }

  pub fn save_tag(&self, tag: Tag) -> Result<()> {
    self.store.write(|txn| txn.upsert(tag))
  }

  pub fn delete_tag(&self, tag_id: &str) -> Result<Option<Tag>> {
    self.store.write(|txn| txn.delete::<Tag>(tag_id))
  }

  pub fn save_user_stats(&self, stats: UserStats) -> Result<()> {
    self.store.write(|txn| txn.upsert(stats))
  }

  /// Move a task to `position` within its list and renumber the list.
  ///
  /// A negative or out-of-range position moves it to the end.
  pub fn fix_task_order(&self, task_id: &str, position: i64) -> Result<bool> {
    self.store.write(|txn| {
      let Some(task) = txn.get::<Task>(task_id)? else {
        return Ok(false);
      };

      let task_type = task.task_type;
      let owner = task.user_id.clone();
      let mut list = txn.select(
        &Self::list_query(task_type).and(move |t: &Task| t.user_id == owner),
      )?;
      list.retain(|t| t.id != task.id);

      let position = usize::try_from(position)
        .ok()
        .filter(|p| *p <= list.len())
        .unwrap_or(list.len());
      list.insert(position, task);

      for (index, mut entry) in list.into_iter().enumerate() {
        let index = index as i64;
        if entry.order != index {
          entry.order = index;
          txn.upsert(entry)?;
        }
      }
      Ok(true)
    })
  }

  /// Apply a score response to the task and the user's stats together.
  pub fn update_scored_task(
    &self,
    user_id: &str,
    task_id: &str,
    direction: ScoringDirection,
    response: &TaskResponse,
  ) -> Result<bool> {
    self.store.write(|txn| {
      let updated =
        txn.update::<Task, _>(task_id, |task| apply_score(task, direction, response))?;
      update_stats(txn, user_id, response)?;
      Ok(updated)
    })
  }

  // ---- Drafts ----

  /// A blank task for the editor. Not stored until it is saved or synced.
  pub fn get_new_task(&self, user_id: &str, task_type: TaskType) -> Result<Task> {
    let mut task = Task::new_local(task_type);
    task.user_id = Some(user_id.to_string());
    let owner = user_id.to_string();
    let last = self
      .store
      .query(
        &Self::list_query(task_type)
          .and(move |t: &Task| t.user_id.as_deref() == Some(owner.as_str())),
      )?
      .iter()
      .map(|t| t.order)
      .max();
    task.order = last.map_or(0, |o| o + 1);
    Ok(task)
  }

  pub fn get_new_tag(&self, user_id: &str) -> Tag {
    let mut tag = Tag::new_local(None);
    tag.user_id = Some(user_id.to_string());
    tag
  }

  pub fn get_new_checklist_item(&self) -> ChecklistItem {
    ChecklistItem {
      id: new_local_id(),
      text: String::new(),
      completed: false,
    }
  }

  pub fn get_new_reminder(&self) -> Reminder {
    Reminder {
      id: new_local_id(),
      start_date: None,
      time: None,
      task_id: None,
    }
  }

  /// A detached copy of a stored task. Edits do not touch the store.
  pub fn get_editable_task(&self, task_id: &str) -> Result<Option<Task>> {
    self.store.get::<Task>(task_id)
  }

  pub fn get_editable_tag(&self, tag_id: &str) -> Result<Option<Tag>> {
    self.store.get::<Tag>(tag_id)
  }
}

/// Flatten reminders of the given tasks, tagging each with its task.
pub fn collect_reminders(tasks: &[Task]) -> Vec<Reminder> {
  tasks
    .iter()
    .flat_map(|task| {
      task.reminders.iter().cloned().map(|mut r| {
        r.task_id = Some(task.id.clone());
        r
      })
    })
    .collect()
}

fn apply_score(task: &mut Task, direction: ScoringDirection, response: &TaskResponse) {
  let up = direction == ScoringDirection::Up;
  task.value += response.delta.unwrap_or(0.0);

  match task.task_type {
    TaskType::Habit => {
      if up {
        task.counter_up += 1;
      } else {
        task.counter_down += 1;
      }
    }
    TaskType::Daily => {
      if up {
        task.streak += 1;
      } else if task.completed {
        task.streak = (task.streak - 1).max(0);
      }
      task.completed = up;
    }
    TaskType::Todo => task.completed = up,
    TaskType::Reward => {}
  }
}

fn update_stats(txn: &mut WriteTxn<'_>, user_id: &str, response: &TaskResponse) -> Result<()> {
  txn
    .update::<UserStats, _>(user_id, |stats| {
      stats.health = response.health.unwrap_or(stats.health);
      stats.mana = response.mana.unwrap_or(stats.mana);
      stats.experience = response.experience.unwrap_or(stats.experience);
      stats.gold = response.gold.unwrap_or(stats.gold);
      stats.level = response.level.unwrap_or(stats.level);
    })
    .map(|_| ())
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  const USER: &str = "user-1";

  fn repo() -> TaskLocalRepository {
    TaskLocalRepository::new(LocalStore::in_memory())
  }

  fn task(id: &str, task_type: TaskType) -> Task {
    let mut task = Task::new_local(task_type);
    task.id = id.to_string();
    task.text = id.to_string();
    task.is_new = false;
    task
  }

  fn ids(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|t| t.id.as_str()).collect()
  }

  #[test]
  fn test_save_tasks_prunes_missing_and_keeps_order() {
    let repo = repo();
    let mut a = task("a", TaskType::Todo);
    a.order = 5;
    repo
      .save_tasks(USER, vec![a, task("b", TaskType::Todo)])
      .unwrap();

    let mut draft = task("draft", TaskType::Todo);
    draft.is_new = true;
    draft.user_id = Some(USER.to_string());
    repo.save_task(draft).unwrap();

    repo
      .save_tasks(USER, vec![task("a", TaskType::Todo), task("c", TaskType::Todo)])
      .unwrap();

    let stored = repo.store().query(&Query::<Task>::all()).unwrap();
    assert_eq!(ids(&stored), vec!["a", "c", "draft"]);
    assert_eq!(stored[0].order, 5);
    assert_eq!(stored[0].user_id.as_deref(), Some(USER));
  }

  #[test]
  fn test_save_tasks_leaves_other_users_alone() {
    let repo = repo();
    repo.save_tasks("other", vec![task("x", TaskType::Habit)]).unwrap();
    repo.save_tasks(USER, vec![task("y", TaskType::Habit)]).unwrap();

    assert!(repo.store().get::<Task>("x").unwrap().is_some());
  }

  #[test]
  fn test_save_tasks_with_order_uses_server_lists() {
    let repo = repo();
    let order = TasksOrder::from([
      ("habits".to_string(), vec!["h2".to_string(), "h1".to_string()]),
      ("todos".to_string(), vec!["t1".to_string()]),
    ]);
    repo
      .save_tasks_with_order(
        USER,
        &order,
        vec![
          task("h1", TaskType::Habit),
          task("h2", TaskType::Habit),
          task("t1", TaskType::Todo),
        ],
      )
      .unwrap();

    let habits = repo.get_tasks_of_type(USER, TaskType::Habit).unwrap();
    assert_eq!(ids(habits.results()), vec!["h2", "h1"]);
  }

  #[test]
  fn test_due_tasks() {
    let repo = repo();
    let mut due_daily = task("daily-due", TaskType::Daily);
    due_daily.is_due = true;
    let idle_daily = task("daily-idle", TaskType::Daily);
    let open_todo = task("todo-open", TaskType::Todo);
    let mut done_todo = task("todo-done", TaskType::Todo);
    done_todo.completed = true;
    let mut habit = task("habit", TaskType::Habit);
    habit.is_due = true;

    repo
      .save_tasks(USER, vec![due_daily, idle_daily, open_todo, done_todo, habit])
      .unwrap();

    let due = repo.get_due_tasks(USER).unwrap();
    assert_eq!(ids(due.results()), vec!["daily-due", "todo-open"]);
  }

  #[test]
  fn test_completion_query_follows_changes() {
    let repo = repo();
    repo.save_tasks(USER, vec![task("t", TaskType::Todo)]).unwrap();
    let mut completed = repo
      .get_tasks_by_completion(USER, TaskType::Todo, true)
      .unwrap();
    assert!(completed.results().is_empty());

    repo
      .update_scored_task(USER, "t", ScoringDirection::Up, &TaskResponse::default())
      .unwrap();

    assert!(completed.poll().unwrap());
    assert_eq!(ids(completed.results()), vec!["t"]);
  }

  #[test]
  fn test_fix_task_order_moves_and_renumbers() {
    let repo = repo();
    let tasks = ["a", "b", "c", "d"]
      .iter()
      .enumerate()
      .map(|(i, id)| {
        let mut t = task(id, TaskType::Todo);
        t.order = i as i64;
        t
      })
      .collect();
    repo.save_tasks(USER, tasks).unwrap();

    assert!(repo.fix_task_order("d", 1).unwrap());
    let todos = repo.get_tasks_of_type(USER, TaskType::Todo).unwrap();
    assert_eq!(ids(todos.results()), vec!["a", "d", "b", "c"]);
    let orders: Vec<i64> = todos.results().iter().map(|t| t.order).collect();
    assert_eq!(orders, vec![0, 1, 2, 3]);

    assert!(repo.fix_task_order("a", -1).unwrap());
    let todos = repo.get_tasks_of_type(USER, TaskType::Todo).unwrap();
    assert_eq!(ids(todos.results()), vec!["d", "b", "c", "a"]);

    assert!(!repo.fix_task_order("missing", 0).unwrap());
  }

  #[test]
  fn test_scoring_daily_tracks_streak_and_stats() {
    let repo = repo();
    let mut daily = task("d", TaskType::Daily);
    daily.streak = 2;
    repo.save_tasks(USER, vec![daily]).unwrap();
    repo
      .save_user_stats(UserStats {
        user_id: USER.to_string(),
        health: 50.0,
        gold: 10.0,
        level: 3,
        ..Default::default()
      })
      .unwrap();

    let response = TaskResponse {
      delta: Some(1.5),
      health: Some(48.0),
      gold: Some(12.0),
      ..Default::default()
    };
    repo
      .update_scored_task(USER, "d", ScoringDirection::Up, &response)
      .unwrap();

    let daily = repo.store().get::<Task>("d").unwrap().unwrap();
    assert!(daily.completed);
    assert_eq!(daily.streak, 3);
    assert_eq!(daily.value, 1.5);

    let stats = repo.get_user_stats(USER).unwrap().unwrap();
    assert_eq!(stats.health, 48.0);
    assert_eq!(stats.gold, 12.0);
    assert_eq!(stats.level, 3);

    repo
      .update_scored_task(USER, "d", ScoringDirection::Down, &TaskResponse::default())
      .unwrap();
    let daily = repo.store().get::<Task>("d").unwrap().unwrap();
    assert!(!daily.completed);
    assert_eq!(daily.streak, 2);
  }

  #[test]
  fn test_scoring_habit_counts_direction() {
    let repo = repo();
    repo.save_tasks(USER, vec![task("h", TaskType::Habit)]).unwrap();

    repo
      .update_scored_task(USER, "h", ScoringDirection::Down, &TaskResponse::default())
      .unwrap();

    let habit = repo.store().get::<Task>("h").unwrap().unwrap();
    assert_eq!((habit.counter_up, habit.counter_down), (0, 1));
  }

  #[test]
  fn test_new_task_goes_to_end_of_list() {
    let repo = repo();
    let mut last = task("a", TaskType::Reward);
    last.order = 4;
    repo.save_tasks(USER, vec![last]).unwrap();

    let draft = repo.get_new_task(USER, TaskType::Reward).unwrap();
    assert_eq!(draft.order, 5);
    assert!(draft.is_new);
    assert!(repo.store().get::<Task>(&draft.id).unwrap().is_none());
  }

  #[test]
  fn test_new_task_order_ignores_other_users() {
    let repo = repo();
    let mut theirs = task("theirs", TaskType::Todo);
    theirs.order = 9;
    repo.save_tasks("other", vec![theirs]).unwrap();
    let mut mine = task("mine", TaskType::Todo);
    mine.order = 1;
    repo.save_tasks(USER, vec![mine]).unwrap();

    assert_eq!(repo.get_new_task(USER, TaskType::Todo).unwrap().order, 2);
    assert_eq!(repo.get_new_task("nobody", TaskType::Todo).unwrap().order, 0);
  }

  #[test]
  fn test_reminders_are_tagged_with_their_task() {
    let repo = repo();
    let mut daily = task("d", TaskType::Daily);
    daily.reminders.push(repo.get_new_reminder());
    repo
      .save_tasks(USER, vec![daily, task("plain", TaskType::Daily)])
      .unwrap();

    let with_reminders = repo.get_reminders(USER).unwrap();
    let reminders = collect_reminders(with_reminders.results());
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].task_id.as_deref(), Some("d"));
  }

  #[test]
  fn test_replace_task_swaps_ids_in_one_commit() {
    let repo = repo();
    repo.save_task(task("local", TaskType::Todo)).unwrap();
    let mut changes = repo.store().subscribe();

    repo.replace_task("local", task("server", TaskType::Todo)).unwrap();

    assert!(repo.store().get::<Task>("local").unwrap().is_none());
    assert!(repo.store().get::<Task>("server").unwrap().is_some());
    assert!(changes.try_recv().is_ok());
    assert!(changes.try_recv().is_err());
  }
}

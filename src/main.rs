use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use habitica_sync::config::Config;
use habitica_sync::form::find_choice;
use habitica_sync::habitica::types::{ScoringDirection, Task, TaskType};
use habitica_sync::habitica::HabiticaClient;
use habitica_sync::logging;
use habitica_sync::repository::{ScoreNotification, SocialRepository, TaskRepository};
use habitica_sync::store::{LocalStore, Query};

const WATCH_REFRESH: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "habitica")]
#[command(about = "Offline-first Habitica client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/habitica-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch tasks and stats from the server into the local cache
  Sync,
  /// List cached tasks
  Tasks {
    /// Only dailies due today and open to-dos
    #[arg(long)]
    due: bool,
    /// Only tasks of this type (habit, daily, todo, reward)
    #[arg(long = "type")]
    task_type: Option<TaskType>,
  },
  /// Create a task
  Add { task_type: TaskType, text: String },
  /// Score a task up or down
  Score { id: String, direction: String },
  /// Complete a daily or to-do
  Done { id: String },
  /// Delete a task
  Delete { id: String },
  /// List cached tags
  Tags,
  /// Fetch and print a group's chat
  Chat { group: String },
  /// Print due tasks and refresh whenever the cache changes
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&Config::log_dir()?)?;

  let store = match config.cache_path()? {
    Some(path) => LocalStore::open(&path)?,
    None => LocalStore::in_memory(),
  };
  let client = HabiticaClient::new(&config)?;
  let user_id = client.user_id().to_string();
  info!(user_id = %user_id, command = ?args.command, "Starting");

  let (tasks, mut scores) = TaskRepository::new(client.clone(), store.clone(), user_id.clone());

  match args.command {
    Command::Sync => {
      let (synced, stats) =
        futures::future::join(tasks.retrieve_tasks(None), tasks.retrieve_user_stats()).await;
      let synced = synced.ok_or_else(|| eyre!("Sync failed, see the log for details"))?;
      println!("Synced {} tasks", synced.len());
      if let Some(stats) = stats {
        println!(
          "HP {:.0}/{:.0}  MP {:.0}/{:.0}  XP {:.0}/{:.0}  Gold {:.2}  Level {}",
          stats.health,
          stats.max_health,
          stats.mana,
          stats.max_mana,
          stats.experience,
          stats.to_next_level,
          stats.gold,
          stats.level
        );
      }
    }
    Command::Tasks { due, task_type } => {
      let query = match (due, task_type) {
        (true, _) => tasks.get_due_tasks()?,
        (false, Some(task_type)) => tasks.get_tasks_of_type(task_type)?,
        (false, None) => tasks.get_tasks(
          Query::all().sort_by(|a: &Task, b: &Task| {
            a.task_type.cmp(&b.task_type).then(a.order.cmp(&b.order))
          }),
        )?,
      };
      print_tasks(query.results());
    }
    Command::Add { task_type, text } => {
      let mut task = tasks.get_new_task(task_type)?;
      task.text = text;
      let created = tasks
        .create_task(&task)
        .await
        .ok_or_else(|| eyre!("Could not create task, it is kept locally for a later sync"))?;
      let label = find_choice(&TaskType::choices(), &created.task_type)
        .map(|c| c.to_string())
        .unwrap_or_default();
      println!("Created {} {}", label, created.id);
    }
    Command::Score { id, direction } => {
      let direction = parse_direction(&direction)?;
      let task = cached_task(&tasks, &id)?;
      tasks
        .score(&task, direction)
        .await
        .ok_or_else(|| eyre!("Scoring failed"))?;
      let label = find_choice(&ScoringDirection::choices(), &direction)
        .map(|c| c.to_string())
        .unwrap_or_default();
      println!("Scored {} {}", label, task.text);
      print_scores(&mut scores);
    }
    Command::Done { id } => {
      let task = cached_task(&tasks, &id)?;
      if !matches!(task.task_type, TaskType::Daily | TaskType::Todo) {
        return Err(eyre!("Only dailies and to-dos can be completed"));
      }
      tasks
        .score(&task, ScoringDirection::Up)
        .await
        .ok_or_else(|| eyre!("Scoring failed"))?;
      print_scores(&mut scores);
    }
    Command::Delete { id } => {
      let task = cached_task(&tasks, &id)?;
      let response = tasks
        .delete_task(&task)
        .await
        .ok_or_else(|| eyre!("Delete failed"))?;
      if response.status == 200 {
        println!("Deleted {}", task.id);
      } else {
        println!("Server answered {}, task kept", response.status);
      }
    }
    Command::Tags => {
      let tags = tasks.get_tags()?;
      for tag in tags.results() {
        println!("{}  {}", tag.id, tag.name);
      }
    }
    Command::Chat { group } => {
      let social = SocialRepository::new(client, store, user_id);
      if social.retrieve_chat(&group).await.is_none() {
        eprintln!("Could not reach the server, showing cached chat");
      }
      let chat = social.get_chat_messages(&group)?;
      for message in chat.results().iter().rev() {
        println!(
          "{} {}: {}",
          message
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default(),
          message.username.as_deref().unwrap_or("system"),
          message.text.as_deref().unwrap_or_default()
        );
      }
    }
    Command::Watch => {
      let mut due = tasks.get_due_tasks()?;
      print_tasks(due.results());
      let mut refresh = tokio::time::interval(WATCH_REFRESH);
      loop {
        tokio::select! {
          changed = due.changed() => {
            changed?;
            println!("--- updated ---");
            print_tasks(due.results());
          }
          _ = refresh.tick() => {
            if tasks.retrieve_tasks(None).await.is_none() {
              eprintln!("Refresh failed, showing cached tasks");
            }
          }
          _ = tokio::signal::ctrl_c() => break,
        }
      }
    }
  }

  Ok(())
}

fn parse_direction(input: &str) -> Result<ScoringDirection> {
  match input {
    "up" | "+" => Ok(ScoringDirection::Up),
    "down" | "-" => Ok(ScoringDirection::Down),
    other => Err(eyre!("Direction must be 'up' or 'down', got '{}'", other)),
  }
}

fn cached_task(tasks: &TaskRepository<HabiticaClient>, id: &str) -> Result<Task> {
  tasks
    .get_editable_task(id)?
    .ok_or_else(|| eyre!("Task {} is not cached, run 'habitica sync' first", id))
}

fn print_tasks(tasks: &[Task]) {
  if tasks.is_empty() {
    println!("No tasks");
    return;
  }
  for task in tasks {
    let mark = if task.completed { "x" } else { " " };
    let state = if task.is_syncing() { " (syncing)" } else { "" };
    println!(
      "[{}] {:<6} {}  {}{}",
      mark,
      task.task_type.as_str(),
      task.id,
      task.text,
      state
    );
  }
}

fn print_scores(scores: &mut tokio::sync::mpsc::UnboundedReceiver<ScoreNotification>) {
  while let Ok(score) = scores.try_recv() {
    println!(
      "HP {:+.1}  MP {:+.1}  XP {:+.1}  Gold {:+.2}",
      score.health_diff, score.mana_diff, score.experience_diff, score.gold_diff
    );
  }
}

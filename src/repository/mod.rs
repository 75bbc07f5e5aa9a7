//! Repositories: the layer the presentation code talks to.
//!
//! The `*_local` repositories read and write the local store only. The facades
//! pair them with the remote API and absorb remote failures.

#[cfg(test)]
mod fake;
mod social;
mod social_local;
mod task;
mod task_local;

pub use social::SocialRepository;
pub use social_local::SocialLocalRepository;
pub use task::{ScoreNotification, TaskRepository};
pub use task_local::{collect_reminders, TaskLocalRepository};

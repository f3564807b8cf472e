//! Task CLI command handlers

use crate::api::tasks::{Task, TaskQuery, TaskUpdate};
use crate::cli::auth::require_session;
use crate::cli::commands::TaskCommand;
use crate::cli::prompt;
use crate::core::context::AppContext;
use crate::core::history::TaskEvent;
use crate::error::Result;

/// Handle task commands
pub async fn handle_task(ctx: &AppContext, command: TaskCommand) -> Result<()> {
    require_session(ctx).await?;

    match command {
        TaskCommand::List { state, page, limit } => {
            let tasks = ctx
                .tasks
                .list(TaskQuery {
                    page,
                    limit,
                    done: state.done_filter(),
                })
                .await?;

            if tasks.is_empty() {
                println!("No tasks found.");
                return Ok(());
            }
            for task in &tasks {
                print_task_line(task);
            }
            println!();
            println!("{} task(s)", tasks.len());
        }
        TaskCommand::Show { id } => {
            let task = ctx.tasks.get(&id).await?;
            print_task_detail(&task);
        }
        TaskCommand::Add { text } => {
            let task = ctx.tasks.create(&text.join(" ")).await?;
            println!("✓ Added task {}", task.id);
        }
        TaskCommand::Done { id } => {
            set_done(ctx, &id, true).await?;
            println!("✓ Marked {} as done", id);
        }
        TaskCommand::Undo { id } => {
            set_done(ctx, &id, false).await?;
            println!("✓ Marked {} as not done", id);
        }
        TaskCommand::Edit { id, text } => {
            let update = TaskUpdate {
                text: Some(text.join(" ")),
                ..TaskUpdate::default()
            };
            let task = ctx.tasks.update(&id, &update).await?;
            println!("✓ Updated task {}", task.id);
        }
        TaskCommand::Rm { id, yes } => {
            if !yes {
                let answer = prompt(&format!("Delete task {}? [y/N] ", id))?;
                if !answer.eq_ignore_ascii_case("y") {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            ctx.tasks.delete(&id).await?;
            println!("✓ Deleted task {}", id);
        }
        TaskCommand::Stats => {
            let stats = ctx.tasks.stats().await?;
            println!("Total:     {}", stats.total);
            println!("Completed: {}", stats.completed);
            println!("Pending:   {}", stats.pending);
        }
        TaskCommand::History { clear } => {
            let history = ctx.tasks.history();
            if clear {
                history.clear()?;
                println!("✓ History cleared");
                return Ok(());
            }

            let events = history.events();
            if events.is_empty() {
                println!("No recent activity.");
                return Ok(());
            }
            for event in &events {
                print_event_line(event);
            }
        }
    }
    Ok(())
}

async fn set_done(ctx: &AppContext, id: &str, done: bool) -> Result<Task> {
    let update = TaskUpdate {
        done: Some(done),
        ..TaskUpdate::default()
    };
    ctx.tasks.update(id, &update).await
}

fn print_task_line(task: &Task) {
    let mark = if task.done { "✓" } else { " " };
    println!("[{}] {}  {}", mark, task.id, task.text);
}

fn print_task_detail(task: &Task) {
    println!("Id:      {}", task.id);
    println!("Text:    {}", task.text);
    println!("Done:    {}", if task.done { "yes" } else { "no" });
    if let Some(created) = task.created_at {
        println!("Created: {}", created.format("%Y-%m-%d %H:%M"));
    }
    if let Some(updated) = task.updated_at {
        println!("Updated: {}", updated.format("%Y-%m-%d %H:%M"));
    }
}

fn print_event_line(event: &TaskEvent) {
    let when = event.timestamp.with_timezone(&chrono::Local);
    println!(
        "{}  {:<18} {}",
        when.format("%Y-%m-%d %H:%M"),
        event.kind.label(),
        event.task_text.as_deref().unwrap_or(&event.task_id)
    );
}

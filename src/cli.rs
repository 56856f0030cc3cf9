//! Interactive client: stdin/stdout REPL over the sync engine.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::network::{LinkState, NetworkLink};
use crate::offline::OfflineStorage;
use crate::sync::{SyncEngine, SyncOutcome};
use crate::todos::model::Todo;

const HELP: &str = "\
Commands:
  list               show todos
  add <text>         add a todo
  done <id>          toggle completion
  edit <id> <text>   change the text
  rm <id>            delete a todo
  sync               push offline changes now
  status             connectivity, sync status and queue size
  online | offline   flip the network link
  help               this text
  quit               exit";

/// One parsed REPL line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Add(String),
    Toggle(i64),
    Edit(i64, String),
    Remove(i64),
    Sync,
    Status,
    Online,
    Offline,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_ascii_lowercase().as_str() {
            "list" | "ls" => Ok(Self::List),
            "add" => {
                if rest.is_empty() {
                    Err("usage: add <text>".into())
                } else {
                    Ok(Self::Add(rest.to_string()))
                }
            }
            "done" | "toggle" => parse_id(rest).map(Self::Toggle),
            "edit" => {
                let (id, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let id = parse_id(id)?;
                if text.trim().is_empty() {
                    return Err("usage: edit <id> <text>".into());
                }
                Ok(Self::Edit(id, text.trim().to_string()))
            }
            "rm" | "delete" => parse_id(rest).map(Self::Remove),
            "sync" => Ok(Self::Sync),
            "status" => Ok(Self::Status),
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "/quit" => Ok(Self::Quit),
            other => Err(format!("unknown command: {other} (try `help`)")),
        }
    }
}

fn parse_id(raw: &str) -> Result<i64, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("not a todo id: {:?}", raw.trim()))
}

fn render(todo: &Todo) -> String {
    let mark = if todo.completed { "x" } else { " " };
    format!("[{mark}] {:>14}  {}", todo.id, todo.text)
}

/// Read commands from stdin until `quit` or EOF.
pub async fn run(
    engine: Arc<SyncEngine>,
    storage: Arc<OfflineStorage>,
    link: NetworkLink,
) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprint!("> ");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            eprint!("> ");
            continue;
        }

        match Command::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => execute(&engine, &storage, &link, command).await,
            Err(message) => println!("{message}"),
        }
        eprint!("> ");
    }
    Ok(())
}

async fn execute(engine: &SyncEngine, storage: &OfflineStorage, link: &NetworkLink, command: Command) {
    match command {
        Command::List => {
            let todos = engine.todos().await;
            if todos.is_empty() {
                println!("(no todos)");
            }
            for todo in &todos {
                println!("{}", render(todo));
            }
        }
        Command::Add(text) => match engine.add_todo(&text).await {
            Ok(todo) => println!("added {}", render(&todo)),
            Err(e) => println!("error: {e}"),
        },
        Command::Toggle(id) => match engine.toggle_todo(id).await {
            Ok(todo) => println!("{}", render(&todo)),
            Err(e) => println!("error: {e}"),
        },
        Command::Edit(id, text) => match engine.edit_todo(id, &text).await {
            Ok(todo) => println!("{}", render(&todo)),
            Err(e) => println!("error: {e}"),
        },
        Command::Remove(id) => match engine.delete_todo(id).await {
            Ok(todo) => println!("removed {}", render(&todo)),
            Err(e) => println!("error: {e}"),
        },
        Command::Sync => match engine.sync_offline_data().await {
            Ok(SyncOutcome::Synced { operations, todos }) => {
                println!("synced {operations} change(s), {todos} todo(s) on server")
            }
            Ok(SyncOutcome::Nothing) => println!("nothing to sync"),
            Ok(SyncOutcome::Skipped) => println!("offline, sync skipped"),
            Ok(SyncOutcome::AlreadyRunning) => println!("sync already running"),
            Err(e) => println!("sync failed: {e}"),
        },
        Command::Status => {
            let pending = match storage.get_sync_queue().await {
                Ok(queue) => queue.len().to_string(),
                Err(e) => format!("unknown ({e})"),
            };
            println!("connectivity: {:?}", engine.connectivity());
            println!("link:         {:?}", link.state());
            println!("sync:         {:?}", engine.sync_status());
            println!("pending:      {pending}");
            if let Some(error) = engine.last_error() {
                println!("last error:   {error}");
            }
        }
        Command::Online => link.set(LinkState::Up),
        Command::Offline => link.set(LinkState::Down),
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(Command::parse("list"), Ok(Command::List));
        assert_eq!(Command::parse("  SYNC "), Ok(Command::Sync));
        assert_eq!(Command::parse("offline"), Ok(Command::Offline));
        assert_eq!(Command::parse("quit"), Ok(Command::Quit));
    }

    #[test]
    fn parses_arguments() {
        assert_eq!(
            Command::parse("add buy  milk"),
            Ok(Command::Add("buy  milk".into()))
        );
        assert_eq!(Command::parse("done 42"), Ok(Command::Toggle(42)));
        assert_eq!(
            Command::parse("edit 7 oat milk"),
            Ok(Command::Edit(7, "oat milk".into()))
        );
        assert_eq!(Command::parse("rm 1700000000000"), Ok(Command::Remove(1_700_000_000_000)));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(Command::parse("add").is_err());
        assert!(Command::parse("done x").is_err());
        assert!(Command::parse("edit 7").is_err());
        assert!(Command::parse("edit seven text").is_err());
        assert!(Command::parse("frobnicate").is_err());
    }

    #[test]
    fn renders_completion_mark() {
        let todo = Todo::new(3, "water plants").unwrap().with_completed(true);
        let line = render(&todo);
        assert!(line.starts_with("[x]"));
        assert!(line.ends_with("water plants"));
    }
}

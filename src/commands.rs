use crate::ipc::{commands as verbs, events};
use crate::models::{TaskDraft, TaskId, TaskKind, Visibility};
use crate::service::EngineHandle;
use crate::session::AuthState;
use crate::summary::Summary;
use serde_json::{json, Value};
use tracing::debug;

/// One parsed host line
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    Login(String),
    Logout,
    Add(TaskDraft),
    Edit(TaskDraft),
    Delete(TaskId),
    Start(TaskId),
    Stop,
    Hide,
    Show,
    Done,
    Status,
    Summary(Option<u32>),
    Quit,
}

/// Parse one stdin line. Blank lines give `Ok(None)`.
///
/// ```text
/// add GOAL 30 Read a book icon=FaBook
/// edit 3 LIMIT 45 Social media
/// start 3
/// summary 7
/// ```
pub fn parse_command(line: &str) -> Result<Option<HostCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = parts.collect();

    let command = match verb.to_ascii_lowercase().as_str() {
        verbs::LOGIN => match args.as_slice() {
            [user] => HostCommand::Login((*user).to_string()),
            _ => return Err("usage: login <user>".to_string()),
        },
        verbs::LOGOUT => HostCommand::Logout,
        verbs::ADD => HostCommand::Add(parse_draft(None, &args)?),
        verbs::EDIT => {
            let (id, rest) = args
                .split_first()
                .ok_or_else(|| "usage: edit <id> <GOAL|LIMIT> <minutes> <title>".to_string())?;
            HostCommand::Edit(parse_draft(Some(parse_id(id)?), rest)?)
        }
        verbs::DELETE => HostCommand::Delete(single_id(&args, verbs::DELETE)?),
        verbs::START => HostCommand::Start(single_id(&args, verbs::START)?),
        verbs::STOP => HostCommand::Stop,
        verbs::HIDE => HostCommand::Hide,
        verbs::SHOW => HostCommand::Show,
        verbs::DONE => HostCommand::Done,
        verbs::STATUS => HostCommand::Status,
        verbs::SUMMARY => match args.as_slice() {
            [] => HostCommand::Summary(None),
            [offset] => HostCommand::Summary(Some(
                offset
                    .parse()
                    .map_err(|_| format!("invalid week offset '{}'", offset))?,
            )),
            _ => return Err("usage: summary [offset]".to_string()),
        },
        verbs::QUIT | "exit" => HostCommand::Quit,
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(Some(command))
}

fn parse_id(raw: &str) -> Result<TaskId, String> {
    raw.parse()
        .map_err(|_| format!("invalid task id '{}'", raw))
}

fn single_id(args: &[&str], verb: &str) -> Result<TaskId, String> {
    match args {
        [id] => parse_id(id),
        _ => Err(format!("usage: {} <id>", verb)),
    }
}

fn parse_draft(id: Option<TaskId>, args: &[&str]) -> Result<TaskDraft, String> {
    let [kind, minutes, title @ ..] = args else {
        return Err("expected <GOAL|LIMIT> <minutes> <title>".to_string());
    };
    let kind = TaskKind::parse(kind)
        .ok_or_else(|| format!("unknown task kind '{}'", kind))?;
    let duration_minutes = minutes
        .parse()
        .map_err(|_| format!("invalid duration '{}'", minutes))?;

    let mut icon = None;
    let mut words = Vec::new();
    for word in title {
        match word.strip_prefix("icon=") {
            Some(value) if !value.is_empty() => icon = Some(value.to_string()),
            _ => words.push(*word),
        }
    }
    Ok(TaskDraft {
        id,
        title: words.join(" "),
        duration_minutes,
        kind,
        icon,
    })
}

/// Run a parsed command against the engine task.
/// Returns the event name and JSON payload to print.
pub async fn execute(
    command: HostCommand,
    handle: &EngineHandle,
    auth: &AuthState,
) -> Result<(&'static str, Value), String> {
    debug!("[HOST] Executing {:?}", command);
    match command {
        HostCommand::Login(user) => {
            let mut snapshots = handle.subscribe();
            auth.sign_in(user.clone());
            snapshots
                .wait_for(|s| s.as_ref().is_some_and(|s| s.user_id == user))
                .await
                .map_err(|_| "engine stopped".to_string())?;
        }
        HostCommand::Logout => {
            let mut snapshots = handle.subscribe();
            auth.sign_out();
            snapshots
                .wait_for(Option::is_none)
                .await
                .map_err(|_| "engine stopped".to_string())?;
        }
        HostCommand::Add(draft) | HostCommand::Edit(draft) => {
            let task = handle.save_task(draft).await.map_err(|e| e.to_string())?;
            return Ok((events::TASK_SAVED, to_value(&task)?));
        }
        HostCommand::Delete(task_id) => handle
            .delete_task(task_id)
            .await
            .map_err(|e| e.to_string())?,
        HostCommand::Start(task_id) => handle.start(task_id).await.map_err(|e| e.to_string())?,
        HostCommand::Stop => handle.stop().await.map_err(|e| e.to_string())?,
        HostCommand::Hide => handle
            .set_visibility(Visibility::Hidden)
            .await
            .map_err(|e| e.to_string())?,
        HostCommand::Show => handle
            .set_visibility(Visibility::Visible)
            .await
            .map_err(|e| e.to_string())?,
        HostCommand::Done => {
            let report = handle.complete_day().await.map_err(|e| e.to_string())?;
            return Ok((events::DAY_COMPLETED, to_value(&report)?));
        }
        HostCommand::Status => {}
        HostCommand::Summary(offset) => {
            let snapshot = handle
                .snapshot()
                .ok_or_else(|| "not signed in".to_string())?;
            let summary = Summary::build(&snapshot, offset);
            return Ok((events::SUMMARY, to_value(&summary)?));
        }
        HostCommand::Quit => return Ok((events::SNAPSHOT, Value::Null)),
    }
    Ok((events::SNAPSHOT, to_value(&handle.snapshot())?))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("Failed to serialize: {}", e))
}

/// `{"event": ..., "payload": ...}` line for stdout
pub fn envelope(event: &str, payload: Value) -> String {
    json!({ "event": event, "payload": payload }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_multi_word_title_and_icon() {
        let cmd = parse_command("add goal 30 Read a book icon=FaBook").unwrap();
        assert_eq!(
            cmd,
            Some(HostCommand::Add(TaskDraft {
                id: None,
                title: "Read a book".to_string(),
                duration_minutes: 30,
                kind: TaskKind::Goal,
                icon: Some("FaBook".to_string()),
            }))
        );
    }

    #[test]
    fn parses_edit_and_ids() {
        match parse_command("edit 4 LIMIT 45 Social").unwrap() {
            Some(HostCommand::Edit(draft)) => {
                assert_eq!(draft.id, Some(4));
                assert_eq!(draft.kind, TaskKind::Limit);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(parse_command("start 9").unwrap(), Some(HostCommand::Start(9)));
        assert_eq!(parse_command("summary 7").unwrap(), Some(HostCommand::Summary(Some(7))));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert!(parse_command("start abc").is_err());
        assert!(parse_command("add SOMETIMES 30 x").is_err());
        assert!(parse_command("fly").is_err());
    }
}

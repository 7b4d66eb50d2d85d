//! `stepwise session`: Inspect and remove stored sessions.

use std::io::Write;

use stepwise_core::session::{SessionId, SessionStore};

use super::CliResult;

const PREVIEW_CHARS: usize = 80;

pub async fn list(store: &dyn SessionStore, out: &mut impl Write) -> CliResult {
    let ids = store.list().await?;
    if ids.is_empty() {
        writeln!(out, "No sessions.")?;
        return Ok(());
    }
    for id in ids {
        match store.load(&id).await? {
            Some(session) => writeln!(
                out,
                "{id}  v{}  {}  {} steps  updated {}",
                session.version,
                session.state.status(),
                session.state.step_count(),
                session.updated_at.format("%Y-%m-%d %H:%M:%S"),
            )?,
            None => writeln!(out, "{id}  (vanished)")?,
        }
    }
    Ok(())
}

pub async fn show(store: &dyn SessionStore, id: &str, json: bool, out: &mut impl Write) -> CliResult {
    let Some(session) = store.load(&SessionId::from(id)).await? else {
        return Err(format!("Session not found: {id}").into());
    };

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&session)?)?;
        return Ok(());
    }

    let state = &session.state;
    writeln!(out, "Session:  {}", session.id)?;
    writeln!(out, "Version:  {}", session.version)?;
    writeln!(out, "Status:   {}", state.status())?;
    writeln!(out, "Messages: {}", state.messages().len())?;
    writeln!(out, "Tokens:   {}", state.usage().total())?;
    writeln!(out, "Steps:    {}", state.step_count())?;
    for (index, step) in state.steps().enumerate() {
        writeln!(out, "  #{:<3} {:<15} {}", index + 1, step.step_type(), preview(&step.output_text()))?;
        for error in &step.errors {
            writeln!(out, "        error: {error}")?;
        }
        if let Some(reason) = step.outcome.as_ref().and_then(|o| o.stop_reason.as_ref()) {
            writeln!(out, "        stopped: {reason}")?;
        }
    }
    Ok(())
}

pub async fn delete(store: &dyn SessionStore, id: &str, out: &mut impl Write) -> CliResult {
    if store.delete(&SessionId::from(id)).await? {
        tracing::info!(session_id = %id, "Session deleted");
        writeln!(out, "Deleted {id}")?;
    } else {
        writeln!(out, "No session named {id}")?;
    }
    Ok(())
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > PREVIEW_CHARS {
        let cut: String = line.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::{ExecutionState, Message, Session, Step, StepType};
    use stepwise_session::InMemorySessionStore;

    async fn seeded() -> InMemorySessionStore {
        let store = InMemorySessionStore::new();
        let state = ExecutionState::from_messages(vec![Message::user("Hello")]).with_added_step(
            Step::new(
                StepType::Final,
                vec![Message::user("Hello")],
                vec![Message::assistant("Hi there!")],
            ),
        );
        store
            .create(Session::new(state).with_id(SessionId::from("demo")))
            .await
            .unwrap();
        store
    }

    fn text(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn list_shows_version_and_steps() {
        let store = seeded().await;
        let mut out = Vec::new();
        list(&store, &mut out).await.unwrap();
        let text = text(out);
        assert!(text.starts_with("demo  v1"));
        assert!(text.contains("1 steps"));
    }

    #[tokio::test]
    async fn list_of_nothing() {
        let mut out = Vec::new();
        list(&InMemorySessionStore::new(), &mut out).await.unwrap();
        assert_eq!(text(out), "No sessions.\n");
    }

    #[tokio::test]
    async fn show_renders_steps() {
        let store = seeded().await;
        let mut out = Vec::new();
        show(&store, "demo", false, &mut out).await.unwrap();
        let text = text(out);
        assert!(text.contains("Version:  1"));
        assert!(text.contains("final"));
        assert!(text.contains("Hi there!"));
    }

    #[tokio::test]
    async fn show_as_json_round_trips() {
        let store = seeded().await;
        let mut out = Vec::new();
        show(&store, "demo", true, &mut out).await.unwrap();
        let session: Session = serde_json::from_str(&text(out)).unwrap();
        assert_eq!(session.id, SessionId::from("demo"));
    }

    #[tokio::test]
    async fn show_missing_is_an_error() {
        let store = InMemorySessionStore::new();
        let err = show(&store, "ghost", false, &mut Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn delete_reports_what_happened() {
        let store = seeded().await;
        let mut out = Vec::new();
        delete(&store, "demo", &mut out).await.unwrap();
        delete(&store, "demo", &mut out).await.unwrap();
        assert_eq!(text(out), "Deleted demo\nNo session named demo\n");
    }

    #[test]
    fn preview_cuts_long_lines() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).chars().count(), PREVIEW_CHARS + 1);
        assert_eq!(preview("one\ntwo"), "one");
    }
}

async fn run_scheduled_pass(engine: &SyncEngine, reason: TriggerReason) {
    tracing::debug!(?reason, "sync trigger fired");
    match engine.run_pass().await {
        Ok(PassOutcome::Completed(report)) if report.failed.is_empty() => {}
        Ok(PassOutcome::Completed(report)) => {
            tracing::warn!(failed = report.failed.len(), "sync pass finished with failures");
        }
        Ok(PassOutcome::Rejected) => {}
        Err(EngineError::SessionExpired) => {
            tracing::error!("todo session expired, update TODOSYNC_SESSION and restart");
        }
        Err(err) => tracing::warn!(error = %err, "sync pass aborted"),
    }
}

fn pass_failure_hint(config: &DaemonConfig) -> String {
    format!("sync pass against {} failed", config.provider.base_url)
}

fn parse_trash_mode(value: &str) -> anyhow::Result<TrashMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "system" => Ok(TrashMode::System),
        "local" => Ok(TrashMode::LocalFolder),
        other => anyhow::bail!("unknown TODOSYNC_TRASH value: {other}"),
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

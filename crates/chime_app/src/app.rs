use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chime_domain::backend::RecordingBackend;
use chime_domain::{BackendEvent, EventKind, Scheduler, SchedulerConfig};
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub(crate) scheduler: SchedulerConfig,
    pub(crate) input: Option<PathBuf>,
    pub(crate) simulate_delivery: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self {
            scheduler: SchedulerConfig::from_env()?,
            ..Self::default()
        };
        if let Some(path) = std::env::args_os().nth(1) {
            config.input = Some(PathBuf::from(path));
        } else if let Ok(path) = std::env::var("CHIME_INPUT") {
            if !path.trim().is_empty() {
                config.input = Some(PathBuf::from(path));
            }
        }
        if let Ok(flag) = std::env::var("CHIME_SIMULATE") {
            config.simulate_delivery = matches!(flag.trim(), "1" | "true" | "yes");
        }
        Ok(config)
    }
}

/// Reads a JSON notification request, or a list of them, from `path`.
pub fn load_requests(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn read_stdin() -> Result<Value> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read requests from stdin")?;
    serde_json::from_str(&raw).context("stdin is not valid JSON")
}

/// Schedules `requests` against an in-memory backend. With delivery
/// simulation on, every registration is reported back as fired.
pub fn execute(config: &AppConfig, requests: &Value) -> Result<Scheduler> {
    let backend = Arc::new(RecordingBackend::new());
    let mut scheduler = Scheduler::builder()
        .with_config(config.scheduler.clone())
        .with_backend(backend.clone())
        .build();

    for kind in EventKind::ALL {
        scheduler.on(kind.name(), |event| {
            let id = event.entry.as_ref().map(|entry| entry.id());
            info!(event = %event.kind, ?id, "notification event");
        });
    }

    let report = scheduler
        .schedule(requests)
        .context("failed to schedule notifications")?;
    info!(
        scheduled = report.ids.len(),
        diagnostics = report.diagnostics.len(),
        backend_errors = report.backend_errors.len(),
        "batch scheduled"
    );

    if config.simulate_delivery {
        let inbox = scheduler.inbox();
        for registration in backend.registrations() {
            inbox.push(BackendEvent::triggered(
                registration.id,
                registration.generation,
            ));
        }
        let fired = scheduler.pump();
        info!(fired, "simulated delivery");
    }

    Ok(scheduler)
}

pub fn run(config: AppConfig) -> Result<()> {
    let requests = match &config.input {
        Some(path) => load_requests(path)?,
        None => read_stdin()?,
    };
    let scheduler = execute(&config, &requests)?;
    println!(
        "{}",
        scheduler
            .snapshot_json()
            .context("failed to render registry snapshot")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_domain::LifecycleState;
    use tempfile::tempdir;

    #[test]
    fn loads_and_schedules_a_batch_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("batch.json");
        fs::write(
            &path,
            r#"[{ "id": 1, "title": "Water plants", "trigger": { "every": "day" } },
                { "id": 2, "title": "Leave", "trigger": { "center": [52.5, 13.4], "notifyOnExit": true } }]"#,
        )
        .expect("write fixture");

        let requests = load_requests(&path).expect("load requests");
        let scheduler = execute(&AppConfig::default(), &requests).expect("execute");
        assert_eq!(scheduler.get_scheduled_ids(), vec![1, 2]);
    }

    #[test]
    fn simulated_delivery_marks_entries_triggered() {
        let config = AppConfig {
            simulate_delivery: true,
            ..AppConfig::default()
        };
        let scheduler =
            execute(&config, &serde_json::json!({ "id": 3, "title": "Now" })).expect("execute");
        assert_eq!(scheduler.state(3), Some(LifecycleState::Triggered));
    }

    #[test]
    fn invalid_json_is_reported_with_the_path() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write fixture");

        let err = load_requests(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn duplicate_ids_fail_the_run() {
        let requests = serde_json::json!([{ "id": 1 }, { "id": 1 }]);
        assert!(execute(&AppConfig::default(), &requests).is_err());
    }
}

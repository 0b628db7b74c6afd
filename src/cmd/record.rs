use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Args;

use crate::domain::recorder::{RecordedAction, TestRecorder};
use crate::error::{AppError, AppResult};

#[derive(Args, Debug, Clone)]
pub struct RecordArgs {
    /// File with one JSON action per line.
    pub actions: PathBuf,
    /// Write the generated test here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn run(args: RecordArgs) -> AppResult<()> {
    let raw = tokio::fs::read_to_string(&args.actions).await?;
    let script = script_from_lines(&raw, Utc::now())?;

    match args.output.as_deref() {
        Some(path) => write_script(path, &script).await,
        None => {
            println!("{script}");
            Ok(())
        }
    }
}

async fn write_script(path: &Path, script: &str) -> AppResult<()> {
    tokio::fs::write(path, format!("{script}\n")).await?;
    println!("Test written to {}", path.display());
    Ok(())
}

fn script_from_lines(raw: &str, started_at: DateTime<Utc>) -> AppResult<String> {
    let mut recorder = TestRecorder::new();
    recorder.start(started_at);

    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let action: RecordedAction = serde_json::from_str(line).map_err(|err| {
            AppError::Validation(format!("line {}: invalid action: {err}", index + 1))
        })?;
        recorder.record(&action);
    }

    Ok(recorder.stop())
}

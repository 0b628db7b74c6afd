use clap::Args;

use crate::error::{AppError, AppResult};
use crate::infra::page::open_page;

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Page URL or local path; defaults to the configured page.
    pub source: Option<String>,
}

pub async fn run(source: Option<String>, configured: Option<&str>) -> AppResult<()> {
    let source = source
        .as_deref()
        .or(configured)
        .ok_or_else(|| {
            AppError::Configuration(
                "no page given; pass one or set it with `spotter config init`".to_string(),
            )
        })?;

    let ids = open_page(source)?.scan_for_task_ids().await?;
    if ids.is_empty() {
        println!("No task ids found in {source}");
    }
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

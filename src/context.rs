use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{IssueTrackerService, PageService};

#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub issue_tracker: Arc<dyn IssueTrackerService>,
    pub page: Arc<dyn PageService>,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        issue_tracker: Arc<dyn IssueTrackerService>,
        page: Arc<dyn PageService>,
    ) -> Self {
        Self {
            config,
            issue_tracker,
            page,
        }
    }
}

pub mod auth_retry;
pub mod issue_tracker;
pub mod observer;
pub mod page;

pub use auth_retry::{AuthRetry, CredentialRefresher, StaticCredentials};
pub use issue_tracker::IssueTrackerService;
pub use observer::{NoopObserver, PanelObserver};
pub use page::PageService;

pub mod jira;
pub mod page;

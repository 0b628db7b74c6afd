pub mod config;
pub mod record;
pub mod scan;
pub mod ticket;
pub mod watch;

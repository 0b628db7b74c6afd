pub mod actions;
pub mod polling;
pub mod session;
pub mod ticket;

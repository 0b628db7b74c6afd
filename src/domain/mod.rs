pub mod extract;
pub mod recorder;
pub mod ticket;

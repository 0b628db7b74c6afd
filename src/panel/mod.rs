pub mod markup;
pub mod node;
pub mod notifications;
pub mod reconcile;
pub mod render;
pub mod tracker;
pub mod view;

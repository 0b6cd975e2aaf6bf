pub mod batch;
pub mod collector;
pub mod confirm;
pub mod dispatcher;
pub mod node;
pub mod resolver;
pub mod transition;
pub mod types;

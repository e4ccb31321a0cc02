pub mod batch;
pub mod directory;
pub mod events;
pub mod probe;
pub mod switch;
pub mod types;

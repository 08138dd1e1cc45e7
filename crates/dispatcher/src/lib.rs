pub mod listener;
pub mod scheduler;
pub mod state;

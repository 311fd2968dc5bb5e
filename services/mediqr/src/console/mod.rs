pub mod handler;
pub mod protocol;
pub mod scan_task;
pub mod state;

// Re-export the console loop so the binary can drive it directly.
pub use handler::run_console;
pub use state::AppState;

pub mod context;
pub mod history;
pub mod migrate;
pub mod watch;

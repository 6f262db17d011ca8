//! CLI command handlers.

mod auth;
mod cache;
mod headers;
mod query;
mod retrieve;

pub use auth::{run_login_command, run_logout_command};
pub use cache::run_cache_clear_command;
pub use headers::run_headers_command;
pub use query::{run_list_command, run_query_command};
pub use retrieve::run_retrieve_command;

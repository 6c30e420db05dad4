//! API request handlers

pub mod health;
pub mod process;
pub mod stream;

pub use health::{health, stats};
pub use process::process;
pub use stream::stream;

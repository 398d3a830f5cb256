//! Request handlers.

pub mod direct;
pub mod health;
pub mod help;
pub mod jobs;

pub use direct::*;
pub use health::*;
pub use help::*;
pub use jobs::*;

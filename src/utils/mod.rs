pub mod history;
pub mod retry;
pub mod unwind;

pub use history::BoundedHistory;
pub use retry::RetryPolicy;
pub use unwind::{absorb, absorb_async, is_absorbing};

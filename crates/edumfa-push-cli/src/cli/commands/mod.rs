pub mod context;
pub mod dispatch;
pub mod request;
pub mod token;

pub use dispatch::dispatch;

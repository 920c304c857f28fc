pub mod selector;
pub mod service;

pub use selector::{select_provider, Selection};
pub use service::{LlmRouter, RoutedResponse};

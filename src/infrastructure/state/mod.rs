pub mod store;

pub use store::{load_state, save_state, StateError};

pub mod runner;

pub use runner::ChildRunner;

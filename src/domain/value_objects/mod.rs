pub mod format;
pub mod generator;
pub mod interval_spec;
pub mod time_spec;

pub use format::{format_duration, format_time};
pub use generator::{TemplateGenerator, Trigger};
pub use interval_spec::{IntervalSpec, IntervalSpecError};
pub use time_spec::{TimeSpec, TimeSpecError};

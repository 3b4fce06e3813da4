pub mod crontab_parser;

pub use crontab_parser::{CrontabError, LoadedCrontab};

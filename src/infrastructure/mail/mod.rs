pub mod mailer;

pub use mailer::{ConflictOutcome, JobOutcome, MailContext, Mailer};

//! Crontab Loader: parses the INI-style `crontab.ini` grammar into ordered
//! job templates, applying `default`-section fallbacks and `parent.child`
//! inheritance before validating each section.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::domain::entities::{ConflictPolicy, JobTemplate, JobTemplateError, MailPolicy};
use crate::domain::value_objects::{IntervalSpec, IntervalSpecError, TimeSpec, TimeSpecError};

const RECOGNIZED_KEYS: &[&str] = &[
    "command",
    "active",
    "condition",
    "group",
    "conflict",
    "time",
    "interval",
    "post",
    "mail",
    "mailto",
    "sendmail",
    "loglevel",
];

#[derive(Debug, Error)]
pub enum CrontabError {
    #[error("failed to read crontab: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed line {line}: {text:?}")]
    Malformed { line: usize, text: String },
    #[error("section {0:?} declared more than once")]
    DuplicateSection(String),
    #[error("duplicate key {key:?} in section {section:?}")]
    DuplicateOption { section: String, key: String },
    #[error("section {child:?} inherits from undefined parent {parent:?}")]
    MissingParentSection { child: String, parent: String },
    #[error("unknown key {key:?} in section {section:?}")]
    UnknownKey { section: String, key: String },
    #[error("invalid boolean {value:?} for {section}.{key}")]
    InvalidBool {
        section: String,
        key: String,
        value: String,
    },
    #[error("invalid value {value:?} for {section}.{key}")]
    InvalidEnum {
        section: String,
        key: String,
        value: String,
    },
    #[error("invalid time expression in section {0:?}: {1}")]
    InvalidTime(String, #[source] TimeSpecError),
    #[error("invalid interval expression in section {0:?}: {1}")]
    InvalidInterval(String, #[source] IntervalSpecError),
    #[error("invalid template {0:?}: {1}")]
    InvalidTemplate(String, #[source] JobTemplateError),
    #[error("crontab has no job definitions")]
    EmptyCrontab,
    #[error("section {0:?} is missing a command")]
    MissingCommand(String),
    #[error("template {template:?} posts to undefined job {target:?}")]
    UnknownPostTarget { template: String, target: String },
}

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[(?P<name>[^\]]+)\]$").unwrap())
}

fn keyval_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<key>[A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?P<value>.*)$").unwrap())
}

struct RawSection {
    order: Vec<String>,
    values: HashMap<String, String>,
}

impl RawSection {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            values: HashMap::new(),
        }
    }

    fn insert(&mut self, section: &str, key: String, value: String) -> Result<(), CrontabError> {
        if self.values.contains_key(&key) {
            return Err(CrontabError::DuplicateOption {
                section: section.to_string(),
                key,
            });
        }
        self.order.push(key.clone());
        self.values.insert(key, value);
        Ok(())
    }
}

/// Parses raw `key = value` pairs, grouped by section, in file order.
fn parse_ini(contents: &str) -> Result<(Vec<String>, HashMap<String, RawSection>), CrontabError> {
    let mut order = Vec::new();
    let mut sections: HashMap<String, RawSection> = HashMap::new();
    let mut current: Option<String> = None;

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(caps) = section_re().captures(line) {
            let name = caps["name"].trim().to_string();
            if sections.contains_key(&name) {
                return Err(CrontabError::DuplicateSection(name));
            }
            sections.insert(name.clone(), RawSection::new());
            order.push(name.clone());
            current = Some(name);
            continue;
        }

        if let Some(caps) = keyval_re().captures(line) {
            let Some(section_name) = current.as_ref() else {
                return Err(CrontabError::Malformed {
                    line: idx + 1,
                    text: raw_line.to_string(),
                });
            };
            let key = caps["key"].to_lowercase();
            let value = caps["value"].trim().to_string();
            sections
                .get_mut(section_name)
                .unwrap()
                .insert(section_name, key, value)?;
            continue;
        }

        return Err(CrontabError::Malformed {
            line: idx + 1,
            text: raw_line.to_string(),
        });
    }

    Ok((order, sections))
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, CrontabError> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "t" | "y" | "1" => Ok(true),
        "false" | "no" | "f" | "n" | "0" => Ok(false),
        _ => Err(CrontabError::InvalidBool {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_conflict(section: &str, value: &str) -> Result<ConflictPolicy, CrontabError> {
    match value.to_lowercase().as_str() {
        "ignore" => Ok(ConflictPolicy::Ignore),
        "skip" => Ok(ConflictPolicy::Skip),
        "mail" => Ok(ConflictPolicy::Mail),
        "kill" => Ok(ConflictPolicy::Kill),
        _ => Err(CrontabError::InvalidEnum {
            section: section.to_string(),
            key: "conflict".to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_mail(section: &str, value: &str) -> Result<MailPolicy, CrontabError> {
    match value.to_lowercase().as_str() {
        "never" => Ok(MailPolicy::Never),
        "always" => Ok(MailPolicy::Always),
        "error" => Ok(MailPolicy::Error),
        "output" => Ok(MailPolicy::Output),
        _ => Err(CrontabError::InvalidEnum {
            section: section.to_string(),
            key: "mail".to_string(),
            value: value.to_string(),
        }),
    }
}

/// Resolves `name`'s effective key set: `default` section fallbacks, then
/// (for a dotted `parent.child` name) the parent's own keys, then the
/// section's own overrides, in that precedence order.
fn resolve_effective<'a>(
    name: &str,
    sections: &'a HashMap<String, RawSection>,
) -> Result<HashMap<String, String>, CrontabError> {
    let mut effective = HashMap::new();

    if let Some(default) = sections.get("default") {
        effective.extend(default.values.clone());
    }

    if let Some((parent, _)) = name.rsplit_once('.') {
        let parent_section = sections.get(parent).ok_or_else(|| {
            CrontabError::MissingParentSection {
                child: name.to_string(),
                parent: parent.to_string(),
            }
        })?;
        effective.extend(parent_section.values.clone());
    }

    let own = sections.get(name).expect("section must exist");
    effective.extend(own.values.clone());

    let _ = sections;
    Ok(effective)
}

fn build_template(name: &str, values: &HashMap<String, String>) -> Result<JobTemplate, CrontabError> {
    for key in values.keys() {
        if !RECOGNIZED_KEYS.contains(&key.as_str()) {
            return Err(CrontabError::UnknownKey {
                section: name.to_string(),
                key: key.clone(),
            });
        }
    }

    let command = values
        .get("command")
        .cloned()
        .ok_or_else(|| CrontabError::MissingCommand(name.to_string()))?;

    let active = match values.get("active") {
        Some(v) => parse_bool(name, "active", v)?,
        None => true,
    };

    let condition = values.get("condition").cloned();
    let group = values.get("group").cloned();

    let conflict = match values.get("conflict") {
        Some(v) => parse_conflict(name, v)?,
        None => ConflictPolicy::Ignore,
    };

    let time = match values.get("time") {
        Some(v) => Some(TimeSpec::parse(v).map_err(|e| CrontabError::InvalidTime(name.to_string(), e))?),
        None => None,
    };

    let interval = match values.get("interval") {
        Some(v) => {
            Some(IntervalSpec::parse(v).map_err(|e| CrontabError::InvalidInterval(name.to_string(), e))?)
        }
        None => None,
    };

    let post: Vec<String> = values
        .get("post")
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    let mail = match values.get("mail") {
        Some(v) => parse_mail(name, v)?,
        None => MailPolicy::Error,
    };

    let mailto = values.get("mailto").cloned();
    let sendmail = values.get("sendmail").cloned();

    JobTemplate::new(
        name.to_string(),
        command,
        active,
        condition,
        group,
        conflict,
        time,
        interval,
        post,
        mail,
        mailto,
        sendmail,
    )
    .map_err(|e| CrontabError::InvalidTemplate(name.to_string(), e))
}

/// Result of loading a crontab: reboot-triggered templates and the rest, in
/// file order.
pub struct LoadedCrontab {
    pub startup: Vec<JobTemplate>,
    pub crontab: Vec<JobTemplate>,
}

pub fn load(path: &Path) -> Result<LoadedCrontab, CrontabError> {
    let contents = std::fs::read_to_string(path)?;
    parse(&contents)
}

/// Reads just the `[default] loglevel` key, used to pick the default
/// `tracing` filter before the rest of the crontab is validated. Returns
/// `None` on any read or parse failure, or if the key is absent — the
/// caller falls back to its own default filter in that case.
pub fn default_loglevel(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let (_, sections) = parse_ini(&contents).ok()?;
    sections.get("default")?.values.get("loglevel").cloned()
}

pub fn parse(contents: &str) -> Result<LoadedCrontab, CrontabError> {
    let (order, sections) = parse_ini(contents)?;

    let job_sections: BTreeSet<&String> = order.iter().filter(|s| s.as_str() != "default").collect();
    if job_sections.is_empty() {
        return Err(CrontabError::EmptyCrontab);
    }

    let mut startup = Vec::new();
    let mut crontab = Vec::new();

    for name in order.iter().filter(|s| s.as_str() != "default") {
        let effective = resolve_effective(name, &sections)?;
        let template = build_template(name, &effective)?;
        if template.is_reboot {
            startup.push(template);
        } else {
            crontab.push(template);
        }
    }

    // post targets must exist in the same crontab.
    let known: BTreeSet<&str> = crontab.iter().map(|t| t.name.as_str()).collect();
    for template in &crontab {
        for target in &template.post {
            if !known.contains(target.as_str()) {
                return Err(CrontabError::UnknownPostTarget {
                    template: template.name.clone(),
                    target: target.clone(),
                });
            }
        }
    }

    Ok(LoadedCrontab { startup, crontab })
}

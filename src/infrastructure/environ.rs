//! Builds the environment variables a job script runs with: the owning
//! account's identity plus the job-specific variables the scheduler adds.

use std::collections::HashMap;

use nix::unistd::{Uid, User};

const PRIVILEGED_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const UNPRIVILEGED_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Account identity resolved once at startup and reused for every job's
/// environment.
pub struct AccountInfo {
    pub user: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

impl AccountInfo {
    /// Looks up the account running the scheduler via `getpwuid(3)`.
    pub fn current() -> Self {
        let uid = Uid::current();
        match User::from_uid(uid) {
            Ok(Some(user)) => Self {
                user: user.name,
                uid: uid.as_raw(),
                gid: user.gid.as_raw(),
                home: user.dir.to_string_lossy().to_string(),
                shell: user.shell.to_string_lossy().to_string(),
            },
            _ => Self {
                user: "unknown".to_string(),
                uid: uid.as_raw(),
                gid: 0,
                home: "/".to_string(),
                shell: "/bin/sh".to_string(),
            },
        }
    }
}

/// Builds the full environment for one job instance: the account's
/// identity, `PCRONDIR`, the job's own `JOB_NAME`/`JOB_ID`/`JOB_GROUP`, and
/// whatever init-code in `environment.sh` exports on top.
pub fn build_environ(
    account: &AccountInfo,
    pcron_dir: &str,
    job_name: &str,
    job_id: &str,
    job_group: &str,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("USER".to_string(), account.user.clone());
    env.insert("LOGNAME".to_string(), account.user.clone());
    env.insert("UID".to_string(), account.uid.to_string());
    env.insert("GID".to_string(), account.gid.to_string());
    env.insert("HOME".to_string(), account.home.clone());
    env.insert("SHELL".to_string(), account.shell.clone());
    env.insert(
        "PATH".to_string(),
        if account.uid == 0 {
            PRIVILEGED_PATH.to_string()
        } else {
            UNPRIVILEGED_PATH.to_string()
        },
    );
    env.insert(
        "LANG".to_string(),
        std::env::var("LANG").unwrap_or_else(|_| "C.UTF-8".to_string()),
    );
    env.insert("PCRONDIR".to_string(), pcron_dir.to_string());
    env.insert("JOB_NAME".to_string(), job_name.to_string());
    env.insert("JOB_ID".to_string(), job_id.to_string());
    env.insert("JOB_GROUP".to_string(), job_group.to_string());
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unprivileged_account_gets_unprivileged_path() {
        let account = AccountInfo {
            user: "alice".to_string(),
            uid: 1000,
            gid: 1000,
            home: "/home/alice".to_string(),
            shell: "/bin/bash".to_string(),
        };
        let env = build_environ(&account, "/srv/pcron", "backup", "backup-1", "backup");
        assert_eq!(env.get("PATH").unwrap(), UNPRIVILEGED_PATH);
        assert_eq!(env.get("JOB_ID").unwrap(), "backup-1");
    }

    #[test]
    fn root_account_gets_privileged_path() {
        let account = AccountInfo {
            user: "root".to_string(),
            uid: 0,
            gid: 0,
            home: "/root".to_string(),
            shell: "/bin/bash".to_string(),
        };
        let env = build_environ(&account, "/srv/pcron", "backup", "backup-1", "backup");
        assert_eq!(env.get("PATH").unwrap(), PRIVILEGED_PATH);
    }
}

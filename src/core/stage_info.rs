//! Stage identity: who this data plane is, for the control-plane handshake.

use crate::options;

/// Identity of a running stage.
///
/// Several stages can run on one node (or across nodes) against the same
/// control plane; the handshake uses this record to tell them apart. The
/// name and environment come from the environment variables when set, so
/// an operator can tag an LD_PRELOAD-style deployment without touching
/// the host program.
#[derive(Debug, Clone)]
pub struct StageInfo {
    name: String,
    env: String,
    description: String,
    pid: i32,
    ppid: i32,
    hostname: String,
    login_name: String,
}

fn hostname() -> String {
    // Library-safe hostname lookup: prefer the kernel's record, fall back
    // to the environment.
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|name| name.trim().to_string())
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_default()
}

fn login_name() -> String {
    std::env::var("LOGNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_default()
}

impl StageInfo {
    pub fn new(stage_name: Option<&str>) -> StageInfo {
        let name = std::env::var(options::ENV_STAGE_NAME)
            .ok()
            .or_else(|| stage_name.map(String::from))
            .unwrap_or_else(|| options::DEFAULT_STAGE_NAME.to_string());
        let env = std::env::var(options::ENV_STAGE_ENV).unwrap_or_default();

        StageInfo {
            name,
            env,
            description: String::new(),
            pid: std::process::id() as i32,
            ppid: std::os::unix::process::parent_id() as i32,
            hostname: hostname(),
            login_name: login_name(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: &str) {
        self.description = description.to_string();
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn ppid(&self) -> i32 {
        self.ppid
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn login_name(&self) -> &str {
        &self.login_name
    }
}

impl std::fmt::Display for StageInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StageInfo {{{}, {}, {}, {}, {}, {}}}",
            self.name, self.env, self.pid, self.ppid, self.hostname, self.login_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_name_is_used_without_env_override() {
        // The env override is only observed when the variable is set; the
        // test environment leaves it unset.
        if std::env::var(options::ENV_STAGE_NAME).is_ok() {
            return;
        }
        let info = StageInfo::new(Some("test-stage"));
        assert_eq!(info.name(), "test-stage");
        assert!(info.pid() > 0);
    }

    #[test]
    fn default_name_applies_when_nothing_is_given() {
        if std::env::var(options::ENV_STAGE_NAME).is_ok() {
            return;
        }
        let info = StageInfo::new(None);
        assert_eq!(info.name(), options::DEFAULT_STAGE_NAME);
    }

    #[test]
    fn description_is_mutable() {
        let mut info = StageInfo::new(Some("described"));
        assert!(info.description().is_empty());
        info.set_description("key-value store shim");
        assert_eq!(info.description(), "key-value store shim");
    }
}

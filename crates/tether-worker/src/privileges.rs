//! Best-effort switch to an unprivileged account.
//!
//! Failures never stop the worker; they are logged and reported back as a
//! [`PrivilegeOutcome`].

use tracing::{info, warn};

/// What happened when dropping privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivilegeOutcome {
    /// Now running as the requested account.
    Dropped {
        /// New user id.
        uid: u32,
        /// New group id.
        gid: u32,
    },
    /// No such account.
    UserMissing,
    /// The lookup or the switch was refused.
    Denied(String),
    /// Not available on this platform.
    Unsupported,
}

/// Switch the process to `user`. The group id is set before the user id.
#[cfg(unix)]
pub fn drop_privileges(user: &str) -> PrivilegeOutcome {
    use nix::unistd::{setgid, setuid, User};

    let account = match User::from_name(user) {
        Ok(Some(account)) => account,
        Ok(None) => {
            warn!(user = %user, "run-as user not found, keeping current privileges");
            return PrivilegeOutcome::UserMissing;
        }
        Err(err) => {
            warn!(user = %user, error = %err, "user lookup failed, keeping current privileges");
            return PrivilegeOutcome::Denied(err.to_string());
        }
    };

    if let Err(err) = setgid(account.gid) {
        warn!(user = %user, error = %err, "setgid failed, keeping current privileges");
        return PrivilegeOutcome::Denied(err.to_string());
    }
    if let Err(err) = setuid(account.uid) {
        warn!(user = %user, error = %err, "setuid failed after setgid");
        return PrivilegeOutcome::Denied(err.to_string());
    }

    let (uid, gid) = (account.uid.as_raw(), account.gid.as_raw());
    info!(user = %user, uid, gid, "privileges dropped");
    PrivilegeOutcome::Dropped { uid, gid }
}

/// Switch the process to `user`. Not supported on this platform.
#[cfg(not(unix))]
pub fn drop_privileges(user: &str) -> PrivilegeOutcome {
    warn!(user = %user, "privilege drop not supported on this platform");
    PrivilegeOutcome::Unsupported
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_missing_user_is_ignored() {
        assert_eq!(
            drop_privileges("tether-no-such-user-42"),
            PrivilegeOutcome::UserMissing
        );
    }
}

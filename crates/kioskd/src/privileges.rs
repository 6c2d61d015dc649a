//! Root privilege check for power operations

use kiosk_common::{ControlError, ControlResult};
use nix::unistd::geteuid;

pub fn effective_uid() -> u32 {
    geteuid().as_raw()
}

/// Fail with `RootRequired` unless running as root
pub fn ensure_root() -> ControlResult<()> {
    require_root_uid(effective_uid())
}

pub fn require_root_uid(uid: u32) -> ControlResult<()> {
    if uid == 0 {
        Ok(())
    } else {
        Err(ControlError::RootRequired { uid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_uid_passes() {
        assert!(require_root_uid(0).is_ok());
    }

    #[test]
    fn test_non_root_uid_fails() {
        let err = require_root_uid(1000).unwrap_err();
        assert_eq!(err, ControlError::RootRequired { uid: 1000 });
    }

    #[test]
    fn test_ensure_root_matches_euid() {
        assert_eq!(ensure_root().is_ok(), effective_uid() == 0);
    }
}

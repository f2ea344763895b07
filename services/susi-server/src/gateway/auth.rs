//! Auth floor enforcement: a connection may never claim more privilege
//! (a smaller `authLevel`) than its session was granted at accept time.

use susi_protocol::AuthLevel;

/// Clamp `requested` up to `session_floor` when the caller tries to claim
/// more privilege than its session allows. Recall: smaller number = more
/// privileged, so "clamping up" means taking the larger (less privileged)
/// of the two.
pub fn enforce_floor(requested: AuthLevel, session_floor: AuthLevel) -> AuthLevel {
    requested.max(session_floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_under_floor_is_demoted() {
        // session at authlevel 2, request tries to publish as superuser (0)
        assert_eq!(enforce_floor(0, 2), 2);
    }

    #[test]
    fn request_at_or_above_floor_is_unchanged() {
        assert_eq!(enforce_floor(2, 2), 2);
        assert_eq!(enforce_floor(5, 2), 5);
    }

    #[test]
    fn superuser_session_never_demotes() {
        assert_eq!(enforce_floor(0, 0), 0);
        assert_eq!(enforce_floor(3, 0), 3);
    }
}

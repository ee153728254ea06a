use std::cell::RefCell;
use std::ffi::CString;

use crate::types::NxStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Records `msg` for `nx_last_error`, replacing any earlier message.
/// Interior NULs are replaced so the message is never lost.
pub fn set_last_error(msg: impl Into<String>) {
    let msg = msg.into().replace('\0', "\u{FFFD}");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = CString::new(msg).ok());
}

/// Removes and returns the pending message, if any.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

/// Records `err` and hands back `status`, for `return fail(..)` exits.
pub fn fail(err: impl std::fmt::Display, status: NxStatus) -> NxStatus {
    set_last_error(err.to_string());
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_clears_message() {
        assert_eq!(fail("boom", NxStatus::ErrorRun), NxStatus::ErrorRun);
        assert_eq!(take_last_error().unwrap().to_str().unwrap(), "boom");
        assert!(take_last_error().is_none());
    }

    #[test]
    fn test_interior_nul_kept() {
        set_last_error("a\0b");
        assert_eq!(take_last_error().unwrap().to_str().unwrap(), "a\u{FFFD}b");
    }
}

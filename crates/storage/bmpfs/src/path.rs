//! Path validation for the flat namespace.

use crate::error::{BmpFsError, BmpFsResult};

/// Maximum filename length (not counting the NUL terminator).
pub const MAX_FILENAME: usize = 255;

/// Validate a name component as `fuser` hands it to us (never containing a literal '/' once
/// routed through a POSIX client, but checked here anyway since the byte positions in the
/// metadata record assume it).
pub fn validate_name(name: &str) -> BmpFsResult<()> {
    if name.len() > MAX_FILENAME {
        return Err(BmpFsError::NameTooLong);
    }
    if name.as_bytes().contains(&b'/') || name.is_empty() {
        return Err(BmpFsError::InvalidArgument);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_of_255_succeeds() {
        let name = "a".repeat(255);
        assert!(validate_name(&name).is_ok());
    }

    #[test]
    fn name_of_256_is_too_long() {
        let name = "a".repeat(256);
        assert_eq!(validate_name(&name).unwrap_err(), BmpFsError::NameTooLong);
    }

    #[test]
    fn embedded_slash_is_invalid() {
        assert_eq!(
            validate_name("a/b").unwrap_err(),
            BmpFsError::InvalidArgument
        );
    }
}

use crate::errors::UpsertError;
use subtle::ConstantTimeEq;

/// Succeeds iff both passwords are present, non-empty and equal.
/// The comparison does not short-circuit on the first differing byte.
pub fn authenticate(supplied: Option<&str>, expected: Option<&str>) -> Result<(), UpsertError> {
    match (supplied, expected) {
        (Some(supplied), Some(expected))
            if !supplied.is_empty()
                && !expected.is_empty()
                && bool::from(supplied.as_bytes().ct_eq(expected.as_bytes())) =>
        {
            Ok(())
        }
        _ => Err(UpsertError::Unauthorized),
    }
}

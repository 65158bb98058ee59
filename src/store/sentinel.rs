//! Placeholder codec for persisted sets.
//!
//! The persisted set columns must never be empty, so every stored set
//! carries [`SET_PLACEHOLDER`]. It is added on write and dropped on read.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use super::errors::{StoreError, StoreResult};
use crate::constants::storage::SET_PLACEHOLDER;

/// Encode a domain set as a non-empty array of strings
pub fn encode<T: Display>(members: &BTreeSet<T>) -> Vec<String> {
    std::iter::once(SET_PLACEHOLDER.to_string())
        .chain(members.iter().map(ToString::to_string))
        .collect()
}

/// Decode a stored array, dropping the placeholder
pub fn decode<T>(key: &str, stored: &[String]) -> StoreResult<BTreeSet<T>>
where
    T: FromStr + Ord,
    T::Err: Display,
{
    stored
        .iter()
        .filter(|member| member.as_str() != SET_PLACEHOLDER)
        .map(|member| {
            member
                .parse::<T>()
                .map_err(|e| StoreError::invalid_state(key, format!("bad set member '{member}': {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordId, Username};

    #[test]
    fn test_empty_set_is_stored_as_placeholder_only() {
        let encoded = encode::<RecordId>(&BTreeSet::new());
        assert_eq!(encoded, vec![String::new()]);
        assert!(decode::<RecordId>("job-x", &encoded).unwrap().is_empty());
    }

    #[test]
    fn test_placeholder_never_surfaces() {
        let stored = vec![String::new(), "alice".to_string(), "bob".to_string()];
        let decoded: BTreeSet<String> = decode("record-1", &stored).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(!decoded.contains(""));

        let users: BTreeSet<Username> = decoded.into_iter().map(Username::new).collect();
        assert_eq!(encode(&users).len(), 3);
    }

    #[test]
    fn test_garbage_member_is_invalid_state() {
        let stored = vec![String::new(), "nope".to_string()];
        let err = decode::<RecordId>("job-x", &stored).unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }
}

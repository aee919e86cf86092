use ulid::Ulid;

/// Identifier prefixes, one per kind of object the chat service mints.
pub mod prefix {
    pub const HUB: &str = "hub";
    pub const CLIENT: &str = "cli";
    pub const CHANNEL: &str = "ch";
    pub const MESSAGE: &str = "msg";
}

/// A fresh `<prefix>_<ulid>` identifier. ULIDs sort by creation time.
///
/// ```
/// let id = chat_common::id::prefixed_ulid(chat_common::id::prefix::MESSAGE);
/// assert!(chat_common::id::has_prefix(&id, "msg"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{prefix}_{}", Ulid::new())
}

/// True if `id` is `<prefix>_` followed by a well-formed ULID.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|ulid| Ulid::from_string(ulid).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_their_prefix() {
        let id = prefixed_ulid(prefix::CLIENT);
        assert!(has_prefix(&id, prefix::CLIENT));
        assert!(!has_prefix(&id, prefix::CHANNEL));
        assert_eq!(id.len(), "cli_".len() + 26);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(prefixed_ulid(prefix::MESSAGE), prefixed_ulid(prefix::MESSAGE));
    }

    #[test]
    fn hand_written_ids_are_not_prefixed_ulids() {
        assert!(!has_prefix("general", prefix::CHANNEL));
        assert!(!has_prefix("ch_general", prefix::CHANNEL));
        assert!(!has_prefix("ch", prefix::CHANNEL));
    }
}

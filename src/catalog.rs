//! Command catalog: which commands require a session token.
//!
//! Built once from an embedded JSON resource, mirroring the teacher's
//! load-once reference-data pattern for process-wide static data.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Raw JSON catalog embedded at compile time: `{ "command": requires_session }`.
const CATALOG_JSON: &str = include_str!("../data/commands.json");

static CATALOG: Lazy<HashMap<String, bool>> = Lazy::new(|| {
    serde_json::from_str(CATALOG_JSON).expect("data/commands.json must be a valid command map")
});

/// Commands that are the session protocol itself and are never wrapped in
/// session acquisition/release, regardless of what the catalog says.
pub fn is_session_protocol_command(name: &str) -> bool {
    matches!(name, "logon" | "logoff")
}

/// Whether `name` requires a session token as its first parameter.
///
/// An unknown command is treated as "no session required" (spec: "the
/// executor treats 'unknown' as 'no session required' but logs at debug").
pub fn requires_session(name: &str) -> bool {
    match CATALOG.get(name) {
        Some(requires) => *requires,
        None => {
            tracing::debug!(command = name, "unknown command in catalog — assuming no session required");
            false
        }
    }
}

/// Total number of commands in the embedded catalog.
pub fn len() -> usize {
    CATALOG.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logon_and_logoff_are_session_protocol_commands() {
        assert!(is_session_protocol_command("logon"));
        assert!(is_session_protocol_command("logoff"));
        assert!(!is_session_protocol_command("version"));
    }

    #[test]
    fn known_read_commands_do_not_require_session() {
        assert!(!requires_session("version"));
        assert!(!requires_session("devs"));
        assert!(!requires_session("pools"));
    }

    #[test]
    fn known_write_commands_require_session() {
        assert!(requires_session("profileset"));
        assert!(requires_session("atmset"));
        assert!(requires_session("reboot"));
    }

    #[test]
    fn unknown_command_does_not_require_session() {
        assert!(!requires_session("totally-made-up-command"));
    }

    #[test]
    fn catalog_has_around_seventy_entries() {
        assert!(len() >= 60 && len() <= 90, "catalog size {} out of expected range", len());
    }
}

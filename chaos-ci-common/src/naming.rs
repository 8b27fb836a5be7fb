//! Generated identifiers for experiments, environments and engines.

use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

/// Longest name Kubernetes accepts for most objects.
pub const MAX_NAME_LEN: usize = 63;

fn dns_label() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok())
        .as_ref()
}

/// First eight characters of a fresh UUID.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// `<prefix>-<short id>`, trimmed so the result stays a valid DNS label.
pub fn unique_name(prefix: &str) -> String {
    let id = short_id();
    let room = MAX_NAME_LEN - id.len() - 1;
    let prefix = prefix.trim_end_matches('-');
    let prefix: String = prefix.chars().take(room).collect();
    format!("{}-{id}", prefix.trim_end_matches('-'))
}

/// True when `name` can be used as a Kubernetes object name.
pub fn is_dns_label(name: &str) -> bool {
    name.len() <= MAX_NAME_LEN && dns_label().is_some_and(|re| re.is_match(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_shape() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(short_id(), short_id());
    }

    #[test]
    fn test_unique_name_is_dns_label() {
        let name = unique_name("pod-delete");
        assert!(name.starts_with("pod-delete-"));
        assert!(is_dns_label(&name));

        let long = unique_name(&"a".repeat(100));
        assert_eq!(long.len(), MAX_NAME_LEN);
        assert!(is_dns_label(&long));
    }

    #[test]
    fn test_dns_label_rules() {
        assert!(is_dns_label("engine-1"));
        assert!(!is_dns_label("Engine"));
        assert!(!is_dns_label("-engine"));
        assert!(!is_dns_label("engine_1"));
        assert!(!is_dns_label(""));
    }
}

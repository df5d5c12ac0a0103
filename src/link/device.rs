//! Read-only device view model, projected from a stored link.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of leading and trailing key characters kept by [`Device::display_name`].
const SHORT_KEY_CHARS: usize = 8;

/// One linked device as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// The slave device's public key.
    pub id: String,
    /// User-assigned name, if any.
    pub name: Option<String>,
    /// When the master authorized the link.
    pub linked_at: DateTime<Utc>,
}

impl Device {
    /// The user-assigned name, or a shortened key when none is set.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => shorten_key(&self.id),
        }
    }
}

fn shorten_key(key: &str) -> String {
    if key.len() <= SHORT_KEY_CHARS * 2 || !key.is_ascii() {
        return key.to_string();
    }
    format!(
        "{}…{}",
        &key[..SHORT_KEY_CHARS],
        &key[key.len() - SHORT_KEY_CHARS..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, name: Option<&str>) -> Device {
        Device {
            id: id.into(),
            name: name.map(Into::into),
            linked_at: Utc::now(),
        }
    }

    #[test]
    fn display_name_prefers_user_name() {
        assert_eq!(device(&"ab".repeat(32), Some("Laptop")).display_name(), "Laptop");
    }

    #[test]
    fn display_name_shortens_long_keys() {
        let key = format!("{}{}", "a".repeat(32), "b".repeat(32));
        assert_eq!(device(&key, None).display_name(), "aaaaaaaa…bbbbbbbb");
    }

    #[test]
    fn display_name_keeps_short_ids() {
        assert_eq!(device("abc", None).display_name(), "abc");
    }
}

//! Tag aliases: human-readable names for tag ids.
//!
//! Aliases are written as `ID=Name`, where `ID` is a short tag id such as
//! `a06bd66b` or a full MAC address. The order in which aliases are listed
//! is also the order in which tags are shown on the display.

use crate::mac_address::normalize_tag_id;
use std::collections::BTreeMap;

/// A type alias for tag-id-to-name mappings.
pub type AliasMap = BTreeMap<String, String>;

/// A parsed alias mapping a short tag id to a human-readable name.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    /// Short tag id (e.g. "a06bd66b")
    pub id: String,
    /// The human-readable name (e.g. "Sauna")
    pub name: String,
}

/// Parse an alias from a string in the format "ID=NAME".
///
/// # Example
/// ```
/// use ruuvi_trmnl::alias::parse_alias;
///
/// let alias = parse_alias("A0:6B:D6:6B:01:02=Kitchen").unwrap();
/// assert_eq!(alias.id, "a06bd66b");
/// assert_eq!(alias.name, "Kitchen");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    let (id, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid alias: expected format ID=NAME".to_string())?;
    let id = normalize_tag_id(id).ok_or_else(|| format!("invalid alias: '{id}' is not a tag id"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid alias: empty name for {id}"));
    }
    Ok(Alias {
        id,
        name: name.to_string(),
    })
}

/// Convert a slice of Alias values into an AliasMap.
///
/// Later entries win when the same id appears twice.
pub fn to_map(aliases: &[Alias]) -> AliasMap {
    aliases
        .iter()
        .map(|a| (a.id.clone(), a.name.clone()))
        .collect()
}

/// Display name for a tag id, falling back to `Tag <id>`.
pub fn resolve_name(id: &str, aliases: &AliasMap) -> String {
    aliases
        .get(id)
        .cloned()
        .unwrap_or_else(|| format!("Tag {id}"))
}

/// Apply `overrides` on top of `aliases`.
///
/// Overrides for ids already listed rename them in place; new ids are
/// appended, so the display order of existing tags never changes.
pub fn merge(aliases: &mut Vec<Alias>, overrides: &[Alias]) {
    for alias in overrides {
        match aliases.iter_mut().find(|a| a.id == alias.id) {
            Some(existing) => existing.name = alias.name.clone(),
            None => aliases.push(alias.clone()),
        }
    }
}

/// Tag ids in display order, without duplicates.
pub fn ordered_ids(aliases: &[Alias]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::with_capacity(aliases.len());
    for alias in aliases {
        if !ids.contains(&alias.id) {
            ids.push(alias.id.clone());
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias(id: &str, name: &str) -> Alias {
        Alias {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_parse_alias_short_id() {
        let alias = parse_alias("a06bd66b=Living Room").unwrap();
        assert_eq!(alias.id, "a06bd66b");
        assert_eq!(alias.name, "Living Room");
    }

    #[test]
    fn test_parse_alias_full_mac() {
        let alias = parse_alias("87:0D:86:21:AA:BB=Outdoor").unwrap();
        assert_eq!(alias.id, "870d8621");
    }

    #[test]
    fn test_parse_alias_invalid() {
        assert!(parse_alias("no-equals-sign").is_err());
        assert!(parse_alias("xyz=Kitchen").is_err());
        assert!(parse_alias("a06bd66b=  ").is_err());
    }

    #[test]
    fn test_resolve_name_falls_back_to_tag_id() {
        let map = to_map(&[alias("a06bd66b", "Kitchen")]);
        assert_eq!(resolve_name("a06bd66b", &map), "Kitchen");
        assert_eq!(resolve_name("c8cfe694", &map), "Tag c8cfe694");
    }

    #[test]
    fn test_merge_renames_in_place_and_appends() {
        let mut aliases = vec![alias("s1", "One"), alias("s2", "Two")];
        merge(&mut aliases, &[alias("s1", "Uno"), alias("s3", "Three")]);
        assert_eq!(
            aliases,
            vec![alias("s1", "Uno"), alias("s2", "Two"), alias("s3", "Three")]
        );
    }

    #[test]
    fn test_ordered_ids_keeps_first_occurrence() {
        let aliases = vec![alias("s2", "Two"), alias("s1", "One"), alias("s2", "Again")];
        assert_eq!(ordered_ids(&aliases), vec!["s2", "s1"]);
    }
}

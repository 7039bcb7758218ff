//! Name Convention: canonical ipset names for HEPs/GNSs (§4.5, §6).
//!
//! Grounded on `pkg/ipset/name_convention.go`. Names are built once by the
//! IPSet Manager and looked up read-only by the Rule Renderer within the
//! same apply cycle (§5 "Shared resources").

use std::collections::HashMap;

use crate::generictables::CHAIN_NAME_PREFIX;
use crate::model::IpFamily;

pub const MAX_SET_NAME_LENGTH: usize = 31;

/// Which list a set's members were drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    Hep,
    Gns,
}

impl SourceTag {
    fn as_str(self) -> &'static str {
        match self {
            SourceTag::Hep => "hep",
            SourceTag::Gns => "gns",
        }
    }
}

/// `uuid -> canonical set name` registry, one per (ipset) syncer/family.
#[derive(Debug, Default, Clone)]
pub struct NameConvention {
    main_name_of_set: HashMap<String, String>,
}

impl NameConvention {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the canonical name for `uuid` and return it.
    ///
    /// Template: `BAMBOO-<tag>v<family>-<index>-<name>`, truncated to
    /// [`MAX_SET_NAME_LENGTH`] bytes. `index` is a counter kept
    /// independently per source tag by the caller (§4.5).
    pub fn set_main_name_of_set(
        &mut self,
        uuid: &str,
        index: usize,
        family: IpFamily,
        tag: SourceTag,
        name: &str,
    ) -> String {
        let raw = format!(
            "{}{}v{}-{}-{}",
            CHAIN_NAME_PREFIX,
            tag.as_str(),
            family.as_u8(),
            index,
            name
        );
        let truncated = truncate_bytes(&raw, MAX_SET_NAME_LENGTH);
        self.main_name_of_set.insert(uuid.to_string(), truncated.clone());
        truncated
    }

    pub fn get_main_name_of_set_by_uuid(&self, uuid: &str) -> Option<&str> {
        self.main_name_of_set.get(uuid).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.main_name_of_set.clear();
    }
}

fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_expected_template() {
        let mut nc = NameConvention::new();
        let name = nc.set_main_name_of_set("uuid-1", 0, IpFamily::V4, SourceTag::Gns, "web");
        assert_eq!(name, "BAMBOO-gnsv4-0-web");
        assert_eq!(nc.get_main_name_of_set_by_uuid("uuid-1"), Some("BAMBOO-gnsv4-0-web"));
    }

    #[test]
    fn truncates_long_names_to_31_bytes() {
        let mut nc = NameConvention::new();
        let name = nc.set_main_name_of_set(
            "uuid-2",
            12,
            IpFamily::V6,
            SourceTag::Hep,
            "a-very-long-endpoint-name-indeed",
        );
        assert!(name.len() <= MAX_SET_NAME_LENGTH);
    }

    #[test]
    fn hep_and_gns_indices_are_independent() {
        let mut nc = NameConvention::new();
        let hep_name = nc.set_main_name_of_set("h1", 0, IpFamily::V4, SourceTag::Hep, "web1");
        let gns_name = nc.set_main_name_of_set("g1", 0, IpFamily::V4, SourceTag::Gns, "web1");
        assert_ne!(hep_name, gns_name);
        assert_eq!(hep_name, "BAMBOO-hepv4-0-web1");
        assert_eq!(gns_name, "BAMBOO-gnsv4-0-web1");
    }
}

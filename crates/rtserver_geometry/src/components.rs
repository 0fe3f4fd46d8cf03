//! # Component Table
//!
//! Maps regions to small integer component ids, built once after a load.
//!
//! Ids are assigned from 1 in the order component names are first seen;
//! id 0 is the unclassified bucket. Solid regions are looked up by ident,
//! air regions by aircode.

use crate::tracer::ComponentClassifier;
use rtserver_core::Region;
use std::collections::HashMap;

/// Name reported for component id 0.
pub const UNCLASSIFIED: &str = "unclassified";

/// Region to component id lookup.
#[derive(Clone, Debug)]
pub struct ComponentTable {
    names: Vec<String>,
    by_ident: HashMap<u32, u32>,
    by_aircode: HashMap<u32, u32>,
}

impl Default for ComponentTable {
    fn default() -> Self {
        Self {
            names: vec![UNCLASSIFIED.to_string()],
            by_ident: HashMap::new(),
            by_aircode: HashMap::new(),
        }
    }
}

impl ComponentTable {
    /// Builds the table from every region that carries a component attribute.
    ///
    /// With `use_air` false, air regions are left unclassified.
    #[must_use]
    pub fn build<'a>(regions: impl IntoIterator<Item = &'a Region>, use_air: bool) -> Self {
        let mut table = Self::default();
        let mut ids: HashMap<String, u32> = HashMap::new();

        for region in regions {
            let Some(component) = region.component.as_deref() else {
                continue;
            };
            if region.is_air() && !use_air {
                continue;
            }

            let next_id = u32::try_from(table.names.len()).unwrap_or(u32::MAX);
            let id = *ids.entry(component.to_string()).or_insert_with(|| {
                table.names.push(component.to_string());
                next_id
            });

            // First region wins when two claim the same code.
            if region.is_air() {
                table.by_aircode.entry(region.aircode).or_insert(id);
            } else {
                table.by_ident.entry(region.ident).or_insert(id);
            }
        }

        tracing::debug!(components = table.names.len() - 1, "component table built");
        table
    }

    /// Number of ids including the unclassified bucket.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no component was found.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.len() <= 1
    }

    /// Name of a component id.
    #[must_use]
    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }
}

impl ComponentClassifier for ComponentTable {
    fn classify(&self, region: &Region) -> u32 {
        let found = if region.is_air() {
            self.by_aircode.get(&region.aircode)
        } else {
            self.by_ident.get(&region.ident)
        };
        found.copied().unwrap_or(0)
    }

    fn names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(ident: u32, aircode: u32, component: Option<&str>) -> Region {
        Region {
            name: format!("r{ident}"),
            ident,
            aircode,
            component: component.map(ToString::to_string),
        }
    }

    #[test]
    fn test_ids_assigned_in_first_seen_order() {
        let regions = [
            region(10, 0, Some("engine")),
            region(11, 0, Some("armor")),
            region(12, 0, Some("engine")),
            region(13, 0, None),
        ];
        let table = ComponentTable::build(&regions, false);

        assert_eq!(table.names(), ["unclassified", "engine", "armor"]);
        assert_eq!(table.classify(&regions[0]), 1);
        assert_eq!(table.classify(&regions[1]), 2);
        assert_eq!(table.classify(&regions[2]), 1);
        assert_eq!(table.classify(&regions[3]), 0);
        assert_eq!(table.name(2), Some("armor"));
        assert_eq!(table.name(9), None);
    }

    #[test]
    fn test_air_regions_follow_use_air() {
        let regions = [region(0, 3, Some("crew space")), region(20, 0, Some("hull"))];

        let without_air = ComponentTable::build(&regions, false);
        assert_eq!(without_air.classify(&regions[0]), 0);
        assert_eq!(without_air.len(), 2);

        let with_air = ComponentTable::build(&regions, true);
        assert_eq!(with_air.classify(&regions[0]), 1);
        assert_eq!(with_air.classify(&regions[1]), 2);
    }

    #[test]
    fn test_empty_table() {
        let table = ComponentTable::build(std::iter::empty(), true);
        assert!(table.is_empty());
        assert_eq!(table.classify(&region(1, 0, None)), 0);
    }
}

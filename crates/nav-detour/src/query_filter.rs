//! Traversal policy applied by navigation queries

use crate::nav_mesh::{MeshTile, Poly};
use crate::{MAX_AREAS, PolyFlags, PolyRef};
use nav_common::vdist;

/// Query filter: per-area traversal costs and include/exclude flag masks
///
/// A polygon is traversable when `flags & include != 0` and
/// `flags & exclude == 0`. The filter is a plain value; queries borrow it
/// for the duration of a call, so it can be shared and edited between calls.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct QueryFilter {
    /// Cost multiplier per area id
    #[cfg_attr(feature = "serialization", serde(with = "area_cost_serde"))]
    pub area_cost: [f32; MAX_AREAS],
    /// Flags a polygon must have at least one of
    pub include_flags: PolyFlags,
    /// Flags a polygon must not have
    pub exclude_flags: PolyFlags,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            area_cost: [1.0; MAX_AREAS],
            include_flags: PolyFlags::all(),
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl QueryFilter {
    /// Creates a filter with the given include and exclude masks and unit costs
    pub fn new(include_flags: PolyFlags, exclude_flags: PolyFlags) -> Self {
        Self {
            include_flags,
            exclude_flags,
            ..Default::default()
        }
    }

    /// Returns true if the polygon can be visited
    #[inline]
    pub fn pass_filter(&self, _poly_ref: PolyRef, _tile: &MeshTile, poly: &Poly) -> bool {
        self.passes_flags(poly.flags)
    }

    /// Returns true if polygon flags satisfy the masks
    #[inline]
    pub fn passes_flags(&self, flags: PolyFlags) -> bool {
        flags.intersects(self.include_flags) && !flags.intersects(self.exclude_flags)
    }

    /// Returns the cost of moving from `pa` to `pb` across `poly`: the
    /// distance weighted by the polygon's area cost
    #[inline]
    pub fn get_cost(&self, pa: &[f32; 3], pb: &[f32; 3], poly: &Poly) -> f32 {
        vdist(pa, pb) * self.area_cost[(poly.area as usize) % MAX_AREAS]
    }

    /// Returns the traversal cost of an area. Out-of-range areas cost 0.
    pub fn get_area_cost(&self, area: usize) -> f32 {
        self.area_cost.get(area).copied().unwrap_or(0.0)
    }

    /// Sets the traversal cost of an area. Out-of-range areas are ignored.
    pub fn set_area_cost(&mut self, area: usize, cost: f32) {
        if let Some(slot) = self.area_cost.get_mut(area) {
            *slot = cost;
        }
    }

    pub fn include_flags(&self) -> PolyFlags {
        self.include_flags
    }

    pub fn set_include_flags(&mut self, flags: PolyFlags) {
        self.include_flags = flags;
    }

    pub fn exclude_flags(&self) -> PolyFlags {
        self.exclude_flags
    }

    pub fn set_exclude_flags(&mut self, flags: PolyFlags) {
        self.exclude_flags = flags;
    }
}

#[cfg(feature = "serialization")]
mod area_cost_serde {
    use crate::MAX_AREAS;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(costs: &[f32; MAX_AREAS], s: S) -> Result<S::Ok, S::Error> {
        costs.as_slice().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[f32; MAX_AREAS], D::Error> {
        let costs = Vec::<f32>::deserialize(d)?;
        if costs.len() > MAX_AREAS {
            return Err(D::Error::custom(format!(
                "expected at most {MAX_AREAS} area costs, got {}",
                costs.len()
            )));
        }
        let mut out = [1.0; MAX_AREAS];
        out[..costs.len()].copy_from_slice(&costs);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PolyType;

    fn poly_with(flags: PolyFlags, area: u8) -> Poly {
        Poly::new(area, PolyType::Ground, flags)
    }

    #[test]
    fn test_default_filter_passes_walkable() {
        let filter = QueryFilter::default();
        assert!(filter.passes_flags(PolyFlags::WALK));
        assert!(filter.passes_flags(PolyFlags::WALK | PolyFlags::DISABLED));
        // A polygon with no flags never intersects the include mask
        assert!(!filter.passes_flags(PolyFlags::empty()));
    }

    #[test]
    fn test_include_exclude() {
        let mut filter = QueryFilter::default();
        filter.set_include_flags(PolyFlags::WALK | PolyFlags::SWIM);
        filter.set_exclude_flags(PolyFlags::DISABLED);

        assert!(filter.passes_flags(PolyFlags::SWIM));
        assert!(!filter.passes_flags(PolyFlags::DOOR));
        assert!(!filter.passes_flags(PolyFlags::WALK | PolyFlags::DISABLED));
    }

    #[test]
    fn test_area_cost() {
        let mut filter = QueryFilter::default();
        filter.set_area_cost(3, 10.0);
        filter.set_area_cost(MAX_AREAS, 99.0);
        assert_eq!(filter.get_area_cost(3), 10.0);
        assert_eq!(filter.get_area_cost(0), 1.0);
        assert_eq!(filter.get_area_cost(MAX_AREAS), 0.0);

        let poly = poly_with(PolyFlags::WALK, 3);
        let cost = filter.get_cost(&[0.0, 0.0, 0.0], &[3.0, 0.0, 4.0], &poly);
        assert!((cost - 50.0).abs() < 1e-5);
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn test_json_config() {
        let json = r#"{"area_cost":[1.0,2.0,5.0],"include_flags":"WALK","exclude_flags":"DISABLED"}"#;
        let filter: QueryFilter = serde_json::from_str(json).expect("valid filter json");
        assert_eq!(filter.get_area_cost(2), 5.0);
        assert_eq!(filter.get_area_cost(10), 1.0);
        assert_eq!(filter.include_flags(), PolyFlags::WALK);
        assert_eq!(filter.exclude_flags(), PolyFlags::DISABLED);
    }
}

//! Shielding zone of the guard wires in the transversal plane.
//!
//! Each guard wire protects a cone opening downward at the shielding angle
//! from vertical. With several wires the zone is the polygon from the left
//! ground point, over every wire, to the right ground point.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Geometry;

const EDGE_TOLERANCE: f64 = 1e-9;

/// Protected zone as an `(x, z)` polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shielding {
    pub polygon: Vec<[f64; 2]>,
    pub angle_deg: f64,
    /// Conductor name to whether it lies inside the zone
    pub protected: BTreeMap<String, bool>,
}

impl Shielding {
    pub fn all_protected(&self) -> bool {
        self.protected.values().all(|p| *p)
    }

    /// Point-in-polygon; points on an edge count as inside.
    pub fn contains(&self, x: f64, z: f64) -> bool {
        let n = self.polygon.len();
        if n < 3 {
            return false;
        }
        for i in 0..n {
            let [ax, az] = self.polygon[i];
            let [bx, bz] = self.polygon[(i + 1) % n];
            if distance_to_segment(x, z, ax, az, bx, bz) < EDGE_TOLERANCE * (1.0 + x.abs().max(z.abs())) {
                return true;
            }
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let [xi, zi] = self.polygon[i];
            let [xj, zj] = self.polygon[j];
            if (zi > z) != (zj > z) && x < (xj - xi) * (z - zi) / (zj - zi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

fn distance_to_segment(px: f64, pz: f64, ax: f64, az: f64, bx: f64, bz: f64) -> f64 {
    let (dx, dz) = (bx - ax, bz - az);
    let len2 = dx * dx + dz * dz;
    let t = if len2 > 0.0 {
        (((px - ax) * dx + (pz - az) * dz) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    ((px - ax - t * dx).powi(2) + (pz - az - t * dz).powi(2)).sqrt()
}

/// Shielding zone of `geometry`; `None` without guard wires.
pub fn calculate(geometry: &Geometry, angle_deg: f64) -> Option<Shielding> {
    let mut guards: Vec<[f64; 2]> = geometry.guard_nodes().map(|n| [n.x, n.z]).collect();
    if guards.is_empty() {
        return None;
    }
    guards.sort_by(|a, b| a[0].total_cmp(&b[0]));
    let tan = angle_deg.to_radians().tan();

    let [lx, lz] = guards[0];
    let [rx, rz] = guards[guards.len() - 1];
    let mut polygon = Vec::with_capacity(guards.len() + 2);
    polygon.push([lx - lz * tan, 0.0]);
    polygon.extend(guards.iter().copied());
    polygon.push([rx + rz * tan, 0.0]);

    let mut shielding = Shielding {
        polygon,
        angle_deg,
        protected: BTreeMap::new(),
    };
    let flags: Vec<(String, bool)> = geometry
        .conductor_nodes()
        .map(|c| (c.name.clone(), shielding.contains(c.x, c.z)))
        .collect();
    shielding.protected.extend(flags);
    Some(shielding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculations::cmc;
    use crate::calculations::dge;
    use crate::catalog::default_catalog;
    use crate::config::tests::sample;

    #[test]
    fn test_single_wire_triangle() {
        let (_, _, g) = dge::tests::sample_geometry();
        let s = g.shielding.as_ref().unwrap();
        assert_eq!(s.polygon.len(), 3);
        let hg = g.node("HG1").unwrap();
        let half = hg.z * 30f64.to_radians().tan();
        assert!((s.polygon[0][0] + half).abs() < 1e-9);
        assert!(s.contains(0.0, hg.z / 2.0));
        assert!(!s.contains(half + 1.0, 1.0));
        assert_eq!(s.protected.len(), 3);
    }

    #[test]
    fn test_offset_shield_covers_its_side() {
        let mut config = sample();
        config.geometria.hg_centrado = false;
        let cmc = cmc::calculate(&config, default_catalog()).unwrap();
        let g = dge::calculate(&config, &cmc).unwrap();
        let s = g.shielding.unwrap();
        assert!(s.protected["C1_L"]);
        assert!(s.protected["C3_L"]);
    }

    #[test]
    fn test_no_guard_no_zone() {
        let mut config = sample();
        config.cant_hg = 0;
        config.cable_guardia_id = None;
        let cmc = cmc::calculate(&config, default_catalog()).unwrap();
        let g = dge::calculate(&config, &cmc).unwrap();
        assert!(g.shielding.is_none());
    }
}

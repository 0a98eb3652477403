//! Nodal loads and their reduction to the base
//!
//! # Overview
//!
//! - [`LoadOrigin`] - Weight, wind or tension
//! - [`LoadComponent`] - One tagged force/moment pair at a node
//! - [`NodalLoads`] - All components of one hypothesis, keyed by node name
//! - [`WindCode`] / [`WindTable`] - Typed wind-load codebook
//!
//! Forces are in daN, moments in daN·m, in the structure axes (`x`
//! transversal, `y` along the line, `z` up).

pub mod load_types;
pub mod wind;

pub use load_types::LoadOrigin;
pub use wind::{WindCode, WindTable, WindTarget};

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::calculations::dge::Geometry;
use crate::errors::CalcResult;

/// One tagged load at a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadComponent {
    pub origin: LoadOrigin,
    /// `[Fx, Fy, Fz]` (daN)
    pub force: [f64; 3],
    /// `[Mx, My, Mz]` (daN·m)
    #[serde(default)]
    pub moment: [f64; 3],
}

impl LoadComponent {
    pub fn force(origin: LoadOrigin, force: [f64; 3]) -> Self {
        LoadComponent {
            origin,
            force,
            moment: [0.0; 3],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.force.iter().chain(self.moment.iter()).all(|v| *v == 0.0)
    }

    /// Orient the component at a node rotated `deg` about z. Only origins
    /// that follow the node rotation turn.
    pub fn oriented(self, deg: f64) -> Self {
        if self.origin.follows_node_rotation() {
            self.rotated_z(deg)
        } else {
            self
        }
    }

    /// Rotate the horizontal part by `deg` about z.
    pub fn rotated_z(mut self, deg: f64) -> Self {
        if deg == 0.0 {
            return self;
        }
        let (s, c) = deg.to_radians().sin_cos();
        let [fx, fy, _] = self.force;
        self.force[0] = fx * c - fy * s;
        self.force[1] = fx * s + fy * c;
        let [mx, my, _] = self.moment;
        self.moment[0] = mx * c - my * s;
        self.moment[1] = mx * s + my * c;
        self
    }
}

/// Resultant force and moment of a load set about a point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resultant {
    pub force: [f64; 3],
    pub moment: [f64; 3],
}

/// Nodal loads of one hypothesis.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodalLoads {
    pub nodes: BTreeMap<String, Vec<LoadComponent>>,
}

impl NodalLoads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component; all-zero components are dropped.
    pub fn add(&mut self, node: &str, component: LoadComponent) {
        if component.is_zero() {
            return;
        }
        self.nodes.entry(node.to_string()).or_default().push(component);
    }

    pub fn components(&self, node: &str) -> &[LoadComponent] {
        self.nodes.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sum of forces at `node`, optionally restricted to one origin.
    pub fn node_force(&self, node: &str, origin: Option<LoadOrigin>) -> [f64; 3] {
        let mut total = Vector3::zeros();
        for c in self.components(node) {
            if origin.map_or(true, |o| o == c.origin) {
                total += Vector3::from(c.force);
            }
        }
        total.into()
    }

    /// Sum of forces over all nodes, optionally for one origin.
    pub fn total_force(&self, origin: Option<LoadOrigin>) -> [f64; 3] {
        let mut total = Vector3::zeros();
        for node in self.nodes.keys() {
            total += Vector3::from(self.node_force(node, origin));
        }
        total.into()
    }

    /// Resultant about `point` using node positions from `geometry`.
    pub fn resultant_about(&self, geometry: &Geometry, point: [f64; 3]) -> CalcResult<Resultant> {
        let origin = Vector3::from(point);
        let mut force = Vector3::zeros();
        let mut moment = Vector3::zeros();
        for (name, components) in &self.nodes {
            let arm = Vector3::from(geometry.node(name)?.position()) - origin;
            for c in components {
                let f = Vector3::from(c.force);
                force += f;
                moment += arm.cross(&f) + Vector3::from(c.moment);
            }
        }
        Ok(Resultant {
            force: force.into(),
            moment: moment.into(),
        })
    }
}

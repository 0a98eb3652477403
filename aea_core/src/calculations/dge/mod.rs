//! # Structure Geometry (DGE)
//!
//! Builds the 3D node graph of the structure from its typology, the cable
//! sags of CMC, the insulator length and the site altitude.
//!
//! ## Phases
//!
//! 1. Electrical distances ([`distances`])
//! 2. Vertical dimensions: attachment levels and shield height
//! 3. Horizontal dimensions: bracket and shield-bracket lengths
//! 4. Node instantiation per (disposition, terna, shield) recipe ([`builder`])
//! 5. Connection inference, insulator strings and swing clearance
//! 6. Editor overlay ([`overlay`])
//! 7. Shielding cone ([`shielding`])
//!
//! ## Axes
//!
//! `x` transversal, `y` along the line, `z` up. Ground level is `z = 0` at
//! `BASE`. Conductor `Ck` is numbered from the top down; `_L`, `_R`, `_C`
//! give the side. On suspension structures `Ck` is the attachment on the
//! arm and `CAD_Ck` the string end `Lk` below it, joined by a chain.
//!
//! Nodes are addressed by name and connections are name pairs, so the
//! geometry serializes as plain data.

pub mod builder;
pub mod distances;
pub mod overlay;
pub mod shielding;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calculations::cmc::CmcResult;
use crate::config::StructureConfig;
use crate::errors::{CalcError, CalcResult};

pub use distances::ElectricalDistances;
pub use overlay::NodeEdit;
pub use shielding::Shielding;

// ============================================================================
// Nodes and Connections
// ============================================================================

/// Structural role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    #[serde(rename = "base")]
    Base,
    #[serde(rename = "cross")]
    Cross,
    #[serde(rename = "conductor")]
    Conductor,
    #[serde(rename = "guard")]
    Guard,
    #[serde(rename = "viento")]
    Viento,
    #[serde(rename = "medio")]
    Medio,
    #[serde(rename = "top")]
    Top,
    #[serde(rename = "Y")]
    Y,
    /// Hanging end of a suspension insulator string
    #[serde(rename = "cadena")]
    Cadena,
}

/// A named point of the structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub tipo: NodeType,
    /// Cable attached at this node (catalog name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cable: Option<String>,
    /// Rotation about z applied to tension loads (degrees)
    #[serde(default)]
    pub rotacion_z: f64,
    #[serde(default)]
    pub is_edited: bool,
}

impl Node {
    pub fn new(name: impl Into<String>, x: f64, y: f64, z: f64, tipo: NodeType) -> Self {
        Node {
            name: name.into(),
            x,
            y,
            z,
            tipo,
            cable: None,
            rotacion_z: 0.0,
            is_edited: false,
        }
    }

    pub fn with_cable(mut self, cable: Option<String>) -> Self {
        self.cable = cable;
        self
    }

    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn distance_to(&self, other: &Node) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }

    /// Side suffix of a phase or shield name (`L`, `R`, `C`)
    pub fn side(&self) -> Option<&str> {
        self.name.rsplit_once('_').map(|(_, s)| s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Column,
    Cross,
    Bracket,
    /// Insulator string; drawn but not a frame member
    Chain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub a: String,
    pub b: String,
    pub kind: ConnectionKind,
}

impl Connection {
    pub fn joins(&self, a: &str, b: &str) -> bool {
        (self.a == a && self.b == b) || (self.a == b && self.b == a)
    }

    pub fn touches(&self, name: &str) -> bool {
        self.a == name || self.b == name
    }
}

// ============================================================================
// Dimensions
// ============================================================================

/// Derived dimensions of the structure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub ka: f64,
    pub vm_kv: f64,
    pub theta_max: f64,
    pub k: f64,
    #[serde(rename = "D_fases")]
    pub d_fases: f64,
    #[serde(rename = "Dhg")]
    pub dhg: f64,
    pub s_estructura: f64,
    pub f_max: f64,
    pub f_vert_max: f64,
    /// Vertical step between attachment levels
    pub delta_nivel: f64,
    /// Attachment heights, lowest first
    pub niveles: Vec<f64>,
    pub h1a: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h2a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h3a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hhg: Option<f64>,
    pub altura_total: f64,
    pub lmen: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lmenhg: Option<f64>,
    /// Horizontal spacing of phases sharing a level
    pub separacion_fases: f64,
    /// Projected pole area for structure wind (m²)
    pub area_poste_m2: f64,
    pub d_base_estimado: f64,
}

// ============================================================================
// Geometry
// ============================================================================

/// DGE stage payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub nodes: BTreeMap<String, Node>,
    pub connections: Vec<Connection>,
    pub dimensions: Dimensions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shielding: Option<Shielding>,
}

impl Geometry {
    pub fn node(&self, name: &str) -> CalcResult<&Node> {
        self.nodes
            .get(name)
            .ok_or_else(|| CalcError::missing_reference("node", name))
    }

    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.name.clone(), node);
    }

    /// Add a connection unless the pair is already joined.
    pub fn connect(&mut self, a: &str, b: &str, kind: ConnectionKind) {
        if a == b || self.connections.iter().any(|c| c.joins(a, b)) {
            return;
        }
        self.connections.push(Connection {
            a: a.to_string(),
            b: b.to_string(),
            kind,
        });
    }

    pub fn nodes_of(&self, tipo: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.tipo == tipo)
    }

    pub fn conductor_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes_of(NodeType::Conductor)
    }

    pub fn guard_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes_of(NodeType::Guard)
    }

    /// Frame members: every connection except insulator strings
    pub fn members(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().filter(|c| c.kind != ConnectionKind::Chain)
    }

    /// Pull reference node: `TOP`, else `HG1`, else the highest node.
    pub fn apex(&self) -> CalcResult<&Node> {
        if let Some(top) = self.nodes.get("TOP") {
            return Ok(top);
        }
        if let Some(hg) = self.nodes.get("HG1") {
            return Ok(hg);
        }
        self.nodes
            .values()
            .fold(None, |best: Option<&Node>, n| match best {
                Some(b) if b.z >= n.z => Some(b),
                _ => Some(n),
            })
            .ok_or_else(|| CalcError::missing_reference("node", "apex"))
    }

    pub fn base(&self) -> CalcResult<&Node> {
        self.node("BASE")
    }

    /// Names of nodes connected to `name`.
    pub fn neighbours<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.connections.iter().filter_map(move |c| {
            if c.a == name {
                Some(c.b.as_str())
            } else if c.b == name {
                Some(c.a.as_str())
            } else {
                None
            }
        })
    }
}

// ============================================================================
// Calculation
// ============================================================================

/// Run DGE: distances, dimensions, nodes, connections, overlay, shielding.
pub fn calculate(config: &StructureConfig, cmc: &CmcResult) -> CalcResult<Geometry> {
    let distances = distances::calculate(config, cmc)?;
    let mut geometry = builder::build(config, cmc, &distances)?;
    overlay::apply(&mut geometry, &config.nodos_editados)?;
    geometry.shielding = shielding::calculate(&geometry, config.geometria.ang_apantallamiento);
    info!(
        nodes = geometry.nodes.len(),
        connections = geometry.connections.len(),
        altura_total = geometry.dimensions.altura_total,
        "geometry built"
    );
    Ok(geometry)
}

//! # Load Trees
//!
//! Front view (x–z) of the structure with one arrow per node and load
//! origin for every hypothesis. Longitudinal (`y`) components are normal
//! to the drawing and shown as markers with their value in the label.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calculations::dge::{ConnectionKind, Geometry};
use crate::calculations::dme::{DmeResult, HypothesisLoads};
use crate::errors::{CalcError, CalcResult};
use crate::loads::LoadOrigin;
use crate::render::{Bounds, Canvas, Drawing};

const WIDTH_PX: f64 = 640.0;
const HEIGHT_PX: f64 = 800.0;

/// Drawing parameters (`arboles` group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Arrow length per daN (m)
    #[serde(default = "default_escala")]
    pub escala_m_por_dan: f64,
    #[serde(default = "default_true")]
    pub mostrar_etiquetas: bool,
}

fn default_escala() -> f64 {
    0.001
}

fn default_true() -> bool {
    true
}

impl Default for TreeParams {
    fn default() -> Self {
        TreeParams {
            escala_m_por_dan: default_escala(),
            mostrar_etiquetas: true,
        }
    }
}

impl TreeParams {
    pub fn validate(&self) -> CalcResult<()> {
        crate::config::positive("arboles.escala_m_por_dan", self.escala_m_por_dan)
    }
}

/// One drawn load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeArrow {
    pub node: String,
    pub origin: LoadOrigin,
    /// Arrow tail and head in the x–z plane (m)
    pub from: [f64; 2],
    pub to: [f64; 2],
    /// Forces in daN
    pub force: [f64; 3],
}

/// Load tree of one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTree {
    pub hipotesis: String,
    pub arrows: Vec<TreeArrow>,
    /// `node: Fx/Fy/Fz` totals, in node-name order
    pub labels: Vec<String>,
}

/// Trees stage payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreesResult {
    pub arboles: Vec<LoadTree>,
}

pub fn build_tree(geometry: &Geometry, loads: &HypothesisLoads, params: &TreeParams) -> CalcResult<LoadTree> {
    let k = params.escala_m_por_dan;
    let mut arrows = Vec::new();
    let mut labels = Vec::new();
    for (name, components) in &loads.cargas.nodes {
        let node = geometry.node(name)?;
        let tail = [node.x, node.z];
        for origin in LoadOrigin::ALL {
            let force = loads.cargas.node_force(name, Some(origin));
            if force == [0.0; 3] {
                continue;
            }
            arrows.push(TreeArrow {
                node: name.clone(),
                origin,
                from: tail,
                to: [tail[0] + force[0] * k, tail[1] + force[2] * k],
                force,
            });
        }
        if !components.is_empty() {
            let [fx, fy, fz] = loads.cargas.node_force(name, None);
            labels.push(format!("{}: {:.0}/{:.0}/{:.0}", name, fx, fy, fz));
        }
    }
    Ok(LoadTree {
        hipotesis: loads.nombre.clone(),
        arrows,
        labels,
    })
}

fn origin_color(origin: LoadOrigin) -> &'static str {
    match origin {
        LoadOrigin::Weight => "#1f6f3f",
        LoadOrigin::Wind => "#1f4fb0",
        LoadOrigin::Tension => "#b02a1f",
    }
}

/// Render one tree as PNG and SVG.
pub fn render(geometry: &Geometry, tree: &LoadTree, params: &TreeParams, suffix: &str) -> CalcResult<Drawing> {
    let mut bounds = Bounds::around(geometry.nodes.values().map(|n| [n.x, n.z]), 1.0);
    for a in &tree.arrows {
        bounds.include(a.to);
    }
    let mut canvas = Canvas::new(WIDTH_PX, HEIGHT_PX, bounds);
    canvas.title(&tree.hipotesis);

    for c in &geometry.connections {
        let (Some(a), Some(b)) = (geometry.nodes.get(&c.a), geometry.nodes.get(&c.b)) else {
            continue;
        };
        match c.kind {
            ConnectionKind::Chain => canvas.dashed([a.x, a.z], [b.x, b.z], "#888888"),
            ConnectionKind::Column => canvas.line([a.x, a.z], [b.x, b.z], "#333333", 3.0),
            _ => canvas.line([a.x, a.z], [b.x, b.z], "#333333", 2.0),
        }
    }
    for n in geometry.nodes.values() {
        canvas.circle([n.x, n.z], 2.5, "#333333");
    }
    for a in &tree.arrows {
        let color = origin_color(a.origin);
        if a.from != a.to {
            canvas.arrow(a.from, a.to, color);
        }
        if a.force[1] != 0.0 {
            canvas.cross_marker(a.from, 8.0, color);
        }
    }
    if params.mostrar_etiquetas {
        for (i, label) in tree.labels.iter().enumerate() {
            canvas.text([bounds.x_min, bounds.z_min], 4.0, -(i as f64) * 14.0, label, 10.0);
        }
    }
    canvas.finish(suffix)
}

/// Build the trees and their drawings for every hypothesis.
pub fn calculate(geometry: &Geometry, dme: &DmeResult, params: &TreeParams) -> CalcResult<(TreesResult, Vec<Drawing>)> {
    if dme.hipotesis.is_empty() {
        return Err(CalcError::missing_reference("hypotheses", "DME"));
    }
    let mut arboles = Vec::with_capacity(dme.hipotesis.len());
    let mut drawings = Vec::with_capacity(dme.hipotesis.len());
    for h in &dme.hipotesis {
        let tree = build_tree(geometry, h, params)?;
        drawings.push(render(geometry, &tree, params, &h.codigo)?);
        arboles.push(tree);
    }
    debug!(trees = arboles.len(), "load trees rendered");
    Ok((TreesResult { arboles }, drawings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculations::dme::tests::sample_dme;

    #[test]
    fn test_one_tree_per_hypothesis() {
        let (config, _, geometry, dme) = sample_dme();
        let (trees, drawings) = calculate(&geometry, &dme, &config.arboles).unwrap();
        assert_eq!(trees.arboles.len(), dme.hipotesis.len());
        assert_eq!(drawings.len(), dme.hipotesis.len());
        assert!(drawings.iter().all(|d| d.svg.starts_with("<svg")));
        assert!(drawings.iter().all(|d| d.png.starts_with(b"\x89PNG")));
        assert!(drawings.iter().any(|d| d.suffix == "A1"));
    }

    #[test]
    fn test_arrow_length_follows_scale() {
        let (config, _, geometry, dme) = sample_dme();
        let a1 = dme.hypothesis("A1").unwrap();
        let tree = build_tree(&geometry, a1, &config.arboles).unwrap();
        let wind_v = tree
            .arrows
            .iter()
            .find(|a| a.node == "V" && a.origin == LoadOrigin::Wind)
            .unwrap();
        assert!((wind_v.to[0] - wind_v.from[0] - wind_v.force[0] * 0.001).abs() < 1e-12);
        assert!(wind_v.force[0] > 0.0);
    }

    #[test]
    fn test_labels_hidden() {
        let (_, _, geometry, dme) = sample_dme();
        let params = TreeParams {
            escala_m_por_dan: 0.002,
            mostrar_etiquetas: false,
        };
        let tree = build_tree(&geometry, dme.hypothesis("A0").unwrap(), &params).unwrap();
        let drawing = render(&geometry, &tree, &params, "A0").unwrap();
        assert!(!drawing.svg.contains("C1_L:"));
    }
}

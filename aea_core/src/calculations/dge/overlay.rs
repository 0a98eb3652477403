//! Editor overlay: node edits stored in the structure document and applied
//! after the generated geometry.
//!
//! Edits run in two passes. The first creates, moves or deletes nodes; the
//! second adds connections, so an edit may connect to a node created by a
//! later edit.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ConnectionKind, Geometry, Node, NodeType};
use crate::errors::{CalcError, CalcResult};

/// One edit of the node overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEdit {
    pub nombre: String,
    /// Offset added to the node position (m)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desplazamiento: Option<[f64; 3]>,
    /// Absolute position; applied before `desplazamiento`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordenadas: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotacion_z: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conexiones: Vec<(String, ConnectionKind)>,
    #[serde(default)]
    pub eliminar: bool,
    /// Required when the edit creates a node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tipo: Option<NodeType>,
}

impl NodeEdit {
    pub fn new(nombre: impl Into<String>) -> Self {
        NodeEdit {
            nombre: nombre.into(),
            desplazamiento: None,
            coordenadas: None,
            cable: None,
            rotacion_z: None,
            conexiones: Vec::new(),
            eliminar: false,
            tipo: None,
        }
    }
}

/// Apply `edits` to `geometry` in order.
pub fn apply(geometry: &mut Geometry, edits: &[NodeEdit]) -> CalcResult<()> {
    for edit in edits {
        if edit.eliminar {
            if geometry.nodes.remove(&edit.nombre).is_none() {
                return Err(CalcError::missing_reference("node", edit.nombre.clone()));
            }
            for end in string_ends(geometry, &edit.nombre) {
                geometry.nodes.remove(&end);
                geometry.connections.retain(|c| !c.touches(&end));
            }
            geometry.connections.retain(|c| !c.touches(&edit.nombre));
            debug!(node = %edit.nombre, "node deleted by overlay");
            continue;
        }

        if !geometry.nodes.contains_key(&edit.nombre) {
            let (Some(tipo), Some([x, y, z])) = (edit.tipo, edit.coordenadas) else {
                return Err(CalcError::missing_reference("node", edit.nombre.clone()));
            };
            geometry.insert(Node::new(edit.nombre.clone(), x, y, z, tipo));
            debug!(node = %edit.nombre, "node created by overlay");
        }
        let ends = string_ends(geometry, &edit.nombre);
        let node = geometry
            .nodes
            .get_mut(&edit.nombre)
            .ok_or_else(|| CalcError::internal("overlay node missing after insert"))?;
        let before = node.position();

        if let Some([x, y, z]) = edit.coordenadas {
            node.x = x;
            node.y = y;
            node.z = z;
        }
        if let Some([dx, dy, dz]) = edit.desplazamiento {
            node.x += dx;
            node.y += dy;
            node.z += dz;
        }
        if let Some(cable) = &edit.cable {
            node.cable = Some(cable.clone());
        }
        if let Some(rot) = edit.rotacion_z {
            node.rotacion_z = rot;
        }
        if let Some(tipo) = edit.tipo {
            node.tipo = tipo;
        }
        node.is_edited = true;

        // String ends follow their attachment
        let after = node.position();
        let shift = [after[0] - before[0], after[1] - before[1], after[2] - before[2]];
        for end in ends {
            if let Some(n) = geometry.nodes.get_mut(&end) {
                n.x += shift[0];
                n.y += shift[1];
                n.z += shift[2];
            }
        }
    }

    for edit in edits.iter().filter(|e| !e.eliminar) {
        for (other, kind) in &edit.conexiones {
            if !geometry.nodes.contains_key(other) {
                return Err(CalcError::missing_reference("node", other.clone()));
            }
            geometry.connect(&edit.nombre, other, *kind);
        }
    }
    Ok(())
}

/// Insulator string ends hanging from `name`.
fn string_ends(geometry: &Geometry, name: &str) -> Vec<String> {
    geometry
        .connections
        .iter()
        .filter(|c| c.kind == ConnectionKind::Chain && c.touches(name))
        .map(|c| if c.a == name { c.b.clone() } else { c.a.clone() })
        .filter(|other| geometry.nodes.get(other).is_some_and(|n| n.tipo == NodeType::Cadena))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculations::dge::tests::sample_geometry;
    use crate::errors::ErrorKind;

    #[test]
    fn test_move_and_rotate() {
        let (_, _, mut g) = sample_geometry();
        let before = g.node("C1_L").unwrap().clone();
        let mut edit = NodeEdit::new("C1_L");
        edit.desplazamiento = Some([-0.5, 0.0, 0.25]);
        edit.rotacion_z = Some(90.0);
        apply(&mut g, &[edit]).unwrap();
        let after = g.node("C1_L").unwrap();
        assert_eq!(after.x, before.x - 0.5);
        assert_eq!(after.z, before.z + 0.25);
        assert_eq!(after.rotacion_z, 90.0);
        assert!(after.is_edited);
        assert!(!g.node("C2_R").unwrap().is_edited);
    }

    #[test]
    fn test_string_end_follows_moved_phase() {
        let (config, _, mut g) = sample_geometry();
        let mut edit = NodeEdit::new("C2_R");
        edit.desplazamiento = Some([0.4, 0.0, -0.3]);
        apply(&mut g, &[edit]).unwrap();
        let c2 = g.node("C2_R").unwrap();
        let end = g.node("CAD_C2_R").unwrap();
        assert_eq!(end.x, c2.x);
        assert!((c2.z - end.z - config.lk).abs() < 1e-12);
        assert!(!end.is_edited);
    }

    #[test]
    fn test_create_and_connect_in_any_order() {
        let (_, _, mut g) = sample_geometry();
        let mut link = NodeEdit::new("C1_L");
        link.conexiones.push(("AUX".into(), ConnectionKind::Bracket));
        let mut create = NodeEdit::new("AUX");
        create.tipo = Some(NodeType::Cross);
        create.coordenadas = Some([-1.0, 0.0, 12.0]);
        apply(&mut g, &[link, create]).unwrap();
        assert!(g.node("AUX").unwrap().is_edited);
        assert!(g.connections.iter().any(|c| c.joins("C1_L", "AUX")));
    }

    #[test]
    fn test_delete_removes_connections() {
        let (_, _, mut g) = sample_geometry();
        let mut edit = NodeEdit::new("C3_L");
        edit.eliminar = true;
        apply(&mut g, &[edit]).unwrap();
        assert!(g.nodes.get("C3_L").is_none());
        assert!(g.nodes.get("CAD_C3_L").is_none());
        assert!(!g.connections.iter().any(|c| c.touches("C3_L") || c.touches("CAD_C3_L")));
    }

    #[test]
    fn test_unknown_node_is_missing_reference() {
        let (_, _, mut g) = sample_geometry();
        let err = apply(&mut g, &[NodeEdit::new("C7_X")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingReference);

        let mut edit = NodeEdit::new("C1_L");
        edit.conexiones.push(("NOPE".into(), ConnectionKind::Cross));
        assert!(apply(&mut g, &[edit]).is_err());
    }

    #[test]
    fn test_edit_json_shape() {
        let edit: NodeEdit = serde_json::from_value(serde_json::json!({
            "nombre": "C1_L",
            "rotacion_z": 45.0,
            "conexiones": [["CROSS_H2", "bracket"]]
        }))
        .unwrap();
        assert_eq!(edit.conexiones[0], ("CROSS_H2".to_string(), ConnectionKind::Bracket));
        assert!(!edit.eliminar);
    }
}

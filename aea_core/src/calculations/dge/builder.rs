//! Node instantiation and connection inference for the supported
//! (disposition, terna, shield) recipes.

use tracing::debug;

use super::distances::ElectricalDistances;
use super::{ConnectionKind, Dimensions, Geometry, Node, NodeType};
use crate::calculations::cmc::CmcResult;
use crate::config::{Disposition, StructureConfig, Terna};
use crate::errors::{CalcError, CalcResult};

const MAX_SHIELD_PASSES: usize = 20;
const MAX_HEAD_PASSES: usize = 20;
/// Growth of the portal head per pass while the centre phase lacks clearance
const HEAD_GROWTH: f64 = 1.15;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Side {
    L,
    R,
}

impl Side {
    fn sign(self) -> f64 {
        match self {
            Side::L => -1.0,
            Side::R => 1.0,
        }
    }
}

/// One phase on a level; `rank` 0 is next to the column.
struct PhaseSpec {
    name: &'static str,
    side: Side,
    rank: u8,
}

/// One attachment level, listed top to bottom.
struct LevelSpec {
    kind: ConnectionKind,
    phases: &'static [PhaseSpec],
}

const fn phase(name: &'static str, side: Side, rank: u8) -> PhaseSpec {
    PhaseSpec { name, side, rank }
}

const VERTICAL_SIMPLE: &[LevelSpec] = &[
    LevelSpec { kind: ConnectionKind::Bracket, phases: &[phase("C1_L", Side::L, 0)] },
    LevelSpec { kind: ConnectionKind::Bracket, phases: &[phase("C2_R", Side::R, 0)] },
    LevelSpec { kind: ConnectionKind::Bracket, phases: &[phase("C3_L", Side::L, 0)] },
];

const VERTICAL_DOBLE: &[LevelSpec] = &[
    LevelSpec { kind: ConnectionKind::Cross, phases: &[phase("C1_L", Side::L, 0), phase("C1_R", Side::R, 0)] },
    LevelSpec { kind: ConnectionKind::Cross, phases: &[phase("C2_L", Side::L, 0), phase("C2_R", Side::R, 0)] },
    LevelSpec { kind: ConnectionKind::Cross, phases: &[phase("C3_L", Side::L, 0), phase("C3_R", Side::R, 0)] },
];

const TRIANGULAR_SIMPLE: &[LevelSpec] = &[
    LevelSpec { kind: ConnectionKind::Bracket, phases: &[phase("C1_L", Side::L, 0)] },
    LevelSpec { kind: ConnectionKind::Cross, phases: &[phase("C2_L", Side::L, 0), phase("C2_R", Side::R, 0)] },
];

const BANDERA_SIMPLE: &[LevelSpec] = &[
    LevelSpec { kind: ConnectionKind::Bracket, phases: &[phase("C1_L", Side::L, 0)] },
    LevelSpec { kind: ConnectionKind::Bracket, phases: &[phase("C2_L", Side::L, 0)] },
    LevelSpec { kind: ConnectionKind::Bracket, phases: &[phase("C3_L", Side::L, 0)] },
];

const RECT_DOBLE: &[LevelSpec] = &[
    LevelSpec { kind: ConnectionKind::Cross, phases: &[phase("C1_L", Side::L, 0), phase("C1_R", Side::R, 0)] },
    LevelSpec {
        kind: ConnectionKind::Cross,
        phases: &[
            phase("C2_L", Side::L, 0),
            phase("C2_R", Side::R, 0),
            phase("C3_L", Side::L, 1),
            phase("C3_R", Side::R, 1),
        ],
    },
];

fn recipe(disposition: Disposition, terna: Terna) -> Option<&'static [LevelSpec]> {
    match (disposition, terna) {
        (Disposition::Vertical, Terna::Simple) => Some(VERTICAL_SIMPLE),
        (Disposition::Vertical, Terna::Doble) => Some(VERTICAL_DOBLE),
        (Disposition::Triangular, Terna::Simple) => Some(TRIANGULAR_SIMPLE),
        (Disposition::Bandera, Terna::Simple) => Some(BANDERA_SIMPLE),
        (Disposition::Rect, Terna::Doble) => Some(RECT_DOBLE),
        _ => None,
    }
}

/// How shield wires sit on a single column.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ShieldLayout {
    None,
    Centred,
    Offset,
    Pair,
}

/// Working values shared by the recipe builders.
struct Frame<'a> {
    config: &'a StructureConfig,
    distances: &'a ElectricalDistances,
    f_vert_max: f64,
    /// Bracket length from clearance alone
    lmen_clearance: f64,
    delta: f64,
    h1a: f64,
    guard_cables: Vec<String>,
}

impl<'a> Frame<'a> {
    fn check_lmen_max(&self, lmen: f64) -> CalcResult<()> {
        if let Some(max) = self.config.geometria.lmen_max {
            if lmen > max + 1e-9 {
                return Err(CalcError::geometry_infeasible(format!(
                    "bracket length {:.3} m needed for clearance s={:.3} m exceeds LONGITUD_MENSULA_MAXIMA {:.3} m",
                    lmen, self.distances.s_estructura, max
                )));
            }
        }
        Ok(())
    }

    fn hhg_initial(&self, h_top: f64) -> f64 {
        let g = &self.config.geometria;
        h_top + g.hadd.max(self.distances.dhg) + g.hadd_hg
    }

    fn guard_cable(&self, index: usize) -> Option<String> {
        self.guard_cables.get(index).cloned()
    }
}

/// Build nodes, connections and dimensions.
pub fn build(config: &StructureConfig, cmc: &CmcResult, distances: &ElectricalDistances) -> CalcResult<Geometry> {
    let g = &config.geometria;
    let f_vert_max = cmc.conductor.f_vert_max();
    let lmen_clearance =
        (distances.s_estructura + config.lk * distances.theta_max_deg.to_radians().sin()).max(g.lmen_min);
    let frame = Frame {
        config,
        distances,
        f_vert_max,
        lmen_clearance,
        delta: g.hadd.max(distances.d_fases) + g.hadd_entre_amarres,
        h1a: g.altura_minima_cable + f_vert_max + config.lk,
        guard_cables: config.guard_cable_ids(),
    };
    frame.check_lmen_max(lmen_clearance)?;

    let geometry = if config.disposicion == Disposition::Horizontal {
        if config.terna != Terna::Simple {
            return Err(CalcError::invalid_typology(
                config.disposicion.code(),
                config.terna.code(),
                config.cant_hg,
            ));
        }
        build_portal(&frame)?
    } else {
        let levels = recipe(config.disposicion, config.terna).ok_or_else(|| {
            CalcError::invalid_typology(config.disposicion.code(), config.terna.code(), config.cant_hg)
        })?;
        let mut geometry = build_column(&frame, levels)?;
        hang_chains(&mut geometry, distances.lk_susp);
        geometry
    };
    check_swing_clearance(&geometry, distances)?;
    Ok(geometry)
}

fn empty_geometry(frame: &Frame<'_>, niveles: Vec<f64>, lmen: f64, separacion: f64) -> Geometry {
    let d = frame.distances;
    Geometry {
        nodes: Default::default(),
        connections: Vec::new(),
        dimensions: Dimensions {
            ka: d.ka,
            vm_kv: d.vm_kv,
            theta_max: d.theta_max_deg,
            k: d.k,
            d_fases: d.d_fases,
            dhg: d.dhg,
            s_estructura: d.s_estructura,
            f_max: d.f_max,
            f_vert_max: frame.f_vert_max,
            delta_nivel: frame.delta,
            h1a: niveles[0],
            h2a: niveles.get(1).copied(),
            h3a: niveles.get(2).copied(),
            niveles,
            hhg: None,
            altura_total: 0.0,
            lmen,
            lmenhg: None,
            separacion_fases: separacion,
            area_poste_m2: 0.0,
            d_base_estimado: 0.0,
        },
        shielding: None,
    }
}

// ============================================================================
// Single Column Recipes
// ============================================================================

fn build_column(frame: &Frame<'_>, levels: &'static [LevelSpec]) -> CalcResult<Geometry> {
    let config = frame.config;
    let d_fases = frame.distances.d_fases;
    let has_cross = levels.iter().any(|l| l.kind == ConnectionKind::Cross);
    let lmen = if has_cross {
        frame.lmen_clearance.max(d_fases / 2.0)
    } else {
        frame.lmen_clearance
    };
    // Outer phases clear the inner attachment like the column
    let step = d_fases.max(frame.lmen_clearance);
    let outer = levels.iter().flat_map(|l| l.phases).map(|p| p.rank).max().unwrap_or(0);
    frame.check_lmen_max(lmen + f64::from(outer) * step)?;

    let n = levels.len();
    let delta = stacked_delta(frame, levels);
    let niveles: Vec<f64> = (0..n).map(|i| frame.h1a + i as f64 * delta).collect();
    let h_top = niveles[n - 1];
    let separacion = if has_cross { 2.0 * lmen } else { d_fases };
    let mut geometry = empty_geometry(frame, niveles.clone(), lmen, separacion);
    geometry.dimensions.delta_nivel = delta;
    let mut axis = vec!["BASE".to_string()];
    geometry.insert(Node::new("BASE", 0.0, 0.0, 0.0, NodeType::Base));

    let layout = match (config.cant_hg, config.geometria.hg_centrado) {
        (0, _) => ShieldLayout::None,
        (1, true) => ShieldLayout::Centred,
        (1, false) => ShieldLayout::Offset,
        _ => ShieldLayout::Pair,
    };

    // Attachment levels, top down
    for (t, level) in levels.iter().enumerate() {
        let z = niveles[n - 1 - t];
        let centre = if t == 0 && layout == ShieldLayout::None {
            "TOP".to_string()
        } else {
            format!("CROSS_H{}", t + 1)
        };
        let tipo = if centre == "TOP" { NodeType::Top } else { NodeType::Cross };
        geometry.insert(Node::new(centre.clone(), 0.0, 0.0, z, tipo));
        axis.push(centre.clone());

        let mut sorted: Vec<&PhaseSpec> = level.phases.iter().collect();
        sorted.sort_by_key(|p| p.rank);
        for p in sorted {
            let x = p.side.sign() * (lmen + f64::from(p.rank) * step);
            geometry.insert(
                Node::new(p.name, x, 0.0, z, NodeType::Conductor).with_cable(Some(config.cable_conductor_id.clone())),
            );
            let inner = if p.rank == 0 {
                centre.clone()
            } else {
                level
                    .phases
                    .iter()
                    .find(|q| q.side == p.side && q.rank + 1 == p.rank)
                    .map(|q| q.name.to_string())
                    .unwrap_or_else(|| centre.clone())
            };
            geometry.connect(&inner, p.name, level.kind);
        }
    }

    let mut altura_total = h_top;
    if layout != ShieldLayout::None {
        let conductors: Vec<(f64, f64)> = geometry.conductor_nodes().map(|c| (c.x, c.z)).collect();
        let (hhg, lmenhg) = place_shields(frame, layout, h_top, &conductors);
        geometry.dimensions.hhg = Some(hhg);
        geometry.dimensions.lmenhg = Some(lmenhg);
        altura_total = hhg;
        match layout {
            ShieldLayout::Centred => {
                geometry.insert(Node::new("HG1", 0.0, 0.0, hhg, NodeType::Guard).with_cable(frame.guard_cable(0)));
                axis.push("HG1".to_string());
            }
            ShieldLayout::Offset => {
                geometry.insert(Node::new("TOP", 0.0, 0.0, hhg, NodeType::Top));
                geometry.insert(Node::new("HG1", -lmenhg, 0.0, hhg, NodeType::Guard).with_cable(frame.guard_cable(0)));
                geometry.connect("TOP", "HG1", ConnectionKind::Bracket);
                axis.push("TOP".to_string());
            }
            ShieldLayout::Pair => {
                geometry.insert(Node::new("TOP", 0.0, 0.0, hhg, NodeType::Top));
                geometry.insert(Node::new("HG1", -lmenhg, 0.0, hhg, NodeType::Guard).with_cable(frame.guard_cable(0)));
                geometry.insert(Node::new("HG2", lmenhg, 0.0, hhg, NodeType::Guard).with_cable(frame.guard_cable(1)));
                geometry.connect("TOP", "HG1", ConnectionKind::Cross);
                geometry.connect("TOP", "HG2", ConnectionKind::Cross);
                axis.push("TOP".to_string());
            }
            ShieldLayout::None => {}
        }
    }
    geometry.dimensions.altura_total = altura_total;
    finish_column(&mut geometry, axis, altura_total, frame);
    Ok(geometry)
}

/// Level step. A hanging string must clear `s_estructura` to the next arm
/// below on its side, so `delta * gap >= Lk + s` for the closest such arm.
fn stacked_delta(frame: &Frame<'_>, levels: &[LevelSpec]) -> f64 {
    let lk = frame.distances.lk_susp;
    if lk <= 0.0 {
        return frame.delta;
    }
    let covers = |level: &LevelSpec, side: Side| {
        level.kind == ConnectionKind::Cross || level.phases.iter().any(|p| p.side == side)
    };
    let mut min_gap: Option<usize> = None;
    for (t, upper) in levels.iter().enumerate() {
        for p in upper.phases {
            if let Some(gap) = levels[t + 1..].iter().position(|l| covers(l, p.side)) {
                min_gap = Some(min_gap.map_or(gap + 1, |g| g.min(gap + 1)));
            }
        }
    }
    match min_gap {
        Some(gap) => {
            let needed = (lk + frame.distances.s_estructura) / gap as f64;
            if needed > frame.delta {
                debug!(from = frame.delta, to = needed, "level step raised for hanging strings");
            }
            frame.delta.max(needed)
        }
        None => frame.delta,
    }
}

/// Shield height and bracket length. The bracket follows the shielding
/// angle when auto-adjusted; the height rises until every shield-conductor
/// distance reaches `Dhg`.
fn place_shields(frame: &Frame<'_>, layout: ShieldLayout, h_top: f64, conductors: &[(f64, f64)]) -> (f64, f64) {
    let g = &frame.config.geometria;
    let dhg = frame.distances.dhg;
    let tan_beta = g.ang_apantallamiento.to_radians().tan();
    let mut hhg = frame.hhg_initial(h_top);
    let mut lmenhg = 0.0;

    for pass in 0..MAX_SHIELD_PASSES {
        lmenhg = match layout {
            ShieldLayout::Centred | ShieldLayout::None => 0.0,
            ShieldLayout::Offset | ShieldLayout::Pair => {
                if g.autoajustar_lmenhg {
                    // Each shield covers the conductors on its own side
                    let needed = conductors
                        .iter()
                        .filter(|(x, _)| *x < 0.0 || (layout == ShieldLayout::Pair && *x > 0.0))
                        .map(|(x, z)| x.abs() - (hhg - z) * tan_beta)
                        .fold(f64::MIN, f64::max);
                    needed.max(g.lmenhg_min)
                } else {
                    g.lmenhg_min
                }
            }
        };
        let shields: Vec<f64> = match layout {
            ShieldLayout::Pair => vec![-lmenhg, lmenhg],
            ShieldLayout::Offset => vec![-lmenhg],
            _ => vec![0.0],
        };
        let mut raised = hhg;
        for xs in &shields {
            for (xc, zc) in conductors {
                let dx = (xs - xc).abs();
                if dx < dhg {
                    let needed = zc + (dhg * dhg - dx * dx).sqrt();
                    if needed > raised + 1e-9 {
                        raised = needed;
                    }
                }
            }
        }
        if raised <= hhg {
            break;
        }
        debug!(pass, from = hhg, to = raised, "shield height raised for Dhg");
        hhg = raised;
    }
    (hhg, lmenhg)
}

// ============================================================================
// Horizontal Portal
// ============================================================================

/// Portal with a Y head. The head starts `2 (Lk + s)` deep so the centre
/// string clears the strut, then grows until every swung position clears.
fn build_portal(frame: &Frame<'_>) -> CalcResult<Geometry> {
    let d = frame.distances;
    let mut a = d.d_fases.max(2.0 * frame.lmen_clearance) / 2.0;
    let mut depth = a.max(2.0 * (d.lk_susp + d.s_estructura));
    for pass in 0..MAX_HEAD_PASSES {
        let mut geometry = portal(frame, a, depth)?;
        hang_chains(&mut geometry, d.lk_susp);
        match worst_swing_gap(&geometry, d) {
            Some((_, gap)) if gap < d.s_estructura - 1e-9 => {
                debug!(pass, a, depth, gap, "portal head grown for swing clearance");
                a *= HEAD_GROWTH;
                depth *= HEAD_GROWTH;
            }
            _ => return Ok(geometry),
        }
    }
    Err(CalcError::geometry_infeasible(format!(
        "portal head cannot clear s={:.3} m around the centre phase",
        d.s_estructura
    )))
}

/// Portal geometry for head half-width `a` and head depth `depth`.
fn portal(frame: &Frame<'_>, a: f64, depth: f64) -> CalcResult<Geometry> {
    let config = frame.config;
    let sep = 2.0 * a;
    frame.check_lmen_max(a)?;
    let hc = frame.h1a;
    let column_top = hc - depth;
    if column_top <= 0.0 {
        return Err(CalcError::geometry_infeasible(format!(
            "portal head depth {:.3} m exceeds attachment height {:.3} m",
            depth, hc
        )));
    }
    let mut geometry = empty_geometry(frame, vec![hc], a, sep);
    let cable = Some(config.cable_conductor_id.clone());

    geometry.insert(Node::new("BASE", 0.0, 0.0, 0.0, NodeType::Base));
    let y1 = Node::new("Y1", 0.0, 0.0, column_top, NodeType::Y);
    let y2 = Node::new("Y2", -a, 0.0, hc, NodeType::Y);
    let y3 = Node::new("Y3", a, 0.0, hc, NodeType::Y);
    let y4 = Node::new("Y4", -a / 2.0, 0.0, hc - depth / 2.0, NodeType::Y);
    let y5 = Node::new("Y5", a / 2.0, 0.0, hc - depth / 2.0, NodeType::Y);
    for n in [y1, y2, y3, y4, y5] {
        geometry.insert(n);
    }
    geometry.insert(Node::new("C1_L", -sep, 0.0, hc, NodeType::Conductor).with_cable(cable.clone()));
    geometry.insert(Node::new("C1_C", 0.0, 0.0, hc, NodeType::Conductor).with_cable(cable.clone()));
    geometry.insert(Node::new("C1_R", sep, 0.0, hc, NodeType::Conductor).with_cable(cable));

    for (a_name, b_name) in [("Y1", "Y4"), ("Y4", "Y2"), ("Y1", "Y5"), ("Y5", "Y3"), ("Y4", "Y5")] {
        geometry.connect(a_name, b_name, ConnectionKind::Cross);
    }
    for (a_name, b_name) in [("C1_L", "Y2"), ("Y2", "C1_C"), ("C1_C", "Y3"), ("Y3", "C1_R")] {
        geometry.connect(a_name, b_name, ConnectionKind::Cross);
    }

    let mut altura_total = hc;
    if config.cant_hg > 0 {
        let hhg = frame.hhg_initial(hc);
        geometry.dimensions.hhg = Some(hhg);
        altura_total = hhg;
        if config.cant_hg == 1 {
            geometry.dimensions.lmenhg = Some(0.0);
            geometry.insert(Node::new("HG1", 0.0, 0.0, hhg, NodeType::Guard).with_cable(frame.guard_cable(0)));
            geometry.connect("C1_C", "HG1", ConnectionKind::Column);
        } else {
            geometry.dimensions.lmenhg = Some(a);
            geometry.insert(Node::new("HG1", -a, 0.0, hhg, NodeType::Guard).with_cable(frame.guard_cable(0)));
            geometry.insert(Node::new("HG2", a, 0.0, hhg, NodeType::Guard).with_cable(frame.guard_cable(1)));
            geometry.connect("Y2", "HG1", ConnectionKind::Column);
            geometry.connect("Y3", "HG2", ConnectionKind::Column);
        }
    }
    geometry.dimensions.altura_total = altura_total;
    finish_column(&mut geometry, vec!["BASE".into(), "Y1".into()], column_top, frame);
    Ok(geometry)
}

// ============================================================================
// Insulator Strings, Swing Clearance
// ============================================================================

/// Name of the hanging end of the string below `conductor`.
pub fn chain_node_name(conductor: &str) -> String {
    format!("CAD_{}", conductor)
}

/// Hang a string of length `lk` below every phase attachment. Tension
/// typologies carry their strings along the line and get none.
fn hang_chains(geometry: &mut Geometry, lk: f64) {
    if lk <= 0.0 {
        return;
    }
    let ends: Vec<(String, Node)> = geometry
        .conductor_nodes()
        .map(|c| {
            let end = Node::new(chain_node_name(&c.name), c.x, c.y, c.z - lk, NodeType::Cadena);
            (c.name.clone(), end.with_cable(c.cable.clone()))
        })
        .collect();
    for (attachment, end) in ends {
        let name = end.name.clone();
        geometry.insert(end);
        geometry.connect(&attachment, &name, ConnectionKind::Chain);
    }
}

/// Conductor positions checked for clearance: at rest and swung either way.
pub fn swing_positions(attachment: [f64; 3], lk: f64, theta_deg: f64) -> Vec<[f64; 3]> {
    let [x, y, z] = attachment;
    let mut positions = vec![[x, y, z - lk]];
    if lk > 0.0 && theta_deg > 0.0 {
        let (sin, cos) = theta_deg.to_radians().sin_cos();
        positions.push([x - lk * sin, y, z - lk * cos]);
        positions.push([x + lk * sin, y, z - lk * cos]);
    }
    positions
}

/// Distance from `p` to the segment `a`-`b`.
pub fn segment_distance(p: [f64; 3], a: [f64; 3], b: [f64; 3]) -> f64 {
    let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let ap = [p[0] - a[0], p[1] - a[1], p[2] - a[2]];
    let len2 = ab[0] * ab[0] + ab[1] * ab[1] + ab[2] * ab[2];
    let t = if len2 > 0.0 {
        ((ap[0] * ab[0] + ap[1] * ab[1] + ap[2] * ab[2]) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let q = [a[0] + t * ab[0], a[1] + t * ab[1], a[2] + t * ab[2]];
    ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2)).sqrt()
}

/// Smallest gap between a conductor position and a member the phase is not
/// attached to, as `(phase, gap)`.
fn worst_swing_gap(geometry: &Geometry, d: &ElectricalDistances) -> Option<(String, f64)> {
    let mut worst: Option<(String, f64)> = None;
    for c in geometry.conductor_nodes() {
        for p in swing_positions(c.position(), d.lk_susp, d.theta_max_deg) {
            for m in geometry.members().filter(|m| !m.touches(&c.name)) {
                let (Some(a), Some(b)) = (geometry.nodes.get(&m.a), geometry.nodes.get(&m.b)) else {
                    continue;
                };
                let gap = segment_distance(p, a.position(), b.position());
                if worst.as_ref().map_or(true, |(_, w)| gap < *w) {
                    worst = Some((c.name.clone(), gap));
                }
            }
        }
    }
    worst
}

/// Every phase, at rest and swung, keeps `s_estructura` from the structure.
fn check_swing_clearance(geometry: &Geometry, d: &ElectricalDistances) -> CalcResult<()> {
    match worst_swing_gap(geometry, d) {
        Some((phase, gap)) if gap < d.s_estructura - 1e-9 => Err(CalcError::geometry_infeasible(format!(
            "phase {} swings to {:.3} m of the structure, below s={:.3} m",
            phase, gap, d.s_estructura
        ))),
        _ => Ok(()),
    }
}

// ============================================================================
// Column, Pole Wind Point
// ============================================================================

/// Add `MEDIO` and `V` on the column, then chain the axis nodes by height.
fn finish_column(geometry: &mut Geometry, mut axis: Vec<String>, column_top: f64, frame: &Frame<'_>) {
    let g = &frame.config.geometria;
    let top_d = g.d_cima_estimado;
    let base_d = top_d + g.conicidad * column_top;
    let z_v = column_top * (base_d + 2.0 * top_d) / (3.0 * (base_d + top_d));
    geometry.dimensions.area_poste_m2 = column_top * (base_d + top_d) / 2.0;
    geometry.dimensions.d_base_estimado = base_d;

    geometry.insert(Node::new("MEDIO", 0.0, 0.0, column_top / 2.0, NodeType::Medio));
    geometry.insert(Node::new("V", 0.0, 0.0, z_v, NodeType::Viento));
    axis.push("MEDIO".into());
    axis.push("V".into());

    let mut chain: Vec<(f64, String)> = axis
        .into_iter()
        .filter_map(|name| geometry.nodes.get(&name).map(|n| (n.z, name)))
        .collect();
    chain.sort_by(|a, b| a.0.total_cmp(&b.0));
    for pair in chain.windows(2) {
        geometry.connect(&pair[0].1, &pair[1].1, ConnectionKind::Column);
    }
}

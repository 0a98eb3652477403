//! # Static Stress Analysis (AEE)
//!
//! Solves the structure as a linear elastic 3D frame for every DME
//! hypothesis and samples internal forces along each member.
//!
//! ## Members
//!
//! Every connection except insulator strings is a member. Sections are
//! solid circles: the column diameter defaults to the estimated pole base
//! diameter from DGE, crossarms and brackets have their own diameters.
//!
//! ## Sampling
//!
//! Members longer than the `percentil_largo` length percentile get
//! `n_largo` stations, the rest `n_corto`. Stations include both ends.
//!
//! ## Sign Convention
//!
//! Internal forces are those the far part of the member exerts on the near
//! part, in member axes: `N` positive in tension.

pub mod frame;

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calculations::dge::{ConnectionKind, Geometry};
use crate::calculations::dme::DmeResult;
use crate::config::positive;
use crate::errors::{CalcError, CalcResult};
use crate::loads::NodalLoads;
use crate::render::{Bounds, Canvas, Drawing};

pub use frame::{Frame, FrameSolution, Section};

// ============================================================================
// Parameters
// ============================================================================

/// Frame parameters (`AnalisisEstaticoEsfuerzos` group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AeeParams {
    /// Young's modulus (daN/m²)
    #[serde(rename = "E", default = "default_e")]
    pub e: f64,
    /// Shear modulus (daN/m²)
    #[serde(rename = "G", default = "default_g")]
    pub g: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diametro_columna: Option<f64>,
    #[serde(default = "default_d_cruceta")]
    pub diametro_cruceta: f64,
    #[serde(default = "default_d_mensula")]
    pub diametro_mensula: f64,
    #[serde(default = "default_n_corto")]
    pub n_corto: usize,
    #[serde(default = "default_n_largo")]
    pub n_largo: usize,
    #[serde(default = "default_percentil")]
    pub percentil_largo: f64,
}

fn default_e() -> f64 {
    3.0e9
}
fn default_g() -> f64 {
    1.25e9
}
fn default_d_cruceta() -> f64 {
    0.15
}
fn default_d_mensula() -> f64 {
    0.12
}
fn default_n_corto() -> usize {
    5
}
fn default_n_largo() -> usize {
    20
}
fn default_percentil() -> f64 {
    0.75
}

impl Default for AeeParams {
    fn default() -> Self {
        AeeParams {
            e: default_e(),
            g: default_g(),
            diametro_columna: None,
            diametro_cruceta: default_d_cruceta(),
            diametro_mensula: default_d_mensula(),
            n_corto: default_n_corto(),
            n_largo: default_n_largo(),
            percentil_largo: default_percentil(),
        }
    }
}

impl AeeParams {
    pub fn validate(&self) -> CalcResult<()> {
        positive("AnalisisEstaticoEsfuerzos.E", self.e)?;
        positive("AnalisisEstaticoEsfuerzos.G", self.g)?;
        if let Some(d) = self.diametro_columna {
            positive("AnalisisEstaticoEsfuerzos.diametro_columna", d)?;
        }
        positive("AnalisisEstaticoEsfuerzos.diametro_cruceta", self.diametro_cruceta)?;
        positive("AnalisisEstaticoEsfuerzos.diametro_mensula", self.diametro_mensula)?;
        if self.n_corto < 2 || self.n_largo < self.n_corto {
            return Err(CalcError::invalid_input(
                "AnalisisEstaticoEsfuerzos.n_corto",
                format!("{}/{}", self.n_corto, self.n_largo),
                "Need 2 <= n_corto <= n_largo stations",
            ));
        }
        if !(0.0..=1.0).contains(&self.percentil_largo) {
            return Err(CalcError::invalid_input(
                "AnalisisEstaticoEsfuerzos.percentil_largo",
                self.percentil_largo.to_string(),
                "Percentile must be in [0, 1]",
            ));
        }
        Ok(())
    }

    fn section_diameters(&self, geometry: &Geometry) -> CalcResult<[f64; 3]> {
        let column = self.diametro_columna.unwrap_or(geometry.dimensions.d_base_estimado);
        positive("AnalisisEstaticoEsfuerzos.diametro_columna", column)?;
        Ok([column, self.diametro_cruceta, self.diametro_mensula])
    }
}

// ============================================================================
// Results
// ============================================================================

/// Internal forces at one point of a member.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// Distance from the first node (m)
    pub s: f64,
    pub n: f64,
    pub qy: f64,
    pub qz: f64,
    /// Torsion
    pub mx: f64,
    pub my: f64,
    pub mz: f64,
    /// Bending `√(My² + Mz²)`
    pub mf: f64,
    /// Resultant `√(Mx² + My² + Mz²)`
    pub mr: f64,
}

impl Station {
    pub fn shear(&self) -> f64 {
        self.qy.hypot(self.qz)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberForces {
    pub a: String,
    pub b: String,
    pub tipo: ConnectionKind,
    pub longitud_m: f64,
    pub estaciones: Vec<Station>,
}

impl MemberForces {
    pub fn max_by(&self, f: impl Fn(&Station) -> f64) -> f64 {
        self.estaciones.iter().map(|s| f(s).abs()).fold(0.0, f64::max)
    }
}

/// Frame response to one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisForces {
    pub hipotesis: String,
    pub codigo: String,
    pub miembros: Vec<MemberForces>,
    /// `[ux, uy, uz, θx, θy, θz]` per node (m, rad)
    pub desplazamientos: BTreeMap<String, [f64; 6]>,
    /// `[Fx, Fy, Fz, Mx, My, Mz]` at `BASE`
    pub reaccion_base: [f64; 6],
    pub mf_max: f64,
    pub mr_max: f64,
}

/// AEE stage payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AeeResult {
    pub hipotesis: Vec<HypothesisForces>,
    pub mf_max: f64,
    pub mr_max: f64,
    pub hipotesis_critica: String,
    /// `a-b` of the member with the largest bending moment
    pub miembro_critico: String,
}

// ============================================================================
// Analysis
// ============================================================================

/// Fail when a frame node cannot reach `BASE` through members.
fn check_connected(frame: &Frame) -> CalcResult<()> {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for m in &frame.members {
        adjacency.entry(&m.a).or_default().push(&m.b);
        adjacency.entry(&m.b).or_default().push(&m.a);
    }
    let mut seen = vec!["BASE"];
    let mut queue = VecDeque::from(["BASE"]);
    while let Some(n) = queue.pop_front() {
        for &next in adjacency.get(n).into_iter().flatten() {
            if !seen.contains(&next) {
                seen.push(next);
                queue.push_back(next);
            }
        }
    }
    match frame.index.keys().find(|name| !seen.contains(&name.as_str())) {
        Some(orphan) => Err(CalcError::singular_stiffness(format!(
            "node {} is not connected to BASE",
            orphan
        ))),
        None => Ok(()),
    }
}

/// Length above which a member counts as long.
pub fn long_member_threshold(lengths: &[f64], percentile: f64) -> f64 {
    if lengths.is_empty() {
        return 0.0;
    }
    let mut sorted = lengths.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = percentile * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Assemble the frame of `geometry`.
pub fn build_frame(params: &AeeParams, geometry: &Geometry) -> CalcResult<Frame> {
    let [d_col, d_cross, d_bracket] = params.section_diameters(geometry)?;
    let frame = Frame::assemble(geometry, params.e, params.g, |kind| match kind {
        ConnectionKind::Cross => Section::circular(d_cross),
        ConnectionKind::Bracket => Section::circular(d_bracket),
        _ => Section::circular(d_col),
    })?;
    check_connected(&frame)?;
    Ok(frame)
}

/// Solve one load set and sample every member.
pub fn analyse(
    frame: &Frame,
    params: &AeeParams,
    nombre: &str,
    codigo: &str,
    loads: &NodalLoads,
) -> CalcResult<HypothesisForces> {
    let solution = frame.solve(loads)?;
    let lengths: Vec<f64> = frame.members.iter().map(|m| m.length).collect();
    let threshold = long_member_threshold(&lengths, params.percentil_largo);

    let mut miembros = Vec::with_capacity(frame.members.len());
    for m in &frame.members {
        let f = m.end_forces(&solution.d);
        let n_points = if m.length > threshold { params.n_largo } else { params.n_corto };
        let estaciones = (0..n_points)
            .map(|k| {
                let s = m.length * k as f64 / (n_points - 1) as f64;
                let my = -f[4] - s * f[2];
                let mz = -f[5] + s * f[1];
                let mx = -f[3];
                Station {
                    s,
                    n: -f[0],
                    qy: -f[1],
                    qz: -f[2],
                    mx,
                    my,
                    mz,
                    mf: my.hypot(mz),
                    mr: (mx * mx + my * my + mz * mz).sqrt(),
                }
            })
            .collect();
        miembros.push(MemberForces {
            a: m.a.clone(),
            b: m.b.clone(),
            tipo: m.kind,
            longitud_m: m.length,
            estaciones,
        });
    }

    let desplazamientos = frame
        .index
        .keys()
        .filter_map(|name| frame.displacement(&solution, name).map(|d| (name.clone(), d)))
        .collect();
    let mf_max = miembros.iter().map(|m| m.max_by(|s| s.mf)).fold(0.0, f64::max);
    let mr_max = miembros.iter().map(|m| m.max_by(|s| s.mr)).fold(0.0, f64::max);
    Ok(HypothesisForces {
        hipotesis: nombre.to_string(),
        codigo: codigo.to_string(),
        miembros,
        desplazamientos,
        reaccion_base: solution.base_reaction,
        mf_max,
        mr_max,
    })
}

/// Run AEE for every DME hypothesis.
pub fn calculate(params: &AeeParams, geometry: &Geometry, dme: &DmeResult) -> CalcResult<(AeeResult, Vec<Drawing>)> {
    let frame = build_frame(params, geometry)?;
    debug!(nodes = frame.index.len(), members = frame.members.len(), "frame assembled");

    let mut hipotesis = Vec::with_capacity(dme.hipotesis.len());
    let mut drawings = Vec::new();
    for h in &dme.hipotesis {
        let forces = analyse(&frame, params, &h.nombre, &h.codigo, &h.cargas)?;
        for kind in DiagramKind::ALL {
            drawings.push(render_diagram(geometry, &forces, kind)?);
        }
        hipotesis.push(forces);
    }

    let mut critical: Option<(f64, String, String)> = None;
    for h in &hipotesis {
        for m in &h.miembros {
            let mf = m.max_by(|s| s.mf);
            if critical.as_ref().map_or(true, |(best, _, _)| mf > *best) {
                critical = Some((mf, h.hipotesis.clone(), format!("{}-{}", m.a, m.b)));
            }
        }
    }
    let (mf_max, hipotesis_critica, miembro_critico) =
        critical.ok_or_else(|| CalcError::missing_reference("hypotheses", "AEE"))?;
    let mr_max = hipotesis.iter().map(|h| h.mr_max).fold(0.0, f64::max);
    info!(mf_max, member = %miembro_critico, hypothesis = %hipotesis_critica, "frame analysed");

    Ok((
        AeeResult {
            hipotesis,
            mf_max,
            mr_max,
            hipotesis_critica,
            miembro_critico,
        },
        drawings,
    ))
}

// ============================================================================
// Diagrams
// ============================================================================

/// Internal-force diagram family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagramKind {
    /// Bending, shear, axial and torsion together
    Mqnt,
    /// Resultant moment
    Mrt,
    /// Bending moment
    Mfe,
}

type Series = (&'static str, &'static str, fn(&Station) -> f64);

impl DiagramKind {
    pub const ALL: [DiagramKind; 3] = [DiagramKind::Mqnt, DiagramKind::Mrt, DiagramKind::Mfe];

    pub fn code(&self) -> &'static str {
        match self {
            DiagramKind::Mqnt => "MQNT",
            DiagramKind::Mrt => "MRT",
            DiagramKind::Mfe => "MFE",
        }
    }

    fn series(&self) -> Vec<Series> {
        match self {
            DiagramKind::Mqnt => vec![
                ("M", "#b02a1f", bending as fn(&Station) -> f64),
                ("Q", "#1f4fb0", Station::shear as fn(&Station) -> f64),
                ("N", "#1f6f3f", axial as fn(&Station) -> f64),
                ("T", "#8a5a00", torsion as fn(&Station) -> f64),
            ],
            DiagramKind::Mrt => vec![("Mr", "#b02a1f", resultant as fn(&Station) -> f64)],
            DiagramKind::Mfe => vec![("Mf", "#b02a1f", bending as fn(&Station) -> f64)],
        }
    }
}

fn bending(s: &Station) -> f64 {
    s.mf
}
fn resultant(s: &Station) -> f64 {
    s.mr
}
fn axial(s: &Station) -> f64 {
    s.n
}
fn torsion(s: &Station) -> f64 {
    s.mx
}

/// Front view with each series drawn normal to its member.
pub fn render_diagram(geometry: &Geometry, forces: &HypothesisForces, kind: DiagramKind) -> CalcResult<Drawing> {
    let bounds = Bounds::around(geometry.nodes.values().map(|n| [n.x, n.z]), 2.0);
    let mut canvas = Canvas::new(640.0, 800.0, bounds);
    canvas.title(&format!("{} {}", kind.code(), forces.hipotesis));

    let series = kind.series();
    let peak = forces
        .miembros
        .iter()
        .flat_map(|m| series.iter().map(move |(_, _, f)| m.max_by(*f)))
        .fold(0.0, f64::max);
    let height = (bounds.z_max - bounds.z_min).max(1.0);
    let scale = if peak > 0.0 { 0.08 * height / peak } else { 0.0 };

    for m in &forces.miembros {
        let (Some(a), Some(b)) = (geometry.nodes.get(&m.a), geometry.nodes.get(&m.b)) else {
            continue;
        };
        canvas.line([a.x, a.z], [b.x, b.z], "#333333", 2.0);
        let (dx, dz) = (b.x - a.x, b.z - a.z);
        let len = dx.hypot(dz);
        if len < 1e-9 {
            continue;
        }
        let (nx, nz) = (-dz / len, dx / len);
        for (_, color, f) in &series {
            let points: Vec<[f64; 2]> = m
                .estaciones
                .iter()
                .map(|st| {
                    let t = st.s / m.longitud_m;
                    let v = f(st) * scale;
                    [a.x + dx * t + nx * v, a.z + dz * t + nz * v]
                })
                .collect();
            canvas.polyline(&points, color, 1.5);
        }
    }
    for (i, (label, color, _)) in series.iter().enumerate() {
        canvas.colored_text([bounds.x_min, bounds.z_max], 4.0 + 40.0 * i as f64, 14.0, label, 11.0, color);
    }
    canvas.finish(format!("{}.{}", forces.codigo, kind.code()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculations::dge::{Dimensions, Node, NodeType};
    use crate::calculations::dme::tests::sample_dme;
    use crate::errors::ErrorKind;
    use crate::loads::{LoadComponent, LoadOrigin};
    use approx::assert_relative_eq;

    fn cantilever(height: f64) -> Geometry {
        let mut g = Geometry {
            nodes: BTreeMap::new(),
            connections: Vec::new(),
            dimensions: Dimensions::default(),
            shielding: None,
        };
        g.insert(Node::new("BASE", 0.0, 0.0, 0.0, NodeType::Base));
        g.insert(Node::new("TOP", 0.0, 0.0, height, NodeType::Top));
        g.connect("BASE", "TOP", ConnectionKind::Column);
        g
    }

    fn params() -> AeeParams {
        AeeParams {
            diametro_columna: Some(0.3),
            ..AeeParams::default()
        }
    }

    #[test]
    fn test_cantilever_tip_load() {
        let g = cantilever(10.0);
        let p = params();
        let frame = build_frame(&p, &g).unwrap();
        let mut loads = NodalLoads::new();
        loads.add("TOP", LoadComponent::force(LoadOrigin::Wind, [100.0, 0.0, 0.0]));
        let r = analyse(&frame, &p, "A1", "A1", &loads).unwrap();

        let column = &r.miembros[0];
        assert_eq!(column.estaciones.len(), 5);
        assert_relative_eq!(column.estaciones[0].mf, 1000.0, epsilon = 1e-6);
        assert_relative_eq!(column.estaciones[4].mf, 0.0, epsilon = 1e-6);
        assert_relative_eq!(column.estaciones[2].mf, 500.0, epsilon = 1e-6);
        assert_relative_eq!(column.estaciones[0].shear(), 100.0, epsilon = 1e-6);
        assert_relative_eq!(column.estaciones[0].n, 0.0, epsilon = 1e-6);

        let i = Section::circular(0.3).iz;
        let expected = 100.0 * 1000.0 / (3.0 * p.e * i);
        assert_relative_eq!(r.desplazamientos["TOP"][0], expected, max_relative = 1e-9);
        assert_relative_eq!(r.reaccion_base[0], -100.0, epsilon = 1e-6);
        assert_relative_eq!(r.reaccion_base[4].abs(), 1000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_axial_load_is_compression() {
        let g = cantilever(6.0);
        let p = params();
        let frame = build_frame(&p, &g).unwrap();
        let mut loads = NodalLoads::new();
        loads.add("TOP", LoadComponent::force(LoadOrigin::Weight, [0.0, 0.0, -500.0]));
        let r = analyse(&frame, &p, "A0", "A0", &loads).unwrap();
        assert!(r.miembros[0].estaciones.iter().all(|s| (s.n + 500.0).abs() < 1e-6));
        assert_relative_eq!(r.mf_max, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_detached_member_is_singular() {
        let mut g = cantilever(6.0);
        g.insert(Node::new("X1", 2.0, 0.0, 3.0, NodeType::Cross));
        g.insert(Node::new("X2", 3.0, 0.0, 3.0, NodeType::Cross));
        g.connect("X1", "X2", ConnectionKind::Cross);
        let err = build_frame(&params(), &g).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SingularStiffness);
    }

    #[test]
    fn test_load_off_frame_is_singular() {
        let mut g = cantilever(6.0);
        g.insert(Node::new("C1_L", -1.0, 0.0, 5.0, NodeType::Conductor));
        g.connect("TOP", "C1_L", ConnectionKind::Chain);
        let p = params();
        let frame = build_frame(&p, &g).unwrap();
        let mut loads = NodalLoads::new();
        loads.add("C1_L", LoadComponent::force(LoadOrigin::Weight, [0.0, 0.0, -10.0]));
        let err = analyse(&frame, &p, "A0", "A0", &loads).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SingularStiffness);
    }

    #[test]
    fn test_threshold_percentile() {
        assert_relative_eq!(long_member_threshold(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.75), 4.0);
        assert_relative_eq!(long_member_threshold(&[1.0, 2.0], 0.5), 1.5);
    }

    #[test]
    fn test_sample_reactions_match_dme() {
        let (config, _, geometry, dme) = sample_dme();
        let (aee, drawings) = calculate(&config.aee, &geometry, &dme).unwrap();
        assert_eq!(aee.hipotesis.len(), dme.hipotesis.len());
        assert_eq!(drawings.len(), 3 * dme.hipotesis.len());
        for (forces, h) in aee.hipotesis.iter().zip(&dme.hipotesis) {
            let r = &h.reaccion;
            let expected = [r.fx, r.fy, r.fz, r.mx, r.my, r.mz];
            for (got, want) in forces.reaccion_base.iter().zip(expected) {
                assert_relative_eq!(*got, want, epsilon = 1e-6, max_relative = 1e-6);
            }
        }
        assert!(aee.mf_max > 0.0);
        assert!(drawings.iter().any(|d| d.suffix == "A1.MFE"));
    }
}

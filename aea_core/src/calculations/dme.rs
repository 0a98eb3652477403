//! # Mechanical Envelope (DME)
//!
//! Applies every load hypothesis of the structure's typology to the cable
//! and pole nodes, then reduces the nodal loads to base reactions and an
//! equivalent pull at the apex.
//!
//! ## Tension Patterns
//!
//! With `T` the cable tension of the hypothesis state, `α` the line
//! deviation and `red` the reduction coefficient:
//!
//! ```text
//! bilateral:   T_trans = 2T·sin(α/2)·(1 − red/2)   T_long = 2T·cos(α/2)·(red/2)
//! unilateral:  T_trans = T·sin(α/2)                T_long = T·cos(α/2)
//! ```
//!
//! `dos-unilaterales` loads the distinguished nodes unilaterally and the
//! rest bilaterally; for Terminal structures it is inverted: the
//! distinguished phase is eliminated and every other node is unilateral.
//! `doble-terna-a-simple` loads `_L` nodes unilaterally.
//!
//! ## Top Pull
//!
//! ```text
//! TiroX = My / h_eff     TiroY = −Mx / h_eff     h_eff = z_apex − z_base
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calculations::cmc::{CableRole, CableSolution, CmcResult};
use crate::calculations::dge::{Geometry, Node, NodeType};
use crate::catalog::{CableCatalog, HypothesisCatalog, LoadHypothesis, TensionPattern};
use crate::config::{StructureConfig, StructureType};
use crate::errors::{CalcError, CalcResult};
use crate::loads::{LoadComponent, LoadOrigin, NodalLoads, WindCode, WindTable, WindTarget};

/// Conductor reduction forced on A5 with long strings
pub const A5_LONG_STRING_REDUCTION: f64 = 0.15;

/// Strings longer than this trigger the A5 rule (m)
pub const A5_LONG_STRING_LK: f64 = 2.5;

// ============================================================================
// Types
// ============================================================================

/// How a loaded node takes part in a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Bilateral,
    Unilateral,
    /// Phase removed; carries no load
    Eliminated,
}

impl NodeRole {
    /// Share of span weight and wind carried by the node
    pub fn span_factor(&self) -> f64 {
        match self {
            NodeRole::Bilateral => 1.0,
            NodeRole::Unilateral => 0.5,
            NodeRole::Eliminated => 0.0,
        }
    }
}

/// Base reactions and equivalent top pull of one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRow {
    pub hipotesis: String,
    /// Reactions at `BASE`, opposite to the applied resultant
    pub fx: f64,
    pub fy: f64,
    pub fz: f64,
    pub mx: f64,
    pub my: f64,
    pub mz: f64,
    #[serde(rename = "TiroX")]
    pub tiro_x: f64,
    #[serde(rename = "TiroY")]
    pub tiro_y: f64,
    #[serde(rename = "Tiro")]
    pub tiro: f64,
    pub angulo_deg: f64,
    pub h_eff: f64,
}

/// Loads and reactions of one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HypothesisLoads {
    /// `HIP_<Typology>_<code>_<short description>`
    pub nombre: String,
    pub codigo: String,
    pub descripcion: String,
    pub roles: BTreeMap<String, NodeRole>,
    pub cargas: NodalLoads,
    pub reaccion: ReactionRow,
}

/// DME stage payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmeResult {
    pub tipologia: StructureType,
    pub apex: String,
    pub h_eff: f64,
    pub hipotesis: Vec<HypothesisLoads>,
    /// Name of the hypothesis with the largest `Tiro`
    pub dominante: String,
    /// Hypotheses where the A5 long-string rule was applied
    pub a5_aplicado: Vec<String>,
    pub viento: WindTable,
}

impl DmeResult {
    pub fn hypothesis(&self, nombre_or_code: &str) -> CalcResult<&HypothesisLoads> {
        self.hipotesis
            .iter()
            .find(|h| h.nombre == nombre_or_code || h.codigo == nombre_or_code)
            .ok_or_else(|| CalcError::missing_reference("hypothesis", nombre_or_code))
    }

    pub fn dominant(&self) -> CalcResult<&HypothesisLoads> {
        self.hypothesis(&self.dominante)
    }

    pub fn reactions(&self) -> impl Iterator<Item = &ReactionRow> {
        self.hipotesis.iter().map(|h| &h.reaccion)
    }
}

// ============================================================================
// Catalog Resolution
// ============================================================================

/// Hypothesis catalog for a structure: inline override, then the named
/// file in `dir`, then the embedded plantilla.
pub fn hypothesis_catalog(config: &StructureConfig, dir: Option<&Path>) -> CalcResult<HypothesisCatalog> {
    if let Some(inline) = &config.hipotesis_personalizadas {
        return Ok(inline.clone());
    }
    match (&config.hipotesis_activa, dir) {
        (Some(name), Some(dir)) => HypothesisCatalog::from_active(dir, name),
        (Some(name), None) => Err(CalcError::missing_reference("hypothesis catalog", name.clone())),
        (None, _) => HypothesisCatalog::embedded(),
    }
}

// ============================================================================
// Calculation
// ============================================================================

struct Context<'a> {
    config: &'a StructureConfig,
    cmc: &'a CmcResult,
    geometry: &'a Geometry,
    cables: &'a CableCatalog,
    wind: WindTable,
}

/// Run DME over every hypothesis of the structure's typology.
pub fn calculate(
    config: &StructureConfig,
    cmc: &CmcResult,
    geometry: &Geometry,
    hypotheses: &HypothesisCatalog,
    cables: &CableCatalog,
) -> CalcResult<DmeResult> {
    let set = hypotheses.for_typology(config.tipo_estructura)?;
    let base = geometry.base()?;
    let apex = geometry.apex()?;
    let h_eff = apex.z - base.z;
    if h_eff <= 0.0 {
        return Err(CalcError::geometry_infeasible(format!(
            "apex {} is not above BASE",
            apex.name
        )));
    }
    let ctx = Context {
        config,
        cmc,
        geometry,
        cables,
        wind: WindTable::build(config, cmc, geometry)?,
    };

    let mut hipotesis = Vec::with_capacity(set.len());
    let mut a5_aplicado = Vec::new();
    for (code, hyp) in set {
        let nombre = hyp.display_name(config.tipo_estructura, code);
        let a5 = code == "A5" && config.reducir_a5_cadena_larga && config.lk > A5_LONG_STRING_LK;
        if a5 {
            debug!(hypothesis = %nombre, lk = config.lk, "A5 long-string reduction applied");
            a5_aplicado.push(nombre.clone());
        }
        let roles = node_roles(config, geometry, hyp);
        let cargas = apply_hypothesis(&ctx, hyp, &roles, a5)?;
        let reaccion = reduce(geometry, &cargas, base.position(), h_eff, &nombre)?;
        hipotesis.push(HypothesisLoads {
            nombre,
            codigo: code.clone(),
            descripcion: hyp.descripcion.clone(),
            roles,
            cargas,
            reaccion,
        });
    }

    let dominante = hipotesis
        .iter()
        .fold(None::<&HypothesisLoads>, |best, h| match best {
            Some(b) if b.reaccion.tiro >= h.reaccion.tiro => Some(b),
            _ => Some(h),
        })
        .map(|h| h.nombre.clone())
        .ok_or_else(|| CalcError::missing_reference("hypotheses for typology", config.tipo_estructura.display_name()))?;

    info!(hypotheses = hipotesis.len(), dominant = %dominante, "mechanical envelope computed");
    Ok(DmeResult {
        tipologia: config.tipo_estructura,
        apex: apex.name.clone(),
        h_eff,
        hipotesis,
        dominante,
        a5_aplicado,
        viento: ctx.wind,
    })
}

/// Nodes that carry cable loads: conductors and guard wires.
fn loaded_nodes(geometry: &Geometry) -> impl Iterator<Item = &Node> {
    geometry
        .nodes
        .values()
        .filter(|n| matches!(n.tipo, NodeType::Conductor | NodeType::Guard))
}

/// Conductor taken as broken when a hypothesis names none: outermost,
/// then lowest, then by name.
pub fn default_distinguished_conductor(geometry: &Geometry) -> Option<&Node> {
    geometry.conductor_nodes().min_by(|a, b| {
        let dx = b.x.abs() - a.x.abs();
        if dx.abs() > 1e-9 {
            return dx.total_cmp(&0.0);
        }
        a.z.total_cmp(&b.z).then_with(|| a.name.cmp(&b.name))
    })
}

fn node_roles(config: &StructureConfig, geometry: &Geometry, hyp: &LoadHypothesis) -> BTreeMap<String, NodeRole> {
    let Some(tiro) = &hyp.tiro else {
        return loaded_nodes(geometry).map(|n| (n.name.clone(), NodeRole::Bilateral)).collect();
    };
    let distinguished: Vec<String> = if tiro.nodos_distinguidos.is_empty() {
        default_distinguished_conductor(geometry)
            .map(|n| n.name.clone())
            .into_iter()
            .chain(geometry.nodes.get("HG1").map(|n| n.name.clone()))
            .collect()
    } else {
        tiro.nodos_distinguidos
            .iter()
            .filter(|n| geometry.nodes.contains_key(n.as_str()))
            .cloned()
            .collect()
    };
    let terminal = config.tipo_estructura == StructureType::Terminal;

    loaded_nodes(geometry)
        .map(|n| {
            let is_distinguished = distinguished.contains(&n.name);
            let role = match tiro.patron {
                TensionPattern::Bilateral => NodeRole::Bilateral,
                TensionPattern::Unilateral => NodeRole::Unilateral,
                TensionPattern::DosUnilaterales if terminal => {
                    if is_distinguished && n.tipo == NodeType::Conductor {
                        NodeRole::Eliminated
                    } else {
                        NodeRole::Unilateral
                    }
                }
                TensionPattern::DosUnilaterales => {
                    if is_distinguished {
                        NodeRole::Unilateral
                    } else {
                        NodeRole::Bilateral
                    }
                }
                TensionPattern::DobleTernaASimple => {
                    if n.side() == Some("L") {
                        NodeRole::Unilateral
                    } else {
                        NodeRole::Bilateral
                    }
                }
            };
            (n.name.clone(), role)
        })
        .collect()
}

fn cable_role(node: &Node) -> CableRole {
    match node.tipo {
        NodeType::Guard => {
            let index = node
                .name
                .strip_prefix("HG")
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(1);
            CableRole::guard(index)
        }
        _ => CableRole::Conductor,
    }
}

fn wind_target(role: CableRole) -> WindTarget {
    match role {
        CableRole::Conductor => WindTarget::Conductor,
        CableRole::Guardia1 => WindTarget::Guard(1),
        CableRole::Guardia2 => WindTarget::Guard(2),
    }
}

fn scaled(v: [f64; 3], k: f64) -> [f64; 3] {
    [v[0] * k, v[1] * k, v[2] * k]
}

/// Vertical load per metre for the hypothesis: bare cable or iced.
fn weight_per_meter(ctx: &Context<'_>, solution: &CableSolution, ice: bool) -> CalcResult<f64> {
    if ice {
        let state = ctx.config.estados_climaticos.find_max_ice()?;
        Ok(solution.row(&state.id)?.w_used.vertical)
    } else {
        Ok(ctx.cables.get(&solution.cable)?.peso_dan_m)
    }
}

fn apply_hypothesis(
    ctx: &Context<'_>,
    hyp: &LoadHypothesis,
    roles: &BTreeMap<String, NodeRole>,
    a5: bool,
) -> CalcResult<NodalLoads> {
    let config = ctx.config;
    let span = config.l_vano;
    let half_alpha = (config.alpha / 2.0).to_radians();
    let mut loads = NodalLoads::new();

    for node in loaded_nodes(ctx.geometry) {
        let role = roles.get(&node.name).copied().unwrap_or(NodeRole::Bilateral);
        if role == NodeRole::Eliminated {
            continue;
        }
        let f = role.span_factor();
        let cable = cable_role(node);
        let solution = ctx.cmc.cable(cable)?;
        let is_conductor = cable == CableRole::Conductor;

        // Weight
        let w_v = weight_per_meter(ctx, solution, hyp.peso.hielo)?;
        let mut fz = -(w_v * span * hyp.peso.factor * f);
        if is_conductor {
            fz -= config.geometria.pcadena * hyp.peso.factor;
        }
        let mut place = |component: LoadComponent| loads.add(&node.name, component.oriented(node.rotacion_z));
        place(LoadComponent::force(LoadOrigin::Weight, [0.0, 0.0, fz]));

        // Wind
        if let Some(ws) = &hyp.viento {
            let on_cable = ctx.wind.get(WindCode::new(wind_target(cable), ws.estado, ws.direccion))?;
            place(LoadComponent::force(LoadOrigin::Wind, scaled(on_cable, ws.factor * f)));
            if is_conductor {
                let on_chain = ctx.wind.get(WindCode::new(WindTarget::Chain, ws.estado, ws.direccion))?;
                place(LoadComponent::force(LoadOrigin::Wind, scaled(on_chain, ws.factor)));
            }
        }

        // Tension
        if let Some(tiro) = &hyp.tiro {
            let state = tiro.estado.resolve(&config.estados_climaticos, Some(&solution.rows))?;
            let h = solution.row(&state.id)?.h_dan;
            let (factor, red) = if is_conductor {
                let red = if a5 { A5_LONG_STRING_REDUCTION } else { tiro.reduccion_cond };
                (tiro.factor_cond, red)
            } else {
                (tiro.factor_guardia, tiro.reduccion_guardia)
            };
            let t = h * factor;
            let (trans, long) = match role {
                NodeRole::Bilateral => (
                    2.0 * t * half_alpha.sin() * (1.0 - red / 2.0),
                    2.0 * t * half_alpha.cos() * (red / 2.0),
                ),
                NodeRole::Unilateral => (t * half_alpha.sin(), t * half_alpha.cos()),
                NodeRole::Eliminated => (0.0, 0.0),
            };
            place(LoadComponent::force(LoadOrigin::Tension, [trans, long, 0.0]));
        }
    }

    // Wind on the pole
    if let Some(ws) = &hyp.viento {
        if ctx.geometry.nodes.contains_key("V") {
            let on_pole = ctx.wind.get(WindCode::new(WindTarget::Structure, ws.estado, ws.direccion))?;
            loads.add("V", LoadComponent::force(LoadOrigin::Wind, scaled(on_pole, ws.factor)));
        }
    }

    // Point overload on the top conductor
    if let Some(catalog_value) = hyp.sobrecarga {
        let value = config.sobrecarga.unwrap_or(catalog_value);
        let live = |n: &&Node| roles.get(&n.name) != Some(&NodeRole::Eliminated);
        let target = ctx
            .geometry
            .nodes
            .get("C1_L")
            .filter(live)
            .or_else(|| {
                ctx.geometry
                    .conductor_nodes()
                    .filter(live)
                    .fold(None::<&Node>, |best, n| match best {
                        Some(b) if b.z >= n.z => Some(b),
                        _ => Some(n),
                    })
            });
        if let Some(node) = target {
            loads.add(&node.name, LoadComponent::force(LoadOrigin::Weight, [0.0, 0.0, -value]));
        }
    }
    Ok(loads)
}

fn reduce(geometry: &Geometry, loads: &NodalLoads, base: [f64; 3], h_eff: f64, nombre: &str) -> CalcResult<ReactionRow> {
    let r = loads.resultant_about(geometry, base)?;
    let [fx, fy, fz] = r.force;
    let [mx, my, mz] = r.moment;
    let tiro_x = my / h_eff;
    let tiro_y = -mx / h_eff;
    Ok(ReactionRow {
        hipotesis: nombre.to_string(),
        fx: -fx,
        fy: -fy,
        fz: -fz,
        mx: -mx,
        my: -my,
        mz: -mz,
        tiro_x,
        tiro_y,
        tiro: tiro_x.hypot(tiro_y),
        angulo_deg: tiro_y.atan2(tiro_x).to_degrees(),
        h_eff,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calculations::dge;
    use crate::calculations::dge::tests::sample_geometry;
    use crate::catalog::default_catalog;
    use crate::config::tests::sample;
    use approx::assert_relative_eq;

    pub(crate) fn run(config: &StructureConfig) -> (CmcResult, Geometry, DmeResult) {
        let cmc = crate::calculations::cmc::calculate(config, default_catalog()).unwrap();
        let geometry = dge::calculate(config, &cmc).unwrap();
        let catalog = HypothesisCatalog::embedded().unwrap();
        let dme = calculate(config, &cmc, &geometry, &catalog, default_catalog()).unwrap();
        (cmc, geometry, dme)
    }

    pub(crate) fn sample_dme() -> (StructureConfig, CmcResult, Geometry, DmeResult) {
        let config = sample();
        let (cmc, geometry, dme) = run(&config);
        (config, cmc, geometry, dme)
    }

    #[test]
    fn test_every_hypothesis_balances() {
        let (_, _, geometry, dme) = sample_dme();
        assert_eq!(dme.hipotesis.len(), 10);
        for h in &dme.hipotesis {
            let applied = h.cargas.total_force(None);
            assert_relative_eq!(h.reaccion.fx, -applied[0], epsilon = 1e-9);
            assert_relative_eq!(h.reaccion.fy, -applied[1], epsilon = 1e-9);
            assert_relative_eq!(h.reaccion.fz, -applied[2], epsilon = 1e-9);
            assert!(h.cargas.nodes.keys().all(|n| geometry.nodes.contains_key(n)));
        }
    }

    #[test]
    fn test_straight_line_bilateral_has_no_tension_pull() {
        let (_, _, _, dme) = sample_dme();
        let a1 = dme.hypothesis("A1").unwrap();
        assert!(a1.nombre.starts_with("HIP_Suspensión_Recta_A1_"));
        let tension = a1.cargas.total_force(Some(LoadOrigin::Tension));
        assert_eq!(tension, [0.0, 0.0, 0.0]);
        // Transversal wind gives a pure x pull
        assert!(a1.reaccion.tiro_x > 0.0);
        assert_relative_eq!(a1.reaccion.tiro_y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_no_wind_no_wind_components() {
        let (_, _, _, dme) = sample_dme();
        for code in ["A0", "A5", "B1", "C1"] {
            let h = dme.hypothesis(code).unwrap();
            assert_eq!(h.cargas.total_force(Some(LoadOrigin::Wind)), [0.0; 3]);
        }
    }

    #[test]
    fn test_dominant_has_max_pull() {
        let (_, _, _, dme) = sample_dme();
        let max = dme.reactions().map(|r| r.tiro).fold(0.0, f64::max);
        assert_eq!(dme.dominant().unwrap().reaccion.tiro, max);
    }

    #[test]
    fn test_weight_factor_scales_weight() {
        let (_, _, _, dme) = sample_dme();
        let a0 = dme.hypothesis("A0").unwrap().cargas.total_force(Some(LoadOrigin::Weight));
        let b1 = dme.hypothesis("B1").unwrap().cargas.total_force(Some(LoadOrigin::Weight));
        assert_relative_eq!(b1[2], 2.5 * a0[2], epsilon = 1e-9);
    }

    #[test]
    fn test_overload_on_top_conductor() {
        let (_, _, _, dme) = sample_dme();
        let a0 = dme.hypothesis("A0").unwrap();
        let b2 = dme.hypothesis("B2").unwrap();
        let delta = b2.cargas.node_force("C1_L", Some(LoadOrigin::Weight))[2]
            - a0.cargas.node_force("C1_L", Some(LoadOrigin::Weight))[2];
        assert_relative_eq!(delta, -100.0, epsilon = 1e-9);

        let mut config = sample();
        config.sobrecarga = Some(150.0);
        let (_, _, dme) = run(&config);
        let b2 = dme.hypothesis("B2").unwrap();
        let a0 = dme.hypothesis("A0").unwrap();
        let delta = b2.cargas.node_force("C1_L", None)[2] - a0.cargas.node_force("C1_L", None)[2];
        assert_relative_eq!(delta, -150.0, epsilon = 1e-9);
    }

    #[test]
    fn test_a5_threshold() {
        let mut config = sample();
        config.lk = 2.5;
        let (_, _, dme) = run(&config);
        assert!(dme.a5_aplicado.is_empty());

        config.lk = 2.51;
        let (cmc, _, dme) = run(&config);
        assert_eq!(dme.a5_aplicado.len(), 1);
        let a5 = dme.hypothesis("A5").unwrap();
        assert_eq!(dme.a5_aplicado[0], a5.nombre);
        let h = cmc.conductor.max_tension_row().unwrap().h_dan;
        let long = a5.cargas.node_force("C1_L", Some(LoadOrigin::Tension))[1];
        assert_relative_eq!(long, 2.0 * h * (0.15 / 2.0), max_relative = 1e-12);
    }

    #[test]
    fn test_a5_policy_off() {
        let mut config = sample();
        config.lk = 3.0;
        config.reducir_a5_cadena_larga = false;
        let (_, _, dme) = run(&config);
        assert!(dme.a5_aplicado.is_empty());
    }

    #[test]
    fn test_rotation_rotates_tension() {
        let mut config = sample();
        config.alpha = 20.0;
        let (_, _, plain) = run(&config);
        let mut edit = dge::NodeEdit::new("C2_R");
        edit.rotacion_z = Some(30.0);
        config.nodos_editados.push(edit);
        let (_, _, rotated) = run(&config);

        let before = plain.hypothesis("A0").unwrap().cargas.node_force("C2_R", Some(LoadOrigin::Tension));
        let after = rotated.hypothesis("A0").unwrap().cargas.node_force("C2_R", Some(LoadOrigin::Tension));
        let (s, c) = 30f64.to_radians().sin_cos();
        assert_relative_eq!(after[0], before[0] * c - before[1] * s, epsilon = 1e-9);
        assert_relative_eq!(after[1], before[0] * s + before[1] * c, epsilon = 1e-9);
        // Weight and wind keep their global direction
        for origin in [LoadOrigin::Weight, LoadOrigin::Wind] {
            for h in ["A0", "A2"] {
                assert_eq!(
                    plain.hypothesis(h).unwrap().cargas.node_force("C2_R", Some(origin)),
                    rotated.hypothesis(h).unwrap().cargas.node_force("C2_R", Some(origin)),
                );
            }
        }
    }

    #[test]
    fn test_default_distinguished_conductor() {
        let (_, _, geometry) = sample_geometry();
        assert_eq!(default_distinguished_conductor(&geometry).unwrap().name, "C3_L");
    }

    #[test]
    fn test_missing_cmc_state() {
        let config = sample();
        let (mut cmc, geometry, _) = run(&config);
        cmc.conductor.rows.retain(|r| r.state_id != "V");
        let catalog = HypothesisCatalog::embedded().unwrap();
        let err = calculate(&config, &cmc, &geometry, &catalog, default_catalog()).unwrap_err();
        assert_eq!(err.error_code(), "MISSING_CMC_STATE");
    }

    #[test]
    fn test_no_guard_skips_shield_loading() {
        let mut config = sample();
        config.cant_hg = 0;
        config.cable_guardia_id = None;
        let (_, _, dme) = run(&config);
        for h in &dme.hipotesis {
            assert!(h.cargas.nodes.keys().all(|n| !n.starts_with("HG")));
        }
        assert_eq!(dme.apex, "TOP");
    }

    #[test]
    fn test_active_catalog_needs_directory() {
        let mut config = sample();
        config.hipotesis_activa = Some("linea_sur".into());
        let err = hypothesis_catalog(&config, None).unwrap_err();
        assert_eq!(err.error_code(), "MISSING_REFERENCE");
    }
}

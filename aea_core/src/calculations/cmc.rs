//! # Cable Mechanics (CMC)
//!
//! Solves the change-of-state equation of each cable across every climatic
//! state of the structure.
//!
//! ## Change of State
//!
//! Between a reference state 1 (`H₁`, `w₁`, `T₁`) and a target state 2:
//!
//! ```text
//! H₂³ + H₂²·[α·E·A·(T₂−T₁) + (w₁·L)²·E·A/(24·H₁²) − H₁] − (w₂·L)²·E·A/24 = 0
//! ```
//!
//! Dividing by `H₂²` gives the residual `r(H) = H + B − C/H²`, strictly
//! increasing in `H`, so there is exactly one positive root. It is bracketed
//! by a coarse sweep (`SALTO_PORCENTUAL·H₁`), narrowed by a fine sweep
//! (`PASO_AFINADO·H₁`) and polished by bisection.
//!
//! ## Anchor
//!
//! Every restricted state is tried as anchor at `H = pct·UTS`. The adopted
//! anchor is the one whose solution keeps every other restricted state
//! within its own limit.
//!
//! ## Per-metre Loads
//!
//! - Ice sleeve: `882.9·π/4·((d+2e)² − d²)` daN/m
//! - Wind: `q·(d+2e)` with `q = Q·(Zp·V)²·Fc·G·Cf/10` daN/m²

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{Cable, CableCatalog};
use crate::config::{ClimaticState, ClimaticStates, StructureConfig, WindParams};
use crate::errors::{CalcError, CalcResult, ErrorKind};

/// Specific weight of glaze ice (daN/m³)
pub const ICE_WEIGHT_DAN_M3: f64 = 882.9;

/// Bisection stops when the normalized residual drops below this share of H₁
const RESIDUAL_TOLERANCE: f64 = 1e-6;

/// Coarse sweep gives up after this many steps
const MAX_SWEEP_STEPS: usize = 20_000;

const MAX_BISECTIONS: usize = 200;

// ============================================================================
// Types
// ============================================================================

/// Which cable of the structure a solution belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CableRole {
    Conductor,
    Guardia1,
    Guardia2,
}

impl CableRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            CableRole::Conductor => "conductor",
            CableRole::Guardia1 => "guardia1",
            CableRole::Guardia2 => "guardia2",
        }
    }

    /// Guard role for shield index 1 or 2
    pub fn guard(index: usize) -> CableRole {
        if index <= 1 {
            CableRole::Guardia1
        } else {
            CableRole::Guardia2
        }
    }
}

/// Per-metre loads used in a state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadPerMeter {
    /// Weight including ice (daN/m)
    pub vertical: f64,
    /// Wind on the jacketed diameter (daN/m)
    pub horizontal: f64,
    pub resultant: f64,
}

impl LoadPerMeter {
    pub fn new(vertical: f64, horizontal: f64) -> Self {
        LoadPerMeter {
            vertical,
            horizontal,
            resultant: vertical.hypot(horizontal),
        }
    }

    /// Swing angle of the cable plane from vertical (rad)
    pub fn swing_angle(&self) -> f64 {
        self.horizontal.atan2(self.vertical)
    }
}

/// Mechanical state of a cable in one climatic state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRow {
    pub state_id: String,
    pub temperatura: f64,
    /// Horizontal tension (daN)
    pub h_dan: f64,
    /// Tension at the support (daN)
    pub t_max_dan: f64,
    pub f_vert_m: f64,
    pub f_total_m: f64,
    pub l_cable_m: f64,
    pub swing_angle_rad: f64,
    pub w_used: LoadPerMeter,
    /// |H + B − C/H²| at the adopted root (daN)
    pub residual: f64,
    /// H as a fraction of UTS
    pub pct_rotura: f64,
}

/// Solution of one cable over all states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CableSolution {
    pub role: CableRole,
    pub cable: String,
    pub anchor_state: String,
    pub anchor_h_dan: f64,
    pub rows: Vec<StateRow>,
    #[serde(default)]
    pub observaciones: Vec<String>,
}

impl CableSolution {
    pub fn row(&self, state_id: &str) -> CalcResult<&StateRow> {
        self.rows
            .iter()
            .find(|r| r.state_id == state_id)
            .ok_or_else(|| CalcError::missing_cmc_state(state_id, self.role.display_name()))
    }

    pub fn max_tension_row(&self) -> Option<&StateRow> {
        self.rows.iter().fold(None, |best: Option<&StateRow>, r| match best {
            Some(b) if b.h_dan >= r.h_dan => Some(b),
            _ => Some(r),
        })
    }

    pub fn f_vert_max(&self) -> f64 {
        self.rows.iter().map(|r| r.f_vert_m).fold(0.0, f64::max)
    }

    pub fn f_total_max(&self) -> f64 {
        self.rows.iter().map(|r| r.f_total_m).fold(0.0, f64::max)
    }
}

/// CMC stage payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmcResult {
    pub vano_m: f64,
    pub conductor: CableSolution,
    #[serde(default)]
    pub guardias: Vec<CableSolution>,
}

impl CmcResult {
    pub fn cable(&self, role: CableRole) -> CalcResult<&CableSolution> {
        match role {
            CableRole::Conductor => Some(&self.conductor),
            CableRole::Guardia1 => self.guardias.first(),
            CableRole::Guardia2 => self.guardias.get(1),
        }
        .ok_or_else(|| CalcError::missing_reference("cable role", role.display_name()))
    }

    pub fn solutions(&self) -> impl Iterator<Item = &CableSolution> {
        std::iter::once(&self.conductor).chain(self.guardias.iter())
    }
}

// ============================================================================
// Loads
// ============================================================================

/// Per-metre loads of `cable` in `state`.
pub fn loads_per_meter(cable: &Cable, state: &ClimaticState, wind: &WindParams) -> LoadPerMeter {
    let d = cable.diameter_m();
    let e = state.hielo;
    let d_ice = d + 2.0 * e;
    let w_ice = ICE_WEIGHT_DAN_M3 * std::f64::consts::PI / 4.0 * (d_ice * d_ice - d * d);
    let w_wind = wind.cable_pressure(state.wind_ms()) * d_ice;
    LoadPerMeter::new(cable.peso_dan_m + w_ice, w_wind)
}

// ============================================================================
// Change of State
// ============================================================================

/// Sweep tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepTuning {
    pub coarse: f64,
    pub fine: f64,
}

impl Default for SweepTuning {
    fn default() -> Self {
        SweepTuning { coarse: 0.01, fine: 0.001 }
    }
}

/// Reference state of a change-of-state solve.
#[derive(Debug, Clone, Copy)]
pub struct Reference {
    pub h: f64,
    pub w: f64,
    pub temperature: f64,
}

/// Coefficients `B`, `C` of the cubic for a transition into (`w2`, `t2`).
pub fn cubic_coefficients(cable: &Cable, span: f64, reference: Reference, w2: f64, t2: f64) -> (f64, f64) {
    let ea = cable.ea_dan();
    let b = cable.coef_dilatacion * ea * (t2 - reference.temperature)
        + (reference.w * span).powi(2) * ea / (24.0 * reference.h * reference.h)
        - reference.h;
    let c = (w2 * span).powi(2) * ea / 24.0;
    (b, c)
}

/// Normalized residual `H + B − C/H²`
pub fn residual(h: f64, b: f64, c: f64) -> f64 {
    h + b - c / (h * h)
}

/// Solve for the target horizontal tension. Returns `(H₂, |residual|)`.
pub fn change_of_state(
    cable: &Cable,
    span: f64,
    reference: Reference,
    w2: f64,
    t2: f64,
    tuning: SweepTuning,
) -> CalcResult<(f64, f64)> {
    if !(reference.h > 0.0) || !(w2 > 0.0) {
        return Err(CalcError::non_convergent(
            "CMC",
            format!("non-positive reference tension {} or load {}", reference.h, w2),
        ));
    }
    let (b, c) = cubic_coefficients(cable, span, reference, w2, t2);
    let r = |h: f64| residual(h, b, c);

    // Coarse sweep
    let step = tuning.coarse * reference.h;
    let mut hi = step;
    let mut steps = 0;
    while r(hi) < 0.0 {
        hi += step;
        steps += 1;
        if steps > MAX_SWEEP_STEPS {
            return Err(CalcError::non_convergent(
                "CMC",
                format!(
                    "no sign change for cable '{}' up to {:.0} daN",
                    cable.nombre, hi
                ),
            ));
        }
    }
    let mut lo = (hi - step).max(f64::MIN_POSITIVE);

    // Fine sweep inside the bracket
    let fine = tuning.fine * reference.h;
    while lo + fine < hi && r(lo + fine) < 0.0 {
        lo += fine;
    }
    hi = hi.min(lo + fine);

    // Bisection
    let tol = RESIDUAL_TOLERANCE * reference.h;
    let mut mid = 0.5 * (lo + hi);
    for _ in 0..MAX_BISECTIONS {
        mid = 0.5 * (lo + hi);
        let rm = r(mid);
        if rm.abs() < tol {
            break;
        }
        if rm < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    debug!(cable = %cable.nombre, steps, h = mid, "change of state solved");
    Ok((mid, r(mid).abs()))
}

// ============================================================================
// Cable Solve
// ============================================================================

fn build_row(cable: &Cable, span: f64, state: &ClimaticState, w: LoadPerMeter, h: f64, residual: f64) -> StateRow {
    let f_total = w.resultant * span * span / (8.0 * h);
    let psi = w.swing_angle();
    StateRow {
        state_id: state.id.clone(),
        temperatura: state.temperatura,
        h_dan: h,
        t_max_dan: h.hypot(w.resultant * span / 2.0),
        f_vert_m: f_total * psi.cos(),
        f_total_m: f_total,
        l_cable_m: span + w.resultant.powi(2) * span.powi(3) / (24.0 * h * h),
        swing_angle_rad: psi,
        w_used: w,
        residual,
        pct_rotura: h / cable.carga_rotura_dan,
    }
}

/// All states solved from one anchor.
fn solve_from_anchor(
    cable: &Cable,
    span: f64,
    states: &ClimaticStates,
    wind: &WindParams,
    anchor: &ClimaticState,
    h_anchor: f64,
    tuning: SweepTuning,
) -> CalcResult<Vec<StateRow>> {
    let w_anchor = loads_per_meter(cable, anchor, wind);
    let reference = Reference {
        h: h_anchor,
        w: w_anchor.resultant,
        temperature: anchor.temperatura,
    };
    states
        .iter()
        .map(|state| {
            let w = loads_per_meter(cable, state, wind);
            let (h, res) = change_of_state(cable, span, reference, w.resultant, state.temperatura, tuning)?;
            Ok(build_row(cable, span, state, w, h, res))
        })
        .collect()
}

fn satisfies(rows: &[StateRow], restrictions: &[(String, f64)], uts: f64) -> bool {
    restrictions.iter().all(|(id, pct)| {
        rows.iter()
            .find(|r| &r.state_id == id)
            .map(|r| r.h_dan <= pct * uts * (1.0 + 1e-9))
            .unwrap_or(true)
    })
}

/// Solve one cable: pick the anchor among the restricted states and solve
/// every state from it.
pub fn solve_cable(
    role: CableRole,
    cable: &Cable,
    span: f64,
    states: &ClimaticStates,
    restrictions: &std::collections::BTreeMap<String, f64>,
    wind: &WindParams,
    tuning: SweepTuning,
) -> CalcResult<CableSolution> {
    let uts = cable.carga_rotura_dan;
    let mut candidates: Vec<(String, f64)> = restrictions.iter().map(|(k, v)| (k.clone(), *v)).collect();
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    if candidates.is_empty() {
        return Err(CalcError::missing_field(format!(
            "restricciones_cables.{}",
            if role == CableRole::Conductor { "conductor" } else { "guardia" }
        )));
    }

    let mut last_err = None;
    for (state_id, pct) in &candidates {
        let anchor = states.require(state_id)?;
        let h_anchor = pct * uts;
        match solve_from_anchor(cable, span, states, wind, anchor, h_anchor, tuning) {
            Ok(rows) if satisfies(&rows, &candidates, uts) => {
                info!(cable = %cable.nombre, role = role.display_name(), anchor = %state_id, "anchor adopted");
                return Ok(CableSolution {
                    role,
                    cable: cable.nombre.clone(),
                    anchor_state: state_id.clone(),
                    anchor_h_dan: h_anchor,
                    rows,
                    observaciones: Vec::new(),
                });
            }
            Ok(_) => debug!(cable = %cable.nombre, anchor = %state_id, "anchor violates another restriction"),
            Err(e) if e.kind() == ErrorKind::NonConvergent => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        CalcError::no_solution(
            "CMC",
            format!("no restricted state of '{}' works as anchor", cable.nombre),
        )
    }))
}

/// Raise the guard tension so its TMA sag stays within `rel` times the
/// conductor's. Restriction limits win over the sag ratio.
fn coordinate_guard_sag(
    guard: CableSolution,
    conductor: &CableSolution,
    rel: f64,
    cable: &Cable,
    ctx: &SolveContext<'_>,
) -> CalcResult<CableSolution> {
    let tma = ctx.states.find_mean_annual_equivalent()?;
    let f_cond = conductor.row(&tma.id)?.f_total_m;
    let guard_row = guard.row(&tma.id)?;
    let f_target = rel * f_cond;
    if guard_row.f_total_m <= f_target {
        return Ok(guard);
    }
    let h_needed = guard_row.w_used.resultant * ctx.span * ctx.span / (8.0 * f_target);
    let rows = solve_from_anchor(cable, ctx.span, ctx.states, ctx.wind, tma, h_needed, ctx.tuning)?;
    let limits: Vec<(String, f64)> = ctx.guard_restrictions.iter().map(|(k, v)| (k.clone(), *v)).collect();
    let mut adopted = guard;
    if satisfies(&rows, &limits, cable.carga_rotura_dan) {
        adopted.observaciones.push(format!(
            "Tensión de guardia elevada a {:.1} daN en {} para flecha <= {:.2} x conductor",
            h_needed, tma.id, rel
        ));
        adopted.anchor_state = tma.id.clone();
        adopted.anchor_h_dan = h_needed;
        adopted.rows = rows;
    } else {
        adopted.observaciones.push(format!(
            "Relación de flechas {:.2} no alcanzable sin violar restricciones; se adopta la solución limitada",
            rel
        ));
    }
    Ok(adopted)
}

struct SolveContext<'a> {
    span: f64,
    states: &'a ClimaticStates,
    wind: &'a WindParams,
    tuning: SweepTuning,
    guard_restrictions: &'a std::collections::BTreeMap<String, f64>,
}

/// Run CMC for the conductor and every guard wire of the structure.
pub fn calculate(config: &StructureConfig, catalog: &CableCatalog) -> CalcResult<CmcResult> {
    let tuning = SweepTuning {
        coarse: config.salto_porcentual,
        fine: config.paso_afinado,
    };
    let ctx = SolveContext {
        span: config.l_vano,
        states: &config.estados_climaticos,
        wind: &config.viento,
        tuning,
        guard_restrictions: &config.restricciones_cables.guardia,
    };
    let conductor_cable = catalog.get(&config.cable_conductor_id)?;
    let conductor = solve_cable(
        CableRole::Conductor,
        conductor_cable,
        ctx.span,
        ctx.states,
        &config.restricciones_cables.conductor,
        ctx.wind,
        tuning,
    )?;

    let mut guardias = Vec::new();
    for (i, id) in config.guard_cable_ids().iter().enumerate() {
        let cable = catalog.get(id)?;
        let role = CableRole::guard(i + 1);
        let mut solution = solve_cable(role, cable, ctx.span, ctx.states, ctx.guard_restrictions, ctx.wind, tuning)?;
        if let Some(rel) = config.restricciones_cables.relflecha_max_guardia {
            solution = coordinate_guard_sag(solution, &conductor, rel, cable, &ctx)?;
        }
        guardias.push(solution);
    }

    Ok(CmcResult {
        vano_m: config.l_vano,
        conductor,
        guardias,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use crate::config::tests::sample;
    use approx::assert_relative_eq;

    #[test]
    fn test_ice_and_wind_loads() {
        let cable = default_catalog().get("Al/Ac 300/50").unwrap();
        let state = ClimaticState {
            id: "IV".into(),
            temperatura: -5.0,
            viento: 50.0,
            hielo: 0.01,
            descripcion: String::new(),
        };
        let w = loads_per_meter(cable, &state, &WindParams::default());
        let d: f64 = 0.0245;
        let ice = 882.9 * std::f64::consts::PI / 4.0 * ((d + 0.02).powi(2) - d * d);
        assert_relative_eq!(w.vertical, 1.208 + ice, epsilon = 1e-9);
        let q = 0.613 * (50.0f64 / 3.6).powi(2) / 10.0;
        assert_relative_eq!(w.horizontal, q * (d + 0.02), epsilon = 1e-9);
    }

    #[test]
    fn test_same_state_returns_reference() {
        let cable = default_catalog().get("Al/Ac 300/50").unwrap();
        let reference = Reference { h: 3000.0, w: 1.208, temperature: 15.0 };
        let (h, _) = change_of_state(cable, 300.0, reference, 1.208, 15.0, SweepTuning::default()).unwrap();
        assert_relative_eq!(h, 3000.0, max_relative = 1e-5);
    }

    #[test]
    fn test_heating_lowers_tension() {
        let cable = default_catalog().get("Al/Ac 300/50").unwrap();
        let reference = Reference { h: 3000.0, w: 1.208, temperature: 15.0 };
        let (hot, _) = change_of_state(cable, 300.0, reference, 1.208, 40.0, SweepTuning::default()).unwrap();
        let (cold, _) = change_of_state(cable, 300.0, reference, 1.208, -10.0, SweepTuning::default()).unwrap();
        assert!(hot < 3000.0);
        assert!(cold > 3000.0);
    }

    #[test]
    fn test_sample_structure_invariants() {
        let config = sample();
        let result = calculate(&config, default_catalog()).unwrap();
        assert_eq!(result.conductor.rows.len(), 5);
        assert_eq!(result.guardias.len(), 1);

        for sol in result.solutions() {
            let cable = default_catalog().get(&sol.cable).unwrap();
            let limits = if sol.role == CableRole::Conductor {
                &config.restricciones_cables.conductor
            } else {
                &config.restricciones_cables.guardia
            };
            for row in &sol.rows {
                assert!(row.residual < 1e-3 * sol.anchor_h_dan, "residual {}", row.residual);
                if let Some(pct) = limits.get(&row.state_id) {
                    assert!(row.h_dan <= pct * cable.carga_rotura_dan * (1.0 + 1e-6));
                }
                assert!(row.f_vert_m <= row.f_total_m + 1e-12);
                assert!(row.l_cable_m > config.l_vano);
                assert!(row.t_max_dan > row.h_dan);
            }
        }
        // Conductor is governed by maximum wind, which also carries the largest tension
        assert_eq!(result.conductor.anchor_state, "III");
        assert_eq!(result.conductor.max_tension_row().unwrap().state_id, "III");
        // Guard wire is governed by the TMA limit
        assert_eq!(result.guardias[0].anchor_state, "V");
    }

    #[test]
    fn test_sag_formulas() {
        let config = sample();
        let result = calculate(&config, default_catalog()).unwrap();
        let row = result.conductor.row("III").unwrap();
        let l = config.l_vano;
        assert_relative_eq!(row.f_total_m, row.w_used.resultant * l * l / (8.0 * row.h_dan), epsilon = 1e-12);
        assert_relative_eq!(
            row.f_vert_m,
            row.f_total_m * (row.w_used.horizontal / row.w_used.vertical).atan().cos(),
            epsilon = 1e-9
        );
        assert!(row.swing_angle_rad > 0.5);
        assert_eq!(result.conductor.row("I").unwrap().swing_angle_rad, 0.0);
    }

    #[test]
    fn test_missing_state_lookup() {
        let result = calculate(&sample(), default_catalog()).unwrap();
        let err = result.conductor.row("VII").unwrap_err();
        assert_eq!(err.error_code(), "MISSING_CMC_STATE");
    }

    #[test]
    fn test_unknown_cable() {
        let mut config = sample();
        config.cable_conductor_id = "Cu 999".into();
        assert_eq!(calculate(&config, default_catalog()).unwrap_err().kind(), ErrorKind::MissingReference);
    }

    #[test]
    fn test_guard_sag_coordination() {
        let mut config = sample();
        config.restricciones_cables.relflecha_max_guardia = Some(0.5);
        let result = calculate(&config, default_catalog()).unwrap();
        let guard = &result.guardias[0];
        assert_eq!(guard.observaciones.len(), 1);

        let mut loose = sample();
        loose.restricciones_cables.relflecha_max_guardia = Some(0.9);
        let result = calculate(&loose, default_catalog()).unwrap();
        assert!(result.guardias[0].observaciones.is_empty());
    }
}

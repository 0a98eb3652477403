//! # Pole Selection (SPH)
//!
//! Picks a commercial concrete pole arrangement for the structure.
//!
//! ## Search
//!
//! Every feasible (arrangement, length, class) candidate is priced with the
//! pole cost model of the `costeo` group, `n·(A·L + B·Rc + C)`, and the
//! cheapest one is adopted. Equal prices fall back on
//! `prioridad_dimensionado`: least total pole length first (`longitud`) or
//! weakest class first (`resistencia`), then on the arrangement order
//! `1, 2T, 2L, 3`.
//!
//! ## Checks per Candidate
//!
//! ```text
//! He = max(coef_empotramiento·L + 0.6, He_min)      Hl = L − He ≥ altura_total
//! c  = h_eff / (Hl − 0.25)                          (floored at factor_minimo)
//! R  = coef_seguridad · √((TiroX·c/kx)² + (TiroY·c/ky)²) ≤ Rc
//! ```
//!
//! `kx`, `ky` are the directional capacity factors of the arrangement.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calculations::costing::CostParams;
use crate::calculations::dge::Geometry;
use crate::calculations::dme::DmeResult;
use crate::catalog::PoleCatalog;
use crate::config::{non_negative, positive};
use crate::errors::{CalcError, CalcResult};
use crate::trace::DerivationTrace;

const TRACE: &str = "SPH";

/// Rating point below the pole top (m)
pub const RATING_OFFSET_M: f64 = 0.25;

// ============================================================================
// Parameters
// ============================================================================

/// Pole grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoleArrangement {
    #[serde(rename = "1")]
    Single,
    /// Two poles side by side across the line
    #[serde(rename = "2T")]
    DoubleTransversal,
    /// Two poles along the line
    #[serde(rename = "2L")]
    DoubleLongitudinal,
    #[serde(rename = "3")]
    Triple,
}

impl PoleArrangement {
    pub const ALL: [PoleArrangement; 4] = [
        PoleArrangement::Single,
        PoleArrangement::DoubleTransversal,
        PoleArrangement::DoubleLongitudinal,
        PoleArrangement::Triple,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            PoleArrangement::Single => "1",
            PoleArrangement::DoubleTransversal => "2T",
            PoleArrangement::DoubleLongitudinal => "2L",
            PoleArrangement::Triple => "3",
        }
    }

    pub fn n_poles(&self) -> u8 {
        match self {
            PoleArrangement::Single => 1,
            PoleArrangement::DoubleTransversal | PoleArrangement::DoubleLongitudinal => 2,
            PoleArrangement::Triple => 3,
        }
    }

    /// Group capacity over single-pole capacity, `(x, y)`
    pub fn capacity_factors(&self) -> (f64, f64) {
        match self {
            PoleArrangement::Single => (1.0, 1.0),
            PoleArrangement::DoubleTransversal => (4.0, 2.0),
            PoleArrangement::DoubleLongitudinal => (2.0, 4.0),
            PoleArrangement::Triple => (4.5, 4.5),
        }
    }
}

impl fmt::Display for PoleArrangement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingPriority {
    #[default]
    Longitud,
    Resistencia,
}

/// SPH parameters (`postes` group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoleParams {
    #[serde(default = "one")]
    pub coef_seguridad: f64,
    #[serde(default = "default_coef_empotramiento")]
    pub coef_empotramiento: f64,
    /// Minimum buried length (m)
    #[serde(rename = "He_min", default = "default_he_min")]
    pub he_min: f64,
    /// Floor of the lever-arm ratio `c`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor_minimo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forzar_n_postes: Option<PoleArrangement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forzar_longitud: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forzar_rc: Option<f64>,
    #[serde(default)]
    pub prioridad_dimensionado: SizingPriority,
    #[serde(default = "default_configuraciones")]
    pub configuraciones: Vec<PoleArrangement>,
    /// Replaces the embedded commercial catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalogo: Option<PoleCatalog>,
}

fn one() -> f64 {
    1.0
}
fn default_coef_empotramiento() -> f64 {
    0.1
}
fn default_he_min() -> f64 {
    1.5
}
fn default_configuraciones() -> Vec<PoleArrangement> {
    PoleArrangement::ALL.to_vec()
}

impl Default for PoleParams {
    fn default() -> Self {
        PoleParams {
            coef_seguridad: 1.0,
            coef_empotramiento: default_coef_empotramiento(),
            he_min: default_he_min(),
            factor_minimo: None,
            forzar_n_postes: None,
            forzar_longitud: None,
            forzar_rc: None,
            prioridad_dimensionado: SizingPriority::Longitud,
            configuraciones: default_configuraciones(),
            catalogo: None,
        }
    }
}

impl PoleParams {
    pub fn validate(&self) -> CalcResult<()> {
        positive("postes.coef_seguridad", self.coef_seguridad)?;
        non_negative("postes.coef_empotramiento", self.coef_empotramiento)?;
        non_negative("postes.He_min", self.he_min)?;
        if let Some(f) = self.factor_minimo {
            positive("postes.factor_minimo", f)?;
        }
        if let Some(l) = self.forzar_longitud {
            positive("postes.forzar_longitud", l)?;
        }
        if let Some(rc) = self.forzar_rc {
            positive("postes.forzar_rc", rc)?;
        }
        if self.configuraciones.is_empty() {
            return Err(CalcError::invalid_input(
                "postes.configuraciones",
                "[]",
                "At least one pole arrangement is required",
            ));
        }
        if let Some(c) = &self.catalogo {
            c.validate()?;
        }
        Ok(())
    }

    /// Catalog in use: the inline one or the embedded default.
    pub fn catalog(&self) -> CalcResult<PoleCatalog> {
        match &self.catalogo {
            Some(c) => Ok(c.clone()),
            None => PoleCatalog::embedded(),
        }
    }

    /// Buried length for a pole of length `l`
    pub fn embedment(&self, l: f64) -> f64 {
        (self.coef_empotramiento * l + 0.6).max(self.he_min)
    }
}

// ============================================================================
// Result
// ============================================================================

/// SPH stage payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphResult {
    pub configuracion: PoleArrangement,
    pub n_postes: u8,
    pub longitud_m: f64,
    pub rc_dan: f64,
    /// Buried length (m)
    pub he_m: f64,
    /// Free height above ground (m)
    pub hl_m: f64,
    pub d_cima_m: f64,
    pub d_base_m: f64,
    /// Weight of one pole (daN)
    pub peso_poste_dan: f64,
    pub hipotesis_dimensionante: String,
    /// Required class at the governing hypothesis (daN)
    pub r_requerida_dan: f64,
    /// `n·(A·L + B·Rc + C)` of the adopted candidate (UM)
    pub costo_postes: f64,
    pub traza: DerivationTrace,
}

/// Governing requirement of one candidate.
struct Requirement {
    r_dan: f64,
    hypothesis: String,
}

fn requirement(params: &PoleParams, dme: &DmeResult, arrangement: PoleArrangement, hl: f64) -> Option<Requirement> {
    let lever = hl - RATING_OFFSET_M;
    if lever <= 0.0 {
        return None;
    }
    let (kx, ky) = arrangement.capacity_factors();
    dme.reactions()
        .map(|r| {
            let mut c = r.h_eff / lever;
            if let Some(floor) = params.factor_minimo {
                c = c.max(floor);
            }
            let r_dan = params.coef_seguridad * ((r.tiro_x * c / kx).hypot(r.tiro_y * c / ky));
            Requirement {
                r_dan,
                hypothesis: r.hipotesis.clone(),
            }
        })
        .fold(None, |best: Option<Requirement>, req| match best {
            Some(b) if b.r_dan >= req.r_dan => Some(b),
            _ => Some(req),
        })
}

/// A feasible pole arrangement with its price.
struct Candidate {
    arrangement: PoleArrangement,
    /// Position of the arrangement in the search
    order: usize,
    l: f64,
    rc: f64,
    he: f64,
    hl: f64,
    cost: f64,
    req: Requirement,
}

impl Candidate {
    fn total_length(&self) -> f64 {
        f64::from(self.arrangement.n_poles()) * self.l
    }

    /// Price rounded to the tie step
    fn cents(&self) -> i64 {
        (self.cost / COST_TIE_UM).round() as i64
    }

    /// Cheaper wins; at equal rounded price `priority` decides.
    fn beats(&self, other: &Candidate, priority: SizingPriority) -> bool {
        if self.cents() != other.cents() {
            return self.cents() < other.cents();
        }
        let key = |c: &Candidate| match priority {
            SizingPriority::Longitud => (c.total_length(), c.rc, c.order),
            SizingPriority::Resistencia => (c.rc, c.total_length(), c.order),
        };
        key(self) < key(other)
    }
}

/// Prices equal at this resolution are a tie (UM)
const COST_TIE_UM: f64 = 0.01;

/// Run SPH over the DME reactions, pricing candidates with `costs`.
pub fn calculate(
    params: &PoleParams,
    costs: &CostParams,
    geometry: &Geometry,
    dme: &DmeResult,
    catalog: &PoleCatalog,
) -> CalcResult<SphResult> {
    let altura = geometry.dimensions.altura_total;
    let mut trace = DerivationTrace::new();
    trace.record(
        TRACE,
        format!(
            "altura_total = {:.2} m, dominant {} with Tiro = {:.1} daN",
            altura,
            dme.dominante,
            dme.dominant()?.reaccion.tiro
        ),
    );

    let lengths: Vec<f64> = match params.forzar_longitud {
        Some(l) => vec![l],
        None => catalog.longitudes_m.clone(),
    };
    let classes: Vec<f64> = match params.forzar_rc {
        Some(rc) => vec![rc],
        None => catalog.resistencias_dan.clone(),
    };
    let pairs: Vec<(f64, f64)> = lengths
        .iter()
        .flat_map(|l| classes.iter().map(move |rc| (*l, *rc)))
        .collect();
    let priority = params.prioridad_dimensionado;

    let arrangements: Vec<PoleArrangement> = match params.forzar_n_postes {
        Some(a) => vec![a],
        None => params.configuraciones.clone(),
    };

    let mut best: Option<Candidate> = None;
    for (order, arrangement) in arrangements.into_iter().enumerate() {
        let mut rejected_height = 0usize;
        let mut cheapest: Option<Candidate> = None;
        for &(l, rc) in &pairs {
            let he = params.embedment(l);
            let hl = l - he;
            if hl + 1e-9 < altura {
                rejected_height += 1;
                continue;
            }
            let Some(req) = requirement(params, dme, arrangement, hl) else {
                continue;
            };
            if req.r_dan > rc + 1e-9 {
                continue;
            }
            let candidate = Candidate {
                arrangement,
                order,
                l,
                rc,
                he,
                hl,
                cost: f64::from(arrangement.n_poles()) * costs.pole_cost(l, rc),
                req,
            };
            if cheapest.as_ref().map_or(true, |c| candidate.beats(c, priority)) {
                cheapest = Some(candidate);
            }
        }
        let Some(candidate) = cheapest else {
            debug!(arrangement = %arrangement, rejected_height, "no pole in arrangement");
            trace.record(TRACE, format!("{}: no feasible pole", arrangement));
            continue;
        };
        trace.record(
            TRACE,
            format!(
                "{}: L = {:.1} m, Rc = {:.0} daN, cost = {:.2} UM",
                arrangement, candidate.l, candidate.rc, candidate.cost
            ),
        );
        if best.as_ref().map_or(true, |b| candidate.beats(b, priority)) {
            best = Some(candidate);
        }
    }

    if let Some(c) = best {
        trace.record(
            TRACE,
            format!(
                "{}: L = {:.1} m, He = {:.2} m, Hl = {:.2} m >= {:.2} m",
                c.arrangement, c.l, c.he, c.hl, altura
            ),
        );
        trace.record(
            TRACE,
            format!(
                "{}: R = {:.1} daN under {} <= Rc = {:.0} daN",
                c.arrangement, c.req.r_dan, c.req.hypothesis, c.rc
            ),
        );
        info!(arrangement = %c.arrangement, length = c.l, rc = c.rc, cost = c.cost, "pole adopted");
        return Ok(SphResult {
            configuracion: c.arrangement,
            n_postes: c.arrangement.n_poles(),
            longitud_m: c.l,
            rc_dan: c.rc,
            he_m: c.he,
            hl_m: c.hl,
            d_cima_m: catalog.d_cima(c.rc),
            d_base_m: catalog.d_base(c.l, c.rc),
            peso_poste_dan: catalog.weight_dan(c.l, c.rc),
            hipotesis_dimensionante: c.req.hypothesis,
            r_requerida_dan: c.req.r_dan,
            costo_postes: c.cost,
            traza: trace,
        });
    }

    Err(CalcError::no_solution(
        "SPH",
        format!(
            "no commercial pole satisfies altura_total = {:.2} m and the governing pull",
            altura
        ),
    ))
}

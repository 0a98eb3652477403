//! # Monobloc Foundation (Sulzberger)
//!
//! Sizes one concrete block per pole. Every hypothesis is sized on its own,
//! growing the depth `t` first and then the plan side `a = b` by
//! `incremento` until both checks pass:
//!
//! ```text
//! C_t = C·t/2                         C_b = C_t
//! Ms  = b·t³·C_t·tanα / 36            lateral soil moment
//! Mb  = G·(a/2 − 0.47·√(G/(b·C_b·tanα)))   bottom moment, ≥ 0
//! Mv  = F·(h + 2t/3)                  overturning moment
//! (Ms + Mb)/Mv ≥ FS(min(Mb/Ms, 1))    FS from 1.5 down to 1.0
//! σ_max ≤ σ_adm · factor_sigma
//! ```
//!
//! The block of the hypothesis with the largest concrete volume is adopted.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calculations::dme::{DmeResult, ReactionRow};
use crate::calculations::sph::SphResult;
use crate::config::{non_negative, positive};
use crate::errors::{CalcError, CalcResult};
use crate::trace::DerivationTrace;

const TRACE: &str = "Fundacion";

/// Required overturning safety factor against `Mb/Ms`.
const SAFETY_TABLE: [(f64, f64); 11] = [
    (0.0, 1.500),
    (0.1, 1.383),
    (0.2, 1.317),
    (0.3, 1.260),
    (0.4, 1.208),
    (0.5, 1.150),
    (0.6, 1.115),
    (0.7, 1.075),
    (0.8, 1.040),
    (0.9, 1.017),
    (1.0, 1.000),
];

/// Half-width of the diagonal sector that selects a rhombic base (degrees)
const RHOMBIC_SECTOR_DEG: f64 = 22.5;

/// Foundation parameters (`fundacion` group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundationParams {
    /// Soil compressibility at 2 m depth (daN/m³)
    #[serde(rename = "C", default = "default_c")]
    pub c: f64,
    /// Admissible rotation
    #[serde(default = "default_tan_alpha")]
    pub tan_alpha: f64,
    /// Admissible bearing pressure (daN/m²)
    #[serde(default = "default_sigma_adm")]
    pub sigma_adm: f64,
    #[serde(default = "one")]
    pub factor_sigma: f64,
    /// Concrete density (daN/m³)
    #[serde(default = "default_densidad")]
    pub densidad_hormigon: f64,
    #[serde(default = "default_t_inicial")]
    pub t_inicial: f64,
    #[serde(default = "default_a_inicial")]
    pub a_inicial: f64,
    #[serde(default = "default_incremento")]
    pub incremento: f64,
    #[serde(default = "default_t_max")]
    pub t_max: f64,
    #[serde(default = "default_a_max")]
    pub a_max: f64,
    /// Concrete around and below the embedded pole (m)
    #[serde(default = "default_holgura")]
    pub holgura_poste: f64,
}

fn default_c() -> f64 {
    5.0e6
}
fn default_tan_alpha() -> f64 {
    0.01
}
fn default_sigma_adm() -> f64 {
    20_000.0
}
fn one() -> f64 {
    1.0
}
fn default_densidad() -> f64 {
    2200.0
}
fn default_t_inicial() -> f64 {
    1.5
}
fn default_a_inicial() -> f64 {
    0.8
}
fn default_incremento() -> f64 {
    0.05
}
fn default_t_max() -> f64 {
    6.0
}
fn default_a_max() -> f64 {
    3.0
}
fn default_holgura() -> f64 {
    0.3
}

impl Default for FoundationParams {
    fn default() -> Self {
        FoundationParams {
            c: default_c(),
            tan_alpha: default_tan_alpha(),
            sigma_adm: default_sigma_adm(),
            factor_sigma: 1.0,
            densidad_hormigon: default_densidad(),
            t_inicial: default_t_inicial(),
            a_inicial: default_a_inicial(),
            incremento: default_incremento(),
            t_max: default_t_max(),
            a_max: default_a_max(),
            holgura_poste: default_holgura(),
        }
    }
}

impl FoundationParams {
    pub fn validate(&self) -> CalcResult<()> {
        positive("fundacion.C", self.c)?;
        positive("fundacion.tan_alpha", self.tan_alpha)?;
        positive("fundacion.sigma_adm", self.sigma_adm)?;
        positive("fundacion.factor_sigma", self.factor_sigma)?;
        non_negative("fundacion.densidad_hormigon", self.densidad_hormigon)?;
        positive("fundacion.t_inicial", self.t_inicial)?;
        positive("fundacion.a_inicial", self.a_inicial)?;
        positive("fundacion.incremento", self.incremento)?;
        non_negative("fundacion.holgura_poste", self.holgura_poste)?;
        if self.t_max < self.t_inicial {
            return Err(CalcError::invalid_input(
                "fundacion.t_max",
                self.t_max.to_string(),
                "t_max must not be below t_inicial",
            ));
        }
        if self.a_max < self.a_inicial {
            return Err(CalcError::invalid_input(
                "fundacion.a_max",
                self.a_max.to_string(),
                "a_max must not be below a_inicial",
            ));
        }
        Ok(())
    }
}

/// Plan shape of the block relative to the pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseShape {
    Cuadrada,
    /// Square loaded along its diagonal
    Romboidal,
}

impl BaseShape {
    /// Shape for a pull at `angle_deg` from the transversal axis.
    pub fn for_pull_angle(angle_deg: f64) -> BaseShape {
        let within_quadrant = angle_deg.rem_euclid(90.0);
        if (within_quadrant - 45.0).abs() <= RHOMBIC_SECTOR_DEG {
            BaseShape::Romboidal
        } else {
            BaseShape::Cuadrada
        }
    }

    /// Dimensions `(along pull, across pull)` of a square block of side `a`.
    pub fn effective_sides(&self, a: f64) -> (f64, f64) {
        match self {
            BaseShape::Cuadrada => (a, a),
            BaseShape::Romboidal => (a * std::f64::consts::SQRT_2, a / std::f64::consts::SQRT_2),
        }
    }
}

/// Load acting on one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockLoad {
    /// Horizontal pull on one pole (daN)
    pub pull_dan: f64,
    /// Height of the pull above ground (m)
    pub height_m: f64,
    /// Vertical load without the block's own weight (daN)
    pub vertical_dan: f64,
    pub shape: BaseShape,
}

/// Outcome of checking one block size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SulzbergerCheck {
    pub t_m: f64,
    pub a_m: f64,
    pub volumen_m3: f64,
    /// Total vertical load including the block (daN)
    pub g_dan: f64,
    pub ms_dan_m: f64,
    pub mb_dan_m: f64,
    pub mv_dan_m: f64,
    /// Infinite when nothing overturns the block
    #[serde(with = "unbounded")]
    pub fs: f64,
    pub fs_requerido: f64,
    #[serde(with = "unbounded")]
    pub sigma_max: f64,
    pub admisible: bool,
}

/// `f64` that may be infinite, stored as `null` in JSON.
mod unbounded {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_some(v)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::INFINITY))
    }
}

/// Sizing of one hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundationCase {
    pub hipotesis: String,
    pub base: BaseShape,
    pub pull_dan: f64,
    pub check: SulzbergerCheck,
}

/// Foundation stage payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoundationResult {
    pub casos: Vec<FoundationCase>,
    pub hipotesis_dimensionante: String,
    pub t_m: f64,
    pub a_m: f64,
    pub b_m: f64,
    pub base: BaseShape,
    /// Largest block volume over the hypotheses (m³)
    pub volumen_max_m3: f64,
    /// One block per pole
    pub n_bloques: u8,
    pub traza: DerivationTrace,
}

impl FoundationResult {
    /// Concrete for every block of the structure (m³)
    pub fn total_volume(&self) -> f64 {
        self.volumen_max_m3 * f64::from(self.n_bloques)
    }
}

/// Required safety factor for a bottom/lateral moment ratio.
pub fn required_safety_factor(mb_over_ms: f64) -> f64 {
    let r = mb_over_ms.clamp(0.0, 1.0);
    for pair in SAFETY_TABLE.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        if r <= x1 {
            return y0 + (y1 - y0) * (r - x0) / (x1 - x0);
        }
    }
    1.0
}

/// Evaluate one block of depth `t` and side `a`.
pub fn check(params: &FoundationParams, load: &BlockLoad, t: f64, a: f64) -> SulzbergerCheck {
    let (a_eff, b_eff) = load.shape.effective_sides(a);
    let volume = a * a * t;
    let g = load.vertical_dan + volume * params.densidad_hormigon;

    let c_t = params.c * t / 2.0;
    let c_b = c_t;
    let ms = b_eff * t.powi(3) * c_t * params.tan_alpha / 36.0;
    let mb = (g * (a_eff / 2.0 - 0.47 * (g / (b_eff * c_b * params.tan_alpha)).sqrt())).max(0.0);
    let mv = load.pull_dan * (load.height_m + 2.0 * t / 3.0);

    let fs = if mv > 0.0 { (ms + mb) / mv } else { f64::INFINITY };
    let ratio = if ms > 0.0 { mb / ms } else { 1.0 };
    let fs_req = required_safety_factor(ratio);

    let m_base = if ms + mb > 0.0 { mv * mb / (ms + mb) } else { 0.0 };
    let e = if g > 0.0 { m_base / g } else { 0.0 };
    let sigma_max = if e <= a_eff / 6.0 {
        g / (a_eff * b_eff) * (1.0 + 6.0 * e / a_eff)
    } else if a_eff / 2.0 - e > 0.0 {
        2.0 * g / (3.0 * b_eff * (a_eff / 2.0 - e))
    } else {
        f64::INFINITY
    };

    SulzbergerCheck {
        t_m: t,
        a_m: a,
        volumen_m3: volume,
        g_dan: g,
        ms_dan_m: ms,
        mb_dan_m: mb,
        mv_dan_m: mv,
        fs,
        fs_requerido: fs_req,
        sigma_max,
        admisible: fs >= fs_req && sigma_max <= params.sigma_adm * params.factor_sigma,
    }
}

fn steps(from: f64, to: f64, inc: f64) -> impl Iterator<Item = f64> {
    let n = ((to - from) / inc + 1e-9).floor().max(0.0) as usize;
    (0..=n).map(move |i| from + i as f64 * inc)
}

fn size_case(params: &FoundationParams, sph: &SphResult, reaction: &ReactionRow) -> CalcResult<FoundationCase> {
    let n = f64::from(sph.n_postes);
    let shape = BaseShape::for_pull_angle(reaction.angulo_deg);
    let load = BlockLoad {
        pull_dan: reaction.tiro / n,
        height_m: reaction.h_eff,
        vertical_dan: reaction.fz.max(0.0) / n + sph.peso_poste_dan,
        shape,
    };
    let t0 = params.t_inicial.max(sph.he_m + params.holgura_poste);
    let a0 = params.a_inicial.max(sph.d_base_m + 2.0 * params.holgura_poste);
    if t0 > params.t_max || a0 > params.a_max {
        return Err(CalcError::no_solution(
            "Fundacion",
            format!(
                "embedded pole needs t >= {:.2} m and a >= {:.2} m, above t_max/a_max",
                t0, a0
            ),
        ));
    }

    let mut tried = 0usize;
    for a in steps(a0, params.a_max, params.incremento) {
        for t in steps(t0, params.t_max, params.incremento) {
            tried += 1;
            let c = check(params, &load, t, a);
            if c.admisible {
                debug!(hypothesis = %reaction.hipotesis, tried, t, a, "block sized");
                return Ok(FoundationCase {
                    hipotesis: reaction.hipotesis.clone(),
                    base: shape,
                    pull_dan: load.pull_dan,
                    check: c,
                });
            }
        }
    }
    Err(CalcError::no_solution(
        "Fundacion",
        format!(
            "hypothesis {} not admissible within t_max = {} m, a_max = {} m",
            reaction.hipotesis, params.t_max, params.a_max
        ),
    ))
}

/// Size the foundation for every DME hypothesis.
pub fn calculate(params: &FoundationParams, dme: &DmeResult, sph: &SphResult) -> CalcResult<FoundationResult> {
    let mut trace = DerivationTrace::new();
    let mut casos = Vec::with_capacity(dme.hipotesis.len());
    for reaction in dme.reactions() {
        let case = size_case(params, sph, reaction)?;
        let c = &case.check;
        trace.record(
            TRACE,
            format!(
                "{}: {:?}, t = {:.2} m, a = {:.2} m, FS = {:.2} >= {:.2}, σ = {:.0} daN/m²",
                case.hipotesis, case.base, c.t_m, c.a_m, c.fs, c.fs_requerido, c.sigma_max
            ),
        );
        casos.push(case);
    }

    let governing = casos
        .iter()
        .fold(None, |best: Option<&FoundationCase>, c| match best {
            Some(b) if b.check.volumen_m3 >= c.check.volumen_m3 => Some(b),
            _ => Some(c),
        })
        .ok_or_else(|| CalcError::missing_reference("hypotheses", "Fundacion"))?;

    let (a_eff, b_eff) = governing.base.effective_sides(governing.check.a_m);
    trace.record(
        TRACE,
        format!(
            "dimensioning: {} with V = {:.3} m³ per block",
            governing.hipotesis, governing.check.volumen_m3
        ),
    );
    info!(
        hypothesis = %governing.hipotesis,
        volume = governing.check.volumen_m3,
        "foundation sized"
    );
    Ok(FoundationResult {
        hipotesis_dimensionante: governing.hipotesis.clone(),
        t_m: governing.check.t_m,
        a_m: a_eff,
        b_m: b_eff,
        base: governing.base,
        volumen_max_m3: governing.check.volumen_m3,
        n_bloques: sph.n_postes,
        casos,
        traza: trace,
    })
}

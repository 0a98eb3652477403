//! # Structure Configuration
//!
//! `StructureConfig` is the single canonical input of the pipeline: one JSON
//! document per structure, using the Spanish key names engineers already
//! write (`TITULO`, `L_vano`, `estados_climaticos`, ...). Optional groups
//! fall back to typed defaults, so a minimal document only carries the
//! required keys.
//!
//! ## Minimal Document
//!
//! ```json
//! {
//!   "TITULO": "S132-R",
//!   "TIPO_ESTRUCTURA": "Suspensión Recta",
//!   "TENSION": 132.0,
//!   "DISPOSICION": "vertical",
//!   "TERNA": "Simple",
//!   "CANT_HG": 1,
//!   "L_vano": 350.0,
//!   "Lk": 1.8,
//!   "alpha": 0.0,
//!   "cable_conductor_id": "Al/Ac 300/50",
//!   "cable_guardia_id": "Ac 50",
//!   "estados_climaticos": { "III": { "temperatura": 10.0, "viento": 140.0 } },
//!   "restricciones_cables": { "conductor": { "III": 0.25 }, "guardia": { "III": 0.25 } }
//! }
//! ```

pub mod climate;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calculations::aee::AeeParams;
use crate::calculations::costing::CostParams;
use crate::calculations::dge::overlay::NodeEdit;
use crate::calculations::foundation::FoundationParams;
use crate::calculations::sph::PoleParams;
use crate::calculations::trees::TreeParams;
use crate::catalog::{Cable, CableCatalog, HypothesisCatalog};
use crate::errors::{CalcError, CalcResult};

pub use climate::{ClimaticState, ClimaticStates, StateSelector};

// ============================================================================
// Typology Enums
// ============================================================================

/// Structure function in the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StructureType {
    SuspensionRecta,
    SuspensionAngular,
    Retencion,
    Terminal,
}

impl StructureType {
    pub const ALL: [StructureType; 4] = [
        StructureType::SuspensionRecta,
        StructureType::SuspensionAngular,
        StructureType::Retencion,
        StructureType::Terminal,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            StructureType::SuspensionRecta => "Suspensión Recta",
            StructureType::SuspensionAngular => "Suspensión Angular",
            StructureType::Retencion => "Retención",
            StructureType::Terminal => "Terminal",
        }
    }

    /// Suspension structures carry swinging insulator strings
    pub fn is_suspension(&self) -> bool {
        matches!(self, StructureType::SuspensionRecta | StructureType::SuspensionAngular)
    }

    /// Parse a typology name; accents and case are ignored.
    pub fn parse(s: &str) -> Option<Self> {
        let folded: String = s
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'á' => 'a',
                'é' => 'e',
                'í' => 'i',
                'ó' => 'o',
                'ú' => 'u',
                '_' => ' ',
                c => c,
            })
            .collect();
        match folded.as_str() {
            "suspension recta" => Some(StructureType::SuspensionRecta),
            "suspension angular" => Some(StructureType::SuspensionAngular),
            "retencion" => Some(StructureType::Retencion),
            "terminal" => Some(StructureType::Terminal),
            _ => None,
        }
    }
}

impl TryFrom<String> for StructureType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        StructureType::parse(&s).ok_or_else(|| format!("unknown TIPO_ESTRUCTURA '{}'", s))
    }
}

impl From<StructureType> for String {
    fn from(t: StructureType) -> Self {
        t.display_name().to_string()
    }
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Arrangement of the phases on the structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Vertical,
    Horizontal,
    Triangular,
    Rect,
    Bandera,
}

impl Disposition {
    pub fn code(&self) -> &'static str {
        match self {
            Disposition::Vertical => "vertical",
            Disposition::Horizontal => "horizontal",
            Disposition::Triangular => "triangular",
            Disposition::Rect => "rect",
            Disposition::Bandera => "bandera",
        }
    }
}

/// Number of circuits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Terna {
    Simple,
    Doble,
}

impl Terna {
    pub fn code(&self) -> &'static str {
        match self {
            Terna::Simple => "Simple",
            Terna::Doble => "Doble",
        }
    }
}

// ============================================================================
// Restrictions
// ============================================================================

/// Maximum tension per state as a fraction of the ultimate load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CableRestrictions {
    #[serde(default)]
    pub conductor: BTreeMap<String, f64>,
    #[serde(default)]
    pub guardia: BTreeMap<String, f64>,
    /// Maximum ratio guard sag / conductor sag in the TMA state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relflecha_max_guardia: Option<f64>,
}

// ============================================================================
// Shared Parameter Groups
// ============================================================================

/// Geometry parameters. Flattened into the top level of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryParams {
    /// Site altitude above sea level (m)
    #[serde(rename = "Altura_MSNM", default)]
    pub altura_msnm: f64,
    /// Minimum conductor-to-ground clearance (m)
    #[serde(default = "default_altura_minima")]
    pub altura_minima_cable: f64,
    #[serde(rename = "HADD", default = "default_hadd")]
    pub hadd: f64,
    #[serde(rename = "HADD_ENTRE_AMARRES", default)]
    pub hadd_entre_amarres: f64,
    #[serde(rename = "HADD_HG", default)]
    pub hadd_hg: f64,
    #[serde(rename = "LONGITUD_MENSULA_MINIMA", default = "default_lmen_min")]
    pub lmen_min: f64,
    #[serde(rename = "LONGITUD_MENSULA_MAXIMA", default, skip_serializing_if = "Option::is_none")]
    pub lmen_max: Option<f64>,
    #[serde(rename = "LMENHG_MIN", default = "default_lmenhg_min")]
    pub lmenhg_min: f64,
    #[serde(rename = "AUTOAJUSTAR_LMENHG", default = "default_true")]
    pub autoajustar_lmenhg: bool,
    #[serde(rename = "HG_CENTRADO", default = "default_true")]
    pub hg_centrado: bool,
    /// Shielding angle (degrees from vertical)
    #[serde(rename = "ANG_APANTALLAMIENTO", default = "default_ang_apantallamiento")]
    pub ang_apantallamiento: f64,
    /// Insulator string weight (daN)
    #[serde(rename = "PCADENA", default = "default_pcadena")]
    pub pcadena: f64,
    /// Estimated top diameter used for wind on the pole (m)
    #[serde(rename = "D_CIMA_ESTIMADO", default = "default_d_cima")]
    pub d_cima_estimado: f64,
    #[serde(rename = "CONICIDAD", default = "default_conicidad")]
    pub conicidad: f64,
}

impl Default for GeometryParams {
    fn default() -> Self {
        GeometryParams {
            altura_msnm: 0.0,
            altura_minima_cable: default_altura_minima(),
            hadd: default_hadd(),
            hadd_entre_amarres: 0.0,
            hadd_hg: 0.0,
            lmen_min: default_lmen_min(),
            lmen_max: None,
            lmenhg_min: default_lmenhg_min(),
            autoajustar_lmenhg: true,
            hg_centrado: true,
            ang_apantallamiento: default_ang_apantallamiento(),
            pcadena: default_pcadena(),
            d_cima_estimado: default_d_cima(),
            conicidad: default_conicidad(),
        }
    }
}

/// Wind pressure coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindParams {
    /// Dynamic pressure coefficient (kg/m³ / 2)
    #[serde(rename = "Q", default = "default_q")]
    pub q: f64,
    /// Height exposure factor on velocity
    #[serde(rename = "Zp", default = "default_one")]
    pub zp: f64,
    #[serde(rename = "Fc", default = "default_one")]
    pub fc: f64,
    /// Gust factor for cables
    #[serde(rename = "G_cable", default = "default_one")]
    pub g_cable: f64,
    #[serde(rename = "Cf_cable", default = "default_one")]
    pub cf_cable: f64,
    #[serde(rename = "Cf_poste", default = "default_cf_poste")]
    pub cf_poste: f64,
    #[serde(rename = "Cf_cadena", default = "default_cf_cadena")]
    pub cf_cadena: f64,
    /// Insulator string diameter (m)
    #[serde(rename = "d_cadena", default = "default_d_cadena")]
    pub d_cadena: f64,
}

impl Default for WindParams {
    fn default() -> Self {
        WindParams {
            q: default_q(),
            zp: 1.0,
            fc: 1.0,
            g_cable: 1.0,
            cf_cable: 1.0,
            cf_poste: default_cf_poste(),
            cf_cadena: default_cf_cadena(),
            d_cadena: default_d_cadena(),
        }
    }
}

impl WindParams {
    /// Wind pressure in daN/m² for velocity `v_ms`, gust `g` and shape `cf`.
    pub fn pressure(&self, v_ms: f64, g: f64, cf: f64) -> f64 {
        self.q * (self.zp * v_ms).powi(2) * self.fc * g * cf / 10.0
    }

    /// Pressure on a cable
    pub fn cable_pressure(&self, v_ms: f64) -> f64 {
        self.pressure(v_ms, self.g_cable, self.cf_cable)
    }
}

fn default_true() -> bool {
    true
}
fn default_one() -> f64 {
    1.0
}
fn default_altura_minima() -> f64 {
    6.5
}
fn default_hadd() -> f64 {
    1.5
}
fn default_lmen_min() -> f64 {
    0.5
}
fn default_lmenhg_min() -> f64 {
    0.3
}
fn default_ang_apantallamiento() -> f64 {
    30.0
}
fn default_pcadena() -> f64 {
    10.5
}
fn default_d_cima() -> f64 {
    0.26
}
fn default_conicidad() -> f64 {
    0.015
}
fn default_q() -> f64 {
    0.613
}
fn default_cf_poste() -> f64 {
    0.7
}
fn default_cf_cadena() -> f64 {
    1.2
}
fn default_d_cadena() -> f64 {
    0.146
}
fn default_salto() -> f64 {
    0.01
}
fn default_paso() -> f64 {
    0.001
}

// ============================================================================
// StructureConfig
// ============================================================================

/// The structure document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureConfig {
    #[serde(rename = "TITULO")]
    pub titulo: String,
    #[serde(rename = "TIPO_ESTRUCTURA")]
    pub tipo_estructura: StructureType,
    /// Nominal line voltage (kV)
    #[serde(rename = "TENSION")]
    pub tension_kv: f64,
    #[serde(rename = "DISPOSICION")]
    pub disposicion: Disposition,
    #[serde(rename = "TERNA")]
    pub terna: Terna,
    #[serde(rename = "CANT_HG")]
    pub cant_hg: u8,
    /// Span length (m)
    #[serde(rename = "L_vano")]
    pub l_vano: f64,
    /// Insulator string length (m)
    #[serde(rename = "Lk")]
    pub lk: f64,
    /// Line deviation angle (degrees)
    pub alpha: f64,
    pub cable_conductor_id: String,
    #[serde(default)]
    pub cable_guardia_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cable_guardia2_id: Option<String>,
    pub estados_climaticos: ClimaticStates,
    pub restricciones_cables: CableRestrictions,

    #[serde(flatten)]
    pub geometria: GeometryParams,
    #[serde(default)]
    pub viento: WindParams,

    #[serde(rename = "SALTO_PORCENTUAL", default = "default_salto")]
    pub salto_porcentual: f64,
    #[serde(rename = "PASO_AFINADO", default = "default_paso")]
    pub paso_afinado: f64,

    #[serde(rename = "HIPOTESIS_ACTIVA", default, skip_serializing_if = "Option::is_none")]
    pub hipotesis_activa: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hipotesis_personalizadas: Option<HypothesisCatalog>,
    #[serde(rename = "REDUCIR_A5_CADENA_LARGA", default = "default_true")]
    pub reducir_a5_cadena_larga: bool,
    /// Global point overload on the top conductor (daN)
    #[serde(rename = "SOBRECARGA", default, skip_serializing_if = "Option::is_none")]
    pub sobrecarga: Option<f64>,

    #[serde(default)]
    pub nodos_editados: Vec<NodeEdit>,
    #[serde(default)]
    pub postes: PoleParams,
    #[serde(default)]
    pub fundacion: FoundationParams,
    #[serde(default)]
    pub costeo: CostParams,
    #[serde(rename = "AnalisisEstaticoEsfuerzos", default)]
    pub aee: AeeParams,
    #[serde(default)]
    pub arboles: TreeParams,
    #[serde(default)]
    pub cables_personalizados: BTreeMap<String, Cable>,
}

impl StructureConfig {
    pub fn from_json_str(json: &str) -> CalcResult<Self> {
        let config: StructureConfig = serde_json::from_str(json).map_err(|e| CalcError::SerializationError {
            reason: format!("Invalid structure document: {}", e),
        })?;
        Ok(config)
    }

    pub fn from_value(value: serde_json::Value) -> CalcResult<Self> {
        serde_json::from_value(value).map_err(|e| CalcError::SerializationError {
            reason: format!("Invalid structure document: {}", e),
        })
    }

    pub fn from_path(path: &Path) -> CalcResult<Self> {
        crate::file_io::read_json(path)
    }

    /// Cable catalog with `cables_personalizados` shadowing `base`.
    pub fn cable_catalog(&self, base: &CableCatalog) -> CableCatalog {
        base.with_overrides(&self.cables_personalizados)
    }

    /// Guard cable ids in HG order; empty when `CANT_HG = 0`.
    pub fn guard_cable_ids(&self) -> Vec<String> {
        let Some(first) = &self.cable_guardia_id else {
            return Vec::new();
        };
        match self.cant_hg {
            0 => Vec::new(),
            1 => vec![first.clone()],
            _ => vec![
                first.clone(),
                self.cable_guardia2_id.clone().unwrap_or_else(|| first.clone()),
            ],
        }
    }

    /// Validate every field a solver depends on.
    pub fn validate(&self) -> CalcResult<()> {
        if self.titulo.trim().is_empty() {
            return Err(CalcError::missing_field("TITULO"));
        }
        positive("TENSION", self.tension_kv)?;
        positive("L_vano", self.l_vano)?;
        if !(self.lk >= 0.0) || self.lk > 10.0 {
            return Err(CalcError::invalid_input("Lk", self.lk.to_string(), "Lk must be between 0 and 10 m"));
        }
        if !(0.0..180.0).contains(&self.alpha) {
            return Err(CalcError::invalid_input(
                "alpha",
                self.alpha.to_string(),
                "Deviation angle must be in [0, 180) degrees",
            ));
        }
        if self.cant_hg > 2 {
            return Err(CalcError::invalid_input(
                "CANT_HG",
                self.cant_hg.to_string(),
                "Shield wire count must be 0, 1 or 2",
            ));
        }
        if self.cable_conductor_id.trim().is_empty() {
            return Err(CalcError::missing_field("cable_conductor_id"));
        }
        if self.cant_hg > 0 && self.cable_guardia_id.is_none() {
            return Err(CalcError::missing_field("cable_guardia_id"));
        }
        self.estados_climaticos.validate()?;
        self.validate_restrictions()?;

        let g = &self.geometria;
        positive("altura_minima_cable", g.altura_minima_cable)?;
        non_negative("HADD", g.hadd)?;
        non_negative("HADD_ENTRE_AMARRES", g.hadd_entre_amarres)?;
        non_negative("HADD_HG", g.hadd_hg)?;
        positive("LONGITUD_MENSULA_MINIMA", g.lmen_min)?;
        non_negative("LMENHG_MIN", g.lmenhg_min)?;
        non_negative("PCADENA", g.pcadena)?;
        positive("D_CIMA_ESTIMADO", g.d_cima_estimado)?;
        non_negative("CONICIDAD", g.conicidad)?;
        if !(0.0..90.0).contains(&g.ang_apantallamiento) {
            return Err(CalcError::invalid_input(
                "ANG_APANTALLAMIENTO",
                g.ang_apantallamiento.to_string(),
                "Shielding angle must be in [0, 90) degrees",
            ));
        }
        positive("viento.Q", self.viento.q)?;
        positive("SALTO_PORCENTUAL", self.salto_porcentual)?;
        positive("PASO_AFINADO", self.paso_afinado)?;
        if self.paso_afinado > self.salto_porcentual {
            return Err(CalcError::invalid_input(
                "PASO_AFINADO",
                self.paso_afinado.to_string(),
                "Fine step must not exceed SALTO_PORCENTUAL",
            ));
        }
        if let Some(s) = self.sobrecarga {
            non_negative("SOBRECARGA", s)?;
        }
        if let Some(catalog) = &self.hipotesis_personalizadas {
            catalog.validate()?;
        }
        for cable in self.cables_personalizados.values() {
            cable.validate()?;
        }
        self.postes.validate()?;
        self.fundacion.validate()?;
        self.costeo.validate()?;
        self.aee.validate()?;
        self.arboles.validate()?;
        Ok(())
    }

    fn validate_restrictions(&self) -> CalcResult<()> {
        let r = &self.restricciones_cables;
        if r.conductor.is_empty() {
            return Err(CalcError::missing_field("restricciones_cables.conductor"));
        }
        if self.cant_hg > 0 && r.guardia.is_empty() {
            return Err(CalcError::missing_field("restricciones_cables.guardia"));
        }
        for (role, map) in [("conductor", &r.conductor), ("guardia", &r.guardia)] {
            for (state, pct) in map {
                if self.estados_climaticos.get(state).is_none() {
                    return Err(CalcError::missing_reference("climatic state", state.clone()));
                }
                if !(*pct > 0.0 && *pct <= 1.0) {
                    return Err(CalcError::invalid_input(
                        format!("restricciones_cables.{}.{}", role, state),
                        pct.to_string(),
                        "Restriction must be a fraction of UTS in (0, 1]",
                    ));
                }
            }
        }
        if let Some(rel) = r.relflecha_max_guardia {
            positive("restricciones_cables.relflecha_max_guardia", rel)?;
        }
        Ok(())
    }
}

pub(crate) fn positive(field: &str, value: f64) -> CalcResult<()> {
    if !(value > 0.0) || !value.is_finite() {
        return Err(CalcError::invalid_input(field, value.to_string(), "Must be positive"));
    }
    Ok(())
}

pub(crate) fn non_negative(field: &str, value: f64) -> CalcResult<()> {
    if !(value >= 0.0) || !value.is_finite() {
        return Err(CalcError::invalid_input(field, value.to_string(), "Cannot be negative"));
    }
    Ok(())
}

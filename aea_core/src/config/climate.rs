//! # Climatic States
//!
//! The set of climatic states of a structure and the semantic predicates
//! that pick roles out of it (maximum wind, minimum temperature, mean annual
//! temperature, ...). Solvers never address a state by position; users may
//! name and order states freely.
//!
//! ## JSON Format
//!
//! ```json
//! {
//!   "III": { "temperatura": 10.0, "viento": 140.0, "hielo": 0.0, "descripcion": "Viento máximo" },
//!   "V":   { "temperatura": 16.0, "viento": 0.0,   "hielo": 0.0, "descripcion": "TMA" }
//! }
//! ```
//!
//! Wind velocity is in km/h, ice thickness in metres of radial sleeve.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::calculations::cmc::StateRow;
use crate::errors::{CalcError, CalcResult};
use crate::units::{KmH, MetersPerSecond};

/// A single climatic state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimaticState {
    pub id: String,
    /// Temperature in °C
    pub temperatura: f64,
    /// Wind velocity in km/h
    pub viento: f64,
    /// Radial ice thickness in m
    pub hielo: f64,
    pub descripcion: String,
}

impl ClimaticState {
    pub fn wind_ms(&self) -> f64 {
        MetersPerSecond::from(KmH(self.viento)).value()
    }

    pub fn has_wind(&self) -> bool {
        self.viento > 0.0
    }

    pub fn has_ice(&self) -> bool {
        self.hielo > 0.0
    }
}

/// Record form of a state as it appears in the configuration map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub temperatura: f64,
    #[serde(default)]
    pub viento: f64,
    #[serde(default)]
    pub hielo: f64,
    #[serde(default)]
    pub descripcion: String,
}

/// All climatic states of a structure, keyed by id.
///
/// Serialized as a map `id -> record`; iteration order is the id order,
/// which keeps predicate tie-breaking deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, StateRecord>", into = "BTreeMap<String, StateRecord>")]
pub struct ClimaticStates {
    states: Vec<ClimaticState>,
}

impl From<BTreeMap<String, StateRecord>> for ClimaticStates {
    fn from(map: BTreeMap<String, StateRecord>) -> Self {
        let states = map
            .into_iter()
            .map(|(id, r)| ClimaticState {
                id,
                temperatura: r.temperatura,
                viento: r.viento,
                hielo: r.hielo,
                descripcion: r.descripcion,
            })
            .collect();
        ClimaticStates { states }
    }
}

impl From<ClimaticStates> for BTreeMap<String, StateRecord> {
    fn from(states: ClimaticStates) -> Self {
        states
            .states
            .into_iter()
            .map(|s| {
                (
                    s.id,
                    StateRecord {
                        temperatura: s.temperatura,
                        viento: s.viento,
                        hielo: s.hielo,
                        descripcion: s.descripcion,
                    },
                )
            })
            .collect()
    }
}

impl ClimaticStates {
    pub fn new(states: impl IntoIterator<Item = ClimaticState>) -> Self {
        let map: BTreeMap<String, ClimaticState> = states.into_iter().map(|s| (s.id.clone(), s)).collect();
        ClimaticStates {
            states: map.into_values().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClimaticState> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ClimaticState> {
        self.states.iter().find(|s| s.id == id)
    }

    pub fn require(&self, id: &str) -> CalcResult<&ClimaticState> {
        self.get(id)
            .ok_or_else(|| CalcError::missing_reference("climatic state", id))
    }

    pub fn validate(&self) -> CalcResult<()> {
        if self.states.is_empty() {
            return Err(CalcError::missing_field("estados_climaticos"));
        }
        for s in &self.states {
            if !s.temperatura.is_finite() || s.temperatura < -60.0 || s.temperatura > 80.0 {
                return Err(CalcError::invalid_input(
                    format!("estados_climaticos.{}.temperatura", s.id),
                    s.temperatura.to_string(),
                    "Temperature must be between -60 and 80 °C",
                ));
            }
            if s.viento < 0.0 || !s.viento.is_finite() {
                return Err(CalcError::invalid_input(
                    format!("estados_climaticos.{}.viento", s.id),
                    s.viento.to_string(),
                    "Wind velocity cannot be negative",
                ));
            }
            if s.hielo < 0.0 || s.hielo > 0.2 {
                return Err(CalcError::invalid_input(
                    format!("estados_climaticos.{}.hielo", s.id),
                    s.hielo.to_string(),
                    "Ice thickness must be between 0 and 0.2 m",
                ));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Predicates
    // ========================================================================

    /// State with the highest wind velocity (> 0).
    pub fn find_max_wind(&self) -> CalcResult<&ClimaticState> {
        max_by(self.states.iter().filter(|s| s.has_wind()), |s| s.viento)
            .ok_or_else(|| no_state("Vmax", "no state with wind velocity > 0"))
    }

    /// Lowest positive wind velocity below the maximum; the maximum-wind
    /// state itself when it is the only windy one.
    pub fn find_mean_wind(&self) -> CalcResult<&ClimaticState> {
        let vmax = self.find_max_wind()?;
        let below = self
            .states
            .iter()
            .filter(|s| s.has_wind() && s.viento < vmax.viento);
        Ok(min_by(below, |s| s.viento).unwrap_or(vmax))
    }

    pub fn find_min_temp(&self) -> CalcResult<&ClimaticState> {
        min_by(self.states.iter(), |s| s.temperatura)
            .ok_or_else(|| no_state("Tmin", "no climatic states"))
    }

    /// Mean annual temperature equivalent: no wind, no ice, T > 0, lowest T.
    pub fn find_mean_annual_equivalent(&self) -> CalcResult<&ClimaticState> {
        let calm = self
            .states
            .iter()
            .filter(|s| !s.has_wind() && !s.has_ice() && s.temperatura > 0.0);
        min_by(calm, |s| s.temperatura)
            .ok_or_else(|| no_state("TMA", "no calm ice-free state with T > 0"))
    }

    pub fn find_max_ice(&self) -> CalcResult<&ClimaticState> {
        max_by(self.states.iter().filter(|s| s.has_ice()), |s| s.hielo)
            .ok_or_else(|| no_state("Hielo", "no state with ice thickness > 0"))
    }

    /// State of the row with the largest horizontal tension.
    pub fn find_max_tension<'a>(&'a self, rows: &[StateRow]) -> CalcResult<&'a ClimaticState> {
        let row = rows
            .iter()
            .fold(None::<&StateRow>, |best, r| match best {
                Some(b) if b.h_dan >= r.h_dan => Some(b),
                _ => Some(r),
            })
            .ok_or_else(|| no_state("máximo", "empty CMC table"))?;
        self.require(&row.state_id)
    }
}

fn no_state(role: &str, reason: &str) -> CalcError {
    CalcError::invalid_input("estados_climaticos", role, reason)
}

fn max_by<'a>(it: impl Iterator<Item = &'a ClimaticState>, key: impl Fn(&ClimaticState) -> f64) -> Option<&'a ClimaticState> {
    it.fold(None, |best: Option<&ClimaticState>, s| match best {
        Some(b) if key(b) >= key(s) => Some(b),
        _ => Some(s),
    })
}

fn min_by<'a>(it: impl Iterator<Item = &'a ClimaticState>, key: impl Fn(&ClimaticState) -> f64) -> Option<&'a ClimaticState> {
    it.fold(None, |best: Option<&ClimaticState>, s| match best {
        Some(b) if key(b) <= key(s) => Some(b),
        _ => Some(s),
    })
}

// ============================================================================
// State Selector
// ============================================================================

/// Symbolic reference to a climatic state as written in hypothesis
/// catalogs: a role name or a literal state id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StateSelector {
    MaxWind,
    MeanWind,
    MinTemp,
    MeanAnnual,
    MaxIce,
    MaxTension,
    Id(String),
}

impl From<String> for StateSelector {
    fn from(s: String) -> Self {
        match s.trim() {
            "Vmax" => StateSelector::MaxWind,
            "Vmed" => StateSelector::MeanWind,
            "Tmin" => StateSelector::MinTemp,
            "TMA" => StateSelector::MeanAnnual,
            "Hielo" => StateSelector::MaxIce,
            "máximo" | "maximo" | "max" => StateSelector::MaxTension,
            other => StateSelector::Id(other.to_string()),
        }
    }
}

impl From<StateSelector> for String {
    fn from(s: StateSelector) -> Self {
        s.to_string()
    }
}

impl fmt::Display for StateSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateSelector::MaxWind => write!(f, "Vmax"),
            StateSelector::MeanWind => write!(f, "Vmed"),
            StateSelector::MinTemp => write!(f, "Tmin"),
            StateSelector::MeanAnnual => write!(f, "TMA"),
            StateSelector::MaxIce => write!(f, "Hielo"),
            StateSelector::MaxTension => write!(f, "máximo"),
            StateSelector::Id(id) => write!(f, "{}", id),
        }
    }
}

impl StateSelector {
    /// Resolve to a concrete state. `MaxTension` needs the CMC rows of the
    /// cable whose tension is being looked up.
    pub fn resolve<'a>(&self, states: &'a ClimaticStates, rows: Option<&[StateRow]>) -> CalcResult<&'a ClimaticState> {
        match self {
            StateSelector::MaxWind => states.find_max_wind(),
            StateSelector::MeanWind => states.find_mean_wind(),
            StateSelector::MinTemp => states.find_min_temp(),
            StateSelector::MeanAnnual => states.find_mean_annual_equivalent(),
            StateSelector::MaxIce => states.find_max_ice(),
            StateSelector::MaxTension => match rows {
                Some(rows) => states.find_max_tension(rows),
                None => Err(CalcError::internal("max-tension selector needs CMC rows")),
            },
            StateSelector::Id(id) => states.require(id),
        }
    }
}

//! Load origin tags.
//!
//! Every nodal load is tagged with where it comes from so reactions,
//! trees and reports can attribute each daN to a source.

use serde::{Deserialize, Serialize};

/// Origin of a nodal load component.
///
/// # Example
/// ```
/// use aea_core::loads::LoadOrigin;
///
/// assert_eq!(LoadOrigin::Tension.code(), "T");
/// assert_eq!(LoadOrigin::Wind.description(), "Viento");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LoadOrigin {
    /// P - cable, ice and insulator weight, point overloads
    Weight,
    /// V - wind on cables, strings and the pole
    Wind,
    /// T - cable tension
    Tension,
}

impl LoadOrigin {
    pub const ALL: [LoadOrigin; 3] = [LoadOrigin::Weight, LoadOrigin::Wind, LoadOrigin::Tension];

    pub fn code(&self) -> &'static str {
        match self {
            LoadOrigin::Weight => "P",
            LoadOrigin::Wind => "V",
            LoadOrigin::Tension => "T",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            LoadOrigin::Weight => "Peso",
            LoadOrigin::Wind => "Viento",
            LoadOrigin::Tension => "Tiro",
        }
    }

    /// Whether node rotation applies to this origin
    pub fn follows_node_rotation(&self) -> bool {
        matches!(self, LoadOrigin::Tension)
    }
}

impl std::fmt::Display for LoadOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_codes() {
        assert_eq!(LoadOrigin::Weight.code(), "P");
        assert_eq!(LoadOrigin::Wind.code(), "V");
        assert_eq!(LoadOrigin::Tension.to_string(), "T");
    }

    #[test]
    fn test_only_tension_rotates() {
        let rotating: Vec<_> = LoadOrigin::ALL.iter().filter(|o| o.follows_node_rotation()).collect();
        assert_eq!(rotating, vec![&LoadOrigin::Tension]);
    }
}

//! User-configurable feature settings.
//!
//! A [`Features`] value is always fully populated: construction goes
//! through `Default` and updates replace the whole struct, so no field is
//! ever observed half-initialized.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::keyboard;

/// The union of all user-configurable behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    /// Mapping from source key code to injection target key code.
    pub fn_remap: HashMap<u32, u16>,

    /// Automatic thermal profile switching on power source change.
    pub auto_thermal: AutoThermal,

    /// Executables cycled through on repeated ROG key presses.
    pub rog_remap: Vec<String>,
}

/// Automatic thermal profile switching settings. The profile names refer
/// to the live profile set by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoThermal {
    pub enabled: bool,
    pub plugged_in: String,
    pub unplugged: String,
}

impl Default for AutoThermal {
    fn default() -> Self {
        Self {
            enabled: false,
            plugged_in: "Balanced".to_string(),
            unplugged: "Quiet".to_string(),
        }
    }
}

impl Default for Features {
    fn default() -> Self {
        Self {
            fn_remap: HashMap::from([
                (keyboard::KEY_FN_LEFT, keyboard::KEY_PAGE_UP),
                (keyboard::KEY_FN_RIGHT, keyboard::KEY_PAGE_DOWN),
            ]),
            auto_thermal: AutoThermal::default(),
            rog_remap: vec!["gnome-system-monitor".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_fully_populated() {
        let features = Features::default();

        assert_eq!(
            features.fn_remap.get(&keyboard::KEY_FN_LEFT),
            Some(&keyboard::KEY_PAGE_UP)
        );
        assert_eq!(
            features.fn_remap.get(&keyboard::KEY_FN_RIGHT),
            Some(&keyboard::KEY_PAGE_DOWN)
        );
        assert!(!features.auto_thermal.enabled);
        assert_eq!(features.auto_thermal.plugged_in, "Balanced");
        assert_eq!(features.auto_thermal.unplugged, "Quiet");
        assert!(!features.rog_remap.is_empty());
    }

    #[test]
    fn features_round_trip_through_json() {
        let features = Features::default();
        let raw = serde_json::to_vec(&features).unwrap();
        let decoded: Features = serde_json::from_slice(&raw).unwrap();
        assert_eq!(decoded, features);
    }
}

//! Thermal profile model and switching.
//!
//! Profiles carry an opaque OS power-plan id and two fan curve strings.
//! Mapping a profile onto OS power plans is an external concern behind
//! [`PlatformThermal`]; this module owns the profile set, the cycling
//! state machine, and its persistence.

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    error::Error,
    hub::{Updatable, Update},
    persist::Registry,
    settings::AutoThermal,
};

const PERSIST_KEY: &str = "Thermal";

/// CPU/GPU throttle policy selected by a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThrottlePlan {
    Performance,
    Silent,
    Turbo,
}

/// One thermal profile. The profile set is ordered; order is display and
/// cycling order, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Opaque OS power plan identifier.
    pub power_plan: String,
    pub throttle_plan: ThrottlePlan,
    pub cpu_fan_curve: String,
    pub gpu_fan_curve: String,
}

impl Profile {
    /// Checks both fan curve strings for shape (`"30c:0%,40c:5%,..."`).
    pub fn validate(&self) -> Result<(), Error> {
        validate_curve(&self.cpu_fan_curve)?;
        validate_curve(&self.gpu_fan_curve)
    }
}

fn validate_curve(curve: &str) -> Result<(), Error> {
    let well_formed = |pair: &str| {
        pair.split_once(':').is_some_and(|(temp, speed)| {
            temp.strip_suffix('c')
                .is_some_and(|t| t.parse::<u8>().is_ok())
                && speed
                    .strip_suffix('%')
                    .is_some_and(|s| s.parse::<u8>().is_ok_and(|v| v <= 100))
        })
    };
    if curve.split(',').all(|pair| well_formed(pair.trim())) {
        Ok(())
    } else {
        Err(Error::InvalidRequest("malformed fan curve"))
    }
}

/// Compiled-in profile set. Profiles are intentionally not persisted:
/// every process start begins from these.
pub fn default_profiles() -> Vec<Profile> {
    let curve = |s: &str| s.to_string();
    vec![
        Profile {
            name: "Quiet".into(),
            power_plan: "power-saver".into(),
            throttle_plan: ThrottlePlan::Silent,
            cpu_fan_curve: curve("20c:0%,40c:0%,50c:10%,60c:20%,70c:35%,80c:55%,90c:65%,100c:65%"),
            gpu_fan_curve: curve("20c:0%,40c:0%,50c:10%,60c:20%,70c:35%,80c:55%,90c:65%,100c:65%"),
        },
        Profile {
            name: "Balanced".into(),
            power_plan: "balanced".into(),
            throttle_plan: ThrottlePlan::Performance,
            cpu_fan_curve: curve("20c:10%,40c:10%,50c:20%,60c:35%,70c:50%,80c:65%,90c:80%,100c:80%"),
            gpu_fan_curve: curve("20c:10%,40c:10%,50c:20%,60c:35%,70c:50%,80c:65%,90c:80%,100c:80%"),
        },
        Profile {
            name: "Turbo".into(),
            power_plan: "performance".into(),
            throttle_plan: ThrottlePlan::Turbo,
            cpu_fan_curve: curve("20c:20%,40c:30%,50c:40%,60c:55%,70c:70%,80c:85%,90c:100%,100c:100%"),
            gpu_fan_curve: curve("20c:20%,40c:30%,50c:40%,60c:55%,70c:70%,80c:85%,90c:100%,100c:100%"),
        },
    ]
}

/// Applies a profile to the operating system (power plan switch, throttle
/// and fan table writes). External collaborator; the default just logs.
pub trait PlatformThermal: Send + Sync {
    fn apply(&self, profile: &Profile) -> Result<(), Error>;
}

/// Default platform backend that only records the switch.
pub struct LogPlatform;

impl PlatformThermal for LogPlatform {
    fn apply(&self, profile: &Profile) -> Result<(), Error> {
        info!(
            "thermal: applying profile \"{}\" (power plan {})",
            profile.name, profile.power_plan
        );
        Ok(())
    }
}

struct ThermalState {
    profiles: Vec<Profile>,
    current: usize,
    auto: AutoThermal,
}

/// Thermal profile switcher.
///
/// Holds the ordered profile set and the index of the active profile.
/// Participates in configuration fanout (profile set replacement) and in
/// persistence (active profile name only; the set itself resets to the
/// compiled-in defaults on every start).
pub struct Control {
    state: RwLock<ThermalState>,
    platform: Box<dyn PlatformThermal>,
}

impl Control {
    pub fn new(profiles: Vec<Profile>, platform: Box<dyn PlatformThermal>) -> Self {
        Self {
            state: RwLock::new(ThermalState {
                profiles,
                current: 0,
                auto: AutoThermal::default(),
            }),
            platform,
        }
    }

    /// Advances to the next profile in display order, wrapping around,
    /// and applies it. Returns the new profile's name.
    pub async fn next_profile(&self) -> Result<String, Error> {
        let mut state = self.state.write().await;
        state.current = (state.current + 1) % state.profiles.len();
        let profile = &state.profiles[state.current];
        self.platform.apply(profile)?;
        Ok(profile.name.clone())
    }

    pub async fn current_profile(&self) -> Profile {
        let state = self.state.read().await;
        state.profiles[state.current].clone()
    }

    /// Reacts to a power source change by switching to the profile
    /// configured for it, when automatic switching is enabled.
    ///
    /// The caller is the platform's power event source; this only selects
    /// and applies. Returns the applied profile's name, or `None` when
    /// switching is disabled or the configured profile is unknown.
    pub async fn power_source_changed(&self, plugged: bool) -> Result<Option<String>, Error> {
        let mut state = self.state.write().await;
        if !state.auto.enabled {
            return Ok(None);
        }
        let wanted = if plugged {
            &state.auto.plugged_in
        } else {
            &state.auto.unplugged
        };
        let Some(idx) = state.profiles.iter().position(|p| p.name == *wanted) else {
            warn!("auto thermal: no profile named \"{wanted}\"");
            return Ok(None);
        };

        state.current = idx;
        let profile = &state.profiles[idx];
        self.platform.apply(profile)?;
        Ok(Some(profile.name.clone()))
    }
}

#[async_trait]
impl Registry for Control {
    fn name(&self) -> &'static str {
        PERSIST_KEY
    }

    async fn value(&self) -> Vec<u8> {
        let state = self.state.read().await;
        serde_json::to_vec(&state.profiles[state.current].name).unwrap_or_default()
    }

    async fn load(&self, raw: &[u8]) -> Result<(), Error> {
        if raw.is_empty() {
            return Ok(());
        }
        let name: String = serde_json::from_slice(raw).map_err(|e| Error::Decode {
            name: PERSIST_KEY,
            reason: e.to_string(),
        })?;

        let mut state = self.state.write().await;
        match state.profiles.iter().position(|p| p.name == name) {
            Some(idx) => {
                state.current = idx;
                Ok(())
            }
            None => Err(Error::Decode {
                name: PERSIST_KEY,
                reason: format!("unknown profile \"{name}\""),
            }),
        }
    }

    async fn apply(&self) -> Result<(), Error> {
        let state = self.state.read().await;
        self.platform.apply(&state.profiles[state.current])
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl Updatable for Control {
    fn name(&self) -> &'static str {
        "Thermal"
    }

    async fn config_update(&self, update: Update) {
        match update {
            Update::Features(features) => {
                self.state.write().await.auto = features.auto_thermal;
            }
            Update::Profiles(profiles) => {
                if profiles.is_empty() {
                    return;
                }
                let mut state = self.state.write().await;
                // Keep the active profile by name when it survives the swap.
                let active = state.profiles[state.current].name.clone();
                state.current = profiles
                    .iter()
                    .position(|p| p.name == active)
                    .unwrap_or(0);
                state.profiles = profiles;
            }
        }
    }
}

//! Connection-quality signal used to pick a preload profile.

use std::str::FromStr;

use chime_core::{Error, PreloadProfile};
use serde::{Deserialize, Serialize};

/// Coarse connection class as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl FromStr for EffectiveType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Ok(Self::Slow2g),
            "2g" => Ok(Self::TwoG),
            "3g" => Ok(Self::ThreeG),
            "4g" => Ok(Self::FourG),
            "unknown" | "" => Ok(Self::Unknown),
            other => Err(Error::InvalidArgument(format!(
                "unknown connection type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub effective_type: EffectiveType,
    /// Estimated bandwidth, if the host reports one.
    pub downlink_mbps: Option<f64>,
    /// User asked to reduce data usage.
    pub save_data: bool,
}

impl ConnectionInfo {
    pub const fn new(effective_type: EffectiveType) -> Self {
        Self {
            effective_type,
            downlink_mbps: None,
            save_data: false,
        }
    }

    #[must_use]
    pub fn with_downlink(mut self, mbps: f64) -> Self {
        self.downlink_mbps = Some(mbps);
        self
    }

    #[must_use]
    pub const fn with_save_data(mut self, save_data: bool) -> Self {
        self.save_data = save_data;
        self
    }
}

/// Fast → aggressive, slow or constrained → conservative, otherwise normal.
/// No signal means normal.
pub fn profile_for(connection: Option<&ConnectionInfo>) -> PreloadProfile {
    let Some(info) = connection else {
        return PreloadProfile::Normal;
    };

    let slow_link = info.downlink_mbps.is_some_and(|mbps| mbps < 1.0);
    if info.save_data
        || slow_link
        || matches!(info.effective_type, EffectiveType::Slow2g | EffectiveType::TwoG)
    {
        return PreloadProfile::Conservative;
    }

    if info.effective_type == EffectiveType::FourG
        && info.downlink_mbps.map_or(true, |mbps| mbps >= 5.0)
    {
        return PreloadProfile::Aggressive;
    }

    PreloadProfile::Normal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_signal_is_normal() {
        assert_eq!(profile_for(None), PreloadProfile::Normal);
        assert_eq!(
            profile_for(Some(&ConnectionInfo::default())),
            PreloadProfile::Normal
        );
    }

    #[test]
    fn test_fast_connection_is_aggressive() {
        let fast = ConnectionInfo::new(EffectiveType::FourG).with_downlink(12.0);
        assert_eq!(profile_for(Some(&fast)), PreloadProfile::Aggressive);

        let unknown_bandwidth = ConnectionInfo::new(EffectiveType::FourG);
        assert_eq!(profile_for(Some(&unknown_bandwidth)), PreloadProfile::Aggressive);

        let throttled = ConnectionInfo::new(EffectiveType::FourG).with_downlink(3.0);
        assert_eq!(profile_for(Some(&throttled)), PreloadProfile::Normal);
    }

    #[test]
    fn test_constrained_connection_is_conservative() {
        for info in [
            ConnectionInfo::new(EffectiveType::Slow2g),
            ConnectionInfo::new(EffectiveType::TwoG),
            ConnectionInfo::new(EffectiveType::FourG).with_save_data(true),
            ConnectionInfo::new(EffectiveType::ThreeG).with_downlink(0.4),
        ] {
            assert_eq!(profile_for(Some(&info)), PreloadProfile::Conservative);
        }
    }

    #[test]
    fn test_parse_effective_type() {
        assert_eq!("4G".parse::<EffectiveType>().ok(), Some(EffectiveType::FourG));
        assert_eq!("slow-2g".parse::<EffectiveType>().ok(), Some(EffectiveType::Slow2g));
        assert!("5g".parse::<EffectiveType>().is_err());
    }
}

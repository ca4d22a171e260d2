use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProfilerError;

/// How much the profiler records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum ProfilingLevel {
    /// Nothing is recorded
    #[default]
    Off = 0,
    /// Only operations slower than the slow threshold
    SlowOnly = 1,
    /// Every operation
    All = 2,
}

impl ProfilingLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a stored level; unknown values read as `Off`
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ProfilingLevel::SlowOnly,
            2 => ProfilingLevel::All,
            _ => ProfilingLevel::Off,
        }
    }
}

impl TryFrom<i64> for ProfilingLevel {
    type Error = ProfilerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProfilingLevel::Off),
            1 => Ok(ProfilingLevel::SlowOnly),
            2 => Ok(ProfilingLevel::All),
            other => Err(ProfilerError::InvalidLevel(other)),
        }
    }
}

impl fmt::Display for ProfilingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfilingLevel::Off => "off",
            ProfilingLevel::SlowOnly => "slow",
            ProfilingLevel::All => "all",
        };
        write!(f, "{} ({})", self.as_u8(), name)
    }
}

// Levels travel as their numeric form, matching the administrative call.
impl Serialize for ProfilingLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for ProfilingLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        ProfilingLevel::try_from(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_from_valid_levels() {
        assert_eq!(ProfilingLevel::try_from(0).unwrap(), ProfilingLevel::Off);
        assert_eq!(ProfilingLevel::try_from(1).unwrap(), ProfilingLevel::SlowOnly);
        assert_eq!(ProfilingLevel::try_from(2).unwrap(), ProfilingLevel::All);
    }

    #[test]
    fn test_try_from_invalid_level() {
        assert_eq!(
            ProfilingLevel::try_from(3),
            Err(ProfilerError::InvalidLevel(3))
        );
        assert!(ProfilingLevel::try_from(-1).is_err());
    }

    #[test]
    fn test_serde_numeric() {
        let json = serde_json::to_string(&ProfilingLevel::All).unwrap();
        assert_eq!(json, "2");
        let level: ProfilingLevel = serde_json::from_str("1").unwrap();
        assert_eq!(level, ProfilingLevel::SlowOnly);
        assert!(serde_json::from_str::<ProfilingLevel>("7").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProfilingLevel::SlowOnly.to_string(), "1 (slow)");
    }
}

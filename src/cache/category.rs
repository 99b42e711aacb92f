use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cache category. Each has a fixed time-to-live.
///
/// Unknown category names fall back to [`CacheCategory::Temporary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    UserProfile,
    OdRequests,
    StaffDirectory,
    Timetable,
    Analytics,
    Temporary,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 6] = [
        Self::UserProfile,
        Self::OdRequests,
        Self::StaffDirectory,
        Self::Timetable,
        Self::Analytics,
        Self::Temporary,
    ];

    /// Nominal time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        match self {
            Self::UserProfile => Duration::from_secs(24 * HOUR),
            Self::OdRequests => Duration::from_secs(2 * HOUR),
            Self::StaffDirectory => Duration::from_secs(7 * 24 * HOUR),
            Self::Timetable => Duration::from_secs(24 * HOUR),
            Self::Analytics => Duration::from_secs(15 * MINUTE),
            Self::Temporary => Duration::from_secs(15 * MINUTE),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserProfile => "user_profile",
            Self::OdRequests => "od_requests",
            Self::StaffDirectory => "staff_directory",
            Self::Timetable => "timetable",
            Self::Analytics => "analytics",
            Self::Temporary => "temporary",
        }
    }

    /// Lenient lookup by name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == name)
            .unwrap_or(Self::Temporary)
    }
}

impl Default for CacheCategory {
    fn default() -> Self {
        Self::Temporary
    }
}

impl std::fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

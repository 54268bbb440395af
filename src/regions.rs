//! Geographic regions used to pick a probe subset.

use serde::Serialize;

const AFRICAN_COUNTRIES: &[&str] = &[
    "DZ", "AO", "BJ", "BW", "BF", "BI", "CM", "CV", "CF", "TD", "KM", "CD", "CG", "CI", "DJ",
    "EG", "GQ", "ER", "SZ", "ET", "GA", "GM", "GH", "GN", "GW", "KE", "LS", "LR", "LY", "MG",
    "MW", "ML", "MR", "MU", "MA", "MZ", "NA", "NE", "NG", "RW", "ST", "SN", "SC", "SL", "SO",
    "ZA", "SS", "SD", "TZ", "TG", "TN", "UG", "ZM", "ZW",
];

const SOUTH_AMERICAN_COUNTRIES: &[&str] = &[
    "AR", "BO", "BR", "CL", "CO", "EC", "FK", "GF", "GY", "PE", "PY", "SR", "UY", "VE",
];

/// A continent grouping with a fixed country set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Region {
    Africa,
    SouthAmerica,
}

impl Region {
    /// Region used when a caller passes an unknown code.
    pub const DEFAULT: Region = Region::Africa;

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "AF" => Some(Region::Africa),
            "SA" => Some(Region::SouthAmerica),
            _ => None,
        }
    }

    /// Like [`Region::from_code`], but unknown codes fall back to [`Region::DEFAULT`].
    pub fn resolve(code: &str) -> Self {
        Self::from_code(code).unwrap_or_else(|| {
            tracing::warn!("Unknown region code {:?}, falling back to {}", code, Self::DEFAULT.name());
            Self::DEFAULT
        })
    }

    pub fn code(self) -> &'static str {
        match self {
            Region::Africa => "AF",
            Region::SouthAmerica => "SA",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Region::Africa => "Africa",
            Region::SouthAmerica => "South America",
        }
    }

    pub fn countries(self) -> &'static [&'static str] {
        match self {
            Region::Africa => AFRICAN_COUNTRIES,
            Region::SouthAmerica => SOUTH_AMERICAN_COUNTRIES,
        }
    }

    pub fn contains(self, country_code: &str) -> bool {
        self.countries().contains(&country_code)
    }

    /// File name of this region's probe cache.
    pub fn probe_cache_file(self) -> &'static str {
        match self {
            Region::Africa => "african_active_probes.csv",
            Region::SouthAmerica => "south_american_active_probes.csv",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code() {
        assert_eq!(Region::from_code("AF"), Some(Region::Africa));
        assert_eq!(Region::from_code(" sa "), Some(Region::SouthAmerica));
        assert_eq!(Region::from_code("EU"), None);
    }

    #[test]
    fn test_unknown_code_falls_back() {
        assert_eq!(Region::resolve("XX"), Region::Africa);
        assert_eq!(Region::resolve("SA"), Region::SouthAmerica);
    }

    #[test]
    fn test_country_membership() {
        assert!(Region::Africa.contains("KE"));
        assert!(!Region::Africa.contains("BR"));
        assert!(Region::SouthAmerica.contains("BR"));
        assert_eq!(Region::Africa.countries().len(), 54);
    }
}

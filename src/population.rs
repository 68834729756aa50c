//! Patient population cohorts.
//!
//! Every ingredient record is defined for exactly one population. Linking
//! associates records that describe the same clinical ingredient across
//! different populations, so the population set is closed and ordered.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A patient cohort category under which an ingredient may have a
/// distinct record.
///
/// The ordering is the clinical age progression, which also gives maps
/// keyed by population a deterministic iteration order.
///
/// # Examples
///
/// ```
/// use formlink::Population;
///
/// let pop: Population = "neonatal".parse().unwrap();
/// assert_eq!(pop, Population::Neonatal);
/// assert_eq!(pop.to_string(), "neonatal");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Population {
    /// Birth through the first month of life.
    Neonatal,
    /// One month through twelve years.
    Child,
    /// Thirteen through seventeen years.
    Adolescent,
    /// Eighteen years and older.
    Adult,
}

impl Population {
    /// All populations, in cohort order.
    pub const ALL: [Self; 4] = [Self::Neonatal, Self::Child, Self::Adolescent, Self::Adult];

    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neonatal => "neonatal",
            Self::Child => "child",
            Self::Adolescent => "adolescent",
            Self::Adult => "adult",
        }
    }
}

impl fmt::Display for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Population {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.eq_ignore_ascii_case("neonatal") {
            Ok(Self::Neonatal)
        } else if value.eq_ignore_ascii_case("child") {
            Ok(Self::Child)
        } else if value.eq_ignore_ascii_case("adolescent") {
            Ok(Self::Adolescent)
        } else if value.eq_ignore_ascii_case("adult") {
            Ok(Self::Adult)
        } else {
            Err(format!(
                "unknown population: {value}. Expected one of neonatal, child, adolescent, adult"
            ))
        }
    }
}

//! Coordinate Reference System handling
//!
//! All network data lives in a projected national grid. Geographic CRSs
//! are rejected at load time since areas and lengths are taken in CRS units.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG code of the Dutch national grid (Amersfoort / RD New)
pub const RD_NEW_EPSG: u32 = 28992;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CRS {
    /// EPSG code if known
    epsg: Option<u32>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self { epsg: Some(code) }
    }

    /// Amersfoort / RD New (EPSG:28992)
    pub fn rd_new() -> Self {
        Self::from_epsg(RD_NEW_EPSG)
    }

    /// Parse identifiers like `"EPSG:28992"` or `"epsg:28992"`
    pub fn parse(identifier: &str) -> Result<Self> {
        let trimmed = identifier.trim();
        let code = trimmed
            .split_once(':')
            .filter(|(auth, _)| auth.eq_ignore_ascii_case("epsg"))
            .and_then(|(_, code)| code.parse::<u32>().ok())
            .ok_or_else(|| Error::InvalidParameter {
                name: "crs",
                value: trimmed.to_string(),
                reason: "expected EPSG:<code>".into(),
            })?;
        Ok(Self::from_epsg(code))
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Geographic (degree based) CRSs we know about
    pub fn is_geographic(&self) -> bool {
        matches!(self.epsg, Some(4326) | Some(4258) | Some(4289))
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        matches!((self.epsg, other.epsg), (Some(a), Some(b)) if a == b)
    }

    /// Fails when the CRS is not projected.
    pub fn require_projected(&self) -> Result<()> {
        if self.is_geographic() {
            return Err(Error::InvalidParameter {
                name: "crs",
                value: self.identifier(),
                reason: "a projected CRS is required".into(),
            });
        }
        Ok(())
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        match self.epsg {
            Some(code) => format!("EPSG:{}", code),
            None => "Unknown".to_string(),
        }
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::rd_new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_default_is_rd_new() {
        let crs = CRS::default();
        assert_eq!(crs.epsg(), Some(28992));
        assert_eq!(crs.identifier(), "EPSG:28992");
    }

    #[test]
    fn test_crs_parse() {
        assert!(CRS::parse("epsg:28992").unwrap().is_equivalent(&CRS::rd_new()));
        assert!(CRS::parse("28992").is_err());
    }

    #[test]
    fn test_geographic_rejected() {
        assert!(CRS::from_epsg(4326).require_projected().is_err());
        assert!(CRS::rd_new().require_projected().is_ok());
    }
}

//! Encode spec parsing.
//!
//! An encode spec names one transform and its parameters using the grammar
//! `TYPE ":" Algorithm ["/" Parameter]`, for example `COMP:LZMA/5` or
//! `ENC:AES/CBC/PKCS5Padding`. The same string selects a codec when a chain
//! is built and is persisted in the transform-mode list so the transform can
//! be reversed later.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Spec type for compression codecs.
pub const TYPE_COMPRESSION: &str = "COMP";

/// Spec type for encryption codecs.
pub const TYPE_ENCRYPTION: &str = "ENC";

/// A parsed `TYPE:Algorithm[/Parameter]` transform identifier.
///
/// The original string is kept verbatim so that it round-trips exactly
/// through the metadata map.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodeSpec {
    raw: String,
    colon: usize,
}

impl EncodeSpec {
    /// Parses an encode spec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] if the string has no `:` separator, an
    /// empty type or algorithm, or contains a `,` (which would corrupt the
    /// transform-mode list).
    pub fn parse(spec: impl Into<String>) -> Result<Self> {
        let raw = spec.into();
        let invalid = |reason| Error::InvalidSpec {
            spec: raw.clone(),
            reason,
        };

        if raw.contains(',') {
            return Err(invalid("spec must not contain ','"));
        }
        let colon = raw.find(':').ok_or_else(|| invalid("missing ':' separator"))?;
        if colon == 0 {
            return Err(invalid("empty type"));
        }
        if colon + 1 == raw.len() {
            return Err(invalid("empty algorithm"));
        }
        Ok(Self { raw, colon })
    }

    /// Builds a spec from its type and algorithm parts.
    pub fn from_parts(spec_type: &str, algorithm: &str) -> Result<Self> {
        Self::parse(format!("{spec_type}:{algorithm}"))
    }

    /// Builds a spec from parts known to be well formed.
    pub(crate) fn from_trusted(spec_type: &str, algorithm: &str) -> Self {
        Self {
            raw: format!("{spec_type}:{algorithm}"),
            colon: spec_type.len(),
        }
    }

    /// Returns the full spec string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the codec family, e.g. `COMP`.
    pub fn spec_type(&self) -> &str {
        &self.raw[..self.colon]
    }

    /// Returns everything after the type, e.g. `LZMA/5` or `AES/CBC/PKCS5Padding`.
    pub fn algorithm(&self) -> &str {
        &self.raw[self.colon + 1..]
    }

    /// Returns the algorithm name up to the first `/`, e.g. `LZMA`.
    pub fn base_algorithm(&self) -> &str {
        let algorithm = self.algorithm();
        algorithm.split_once('/').map_or(algorithm, |(base, _)| base)
    }

    /// Returns the text after the first `/` of the algorithm, if any.
    pub fn parameter(&self) -> Option<&str> {
        self.algorithm().split_once('/').map(|(_, param)| param)
    }

    /// Returns `true` if this spec has the given type and base algorithm.
    pub fn is(&self, spec_type: &str, base_algorithm: &str) -> bool {
        self.spec_type() == spec_type && self.base_algorithm() == base_algorithm
    }

    /// Parses the parameter as a compression level, or returns `default`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSpec`] for a non-numeric parameter and
    /// [`Error::InvalidCompressionLevel`] for levels above 9.
    pub fn compression_level(&self, default: u32) -> Result<u32> {
        let Some(param) = self.parameter() else {
            return Ok(default);
        };
        let level: u32 = param.parse().map_err(|_| Error::InvalidSpec {
            spec: self.raw.clone(),
            reason: "compression level must be a number",
        })?;
        if level > 9 {
            return Err(Error::InvalidCompressionLevel { level });
        }
        Ok(level)
    }
}

impl fmt::Display for EncodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for EncodeSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for EncodeSpec {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compression_spec() {
        let spec = EncodeSpec::parse("COMP:LZMA/5").unwrap();
        assert_eq!(spec.spec_type(), "COMP");
        assert_eq!(spec.algorithm(), "LZMA/5");
        assert_eq!(spec.base_algorithm(), "LZMA");
        assert_eq!(spec.parameter(), Some("5"));
        assert!(spec.is(TYPE_COMPRESSION, "LZMA"));
        assert_eq!(spec.compression_level(9).unwrap(), 5);
    }

    #[test]
    fn test_parse_encryption_spec() {
        let spec: EncodeSpec = "ENC:AES/CBC/PKCS5Padding".parse().unwrap();
        assert_eq!(spec.spec_type(), "ENC");
        assert_eq!(spec.algorithm(), "AES/CBC/PKCS5Padding");
        assert_eq!(spec.base_algorithm(), "AES");
        assert_eq!(spec.parameter(), Some("CBC/PKCS5Padding"));
        assert_eq!(spec.to_string(), "ENC:AES/CBC/PKCS5Padding");
    }

    #[test]
    fn test_level_defaults_when_absent() {
        let spec = EncodeSpec::parse("COMP:Deflate").unwrap();
        assert_eq!(spec.parameter(), None);
        assert_eq!(spec.compression_level(5).unwrap(), 5);
    }

    #[test]
    fn test_level_out_of_range() {
        let spec = EncodeSpec::parse("COMP:Deflate/12").unwrap();
        assert!(matches!(
            spec.compression_level(5),
            Err(Error::InvalidCompressionLevel { level: 12 })
        ));
        let spec = EncodeSpec::parse("COMP:Deflate/fast").unwrap();
        assert!(matches!(
            spec.compression_level(5),
            Err(Error::InvalidSpec { .. })
        ));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "LZMA", ":LZMA", "COMP:", "COMP:LZMA,ENC:AES"] {
            assert!(EncodeSpec::parse(bad).is_err(), "accepted {bad:?}");
        }
    }
}

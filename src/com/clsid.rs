//! Class identifiers.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A COM class identifier.
///
/// Registry subkeys and command-line arguments spell a CLSID in braces,
/// `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`; that is the only accepted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Clsid(Uuid);

impl Clsid {
    /// The all-zero CLSID.
    pub const NIL: Clsid = Clsid(Uuid::nil());

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse the braced textual form.
    pub fn parse_braced(text: &str) -> Result<Self> {
        let inner = text
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .ok_or_else(|| Error::InvalidClsid(text.to_string()))?;

        // Reject the braced/urn forms uuid would otherwise accept inside braces
        if inner.len() != 36 {
            return Err(Error::InvalidClsid(text.to_string()));
        }

        Uuid::parse_str(inner)
            .map(Self)
            .map_err(|_| Error::InvalidClsid(text.to_string()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }

    /// Convert to the Win32 GUID layout.
    #[cfg(target_os = "windows")]
    pub fn to_guid(&self) -> windows::core::GUID {
        windows::core::GUID::from_u128(self.0.as_u128())
    }
}

impl FromStr for Clsid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_braced(s.trim())
    }
}

impl fmt::Display for Clsid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated().to_string().to_uppercase())
    }
}

impl TryFrom<String> for Clsid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Clsid> for String {
    fn from(clsid: Clsid) -> Self {
        clsid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let clsid: Clsid = "{0002df01-0000-0000-c000-000000000046}".parse().unwrap();
        assert_eq!(clsid.to_string(), "{0002DF01-0000-0000-C000-000000000046}");
        assert_eq!(clsid.as_u128(), 0x0002df01_0000_0000_c000_000000000046);
    }

    #[test]
    fn test_textual_form_is_stable() {
        let text = "{00024500-0000-0000-C000-000000000046}";
        let once: Clsid = text.parse().unwrap();
        let twice: Clsid = once.to_string().parse().unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.to_string(), text);
    }

    #[test]
    fn test_nil_is_valid() {
        let clsid = Clsid::parse_braced("{00000000-0000-0000-0000-000000000000}").unwrap();
        assert_eq!(clsid, Clsid::NIL);
    }

    #[test]
    fn test_rejects_malformed() {
        for text in [
            "{1234-invalid}",
            "1234-invalid",
            "00000000-0000-0000-0000-000000000000",
            "{00000000-0000-0000-0000-000000000000",
            "{00000000000000000000000000000000}",
            "{{00000000-0000-0000-0000-000000000000}}",
            "{0000000g-0000-0000-0000-000000000000}",
            "{}",
            "",
        ] {
            assert!(
                matches!(Clsid::parse_braced(text), Err(Error::InvalidClsid(_))),
                "{:?} should be rejected",
                text
            );
        }
    }

    #[test]
    fn test_serde_uses_braced_text() {
        let clsid: Clsid = "{0002DF01-0000-0000-C000-000000000046}".parse().unwrap();
        let json = serde_json::to_string(&clsid).unwrap();
        assert_eq!(json, "\"{0002DF01-0000-0000-C000-000000000046}\"");
        assert_eq!(serde_json::from_str::<Clsid>(&json).unwrap(), clsid);
    }
}

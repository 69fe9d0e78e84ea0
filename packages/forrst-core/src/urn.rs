//! URN validation and the closed set of system function URNs.
//!
//! Function URNs follow `urn:<vendor>:forrst:(ext:<name>:)?fn:<name>`, extension
//! URNs follow `urn:<vendor>:forrst:ext:<name>`. Names are lowercase
//! alphanumerics separated by `-` or `.`. Validation is a pure function,
//! independent of [`SystemFunction`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Vendor segment reserved for functions shipped with the protocol itself.
pub const RESERVED_VENDOR: &str = "cline";

const NAME: &str = r"[a-z0-9]+(?:[-.][a-z0-9]+)*";

static FUNCTION_URN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^urn:(?P<vendor>{NAME}):forrst:(?:ext:(?P<ext>{NAME}):)?fn:(?P<name>{NAME})$"
    ))
    .expect("function URN pattern is valid")
});

static EXTENSION_URN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^urn:(?P<vendor>{NAME}):forrst:ext:(?P<name>{NAME})$"))
        .expect("extension URN pattern is valid")
});

/// The parts of a validated function URN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionUrn {
    pub vendor: String,
    /// Owning extension for extension-scoped functions (`...:ext:async:fn:status`).
    pub extension: Option<String>,
    pub name: String,
}

impl FunctionUrn {
    /// Parses and validates a function URN.
    #[must_use]
    pub fn parse(urn: &str) -> Option<Self> {
        let caps = FUNCTION_URN.captures(urn)?;
        Some(Self {
            vendor: caps["vendor"].to_string(),
            extension: caps.name("ext").map(|m| m.as_str().to_string()),
            name: caps["name"].to_string(),
        })
    }

    /// Whether the URN sits in the vendor namespace reserved for system functions.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.vendor == RESERVED_VENDOR
    }
}

impl fmt::Display for FunctionUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "urn:{}:forrst:", self.vendor)?;
        if let Some(ext) = &self.extension {
            write!(f, "ext:{ext}:")?;
        }
        write!(f, "fn:{}", self.name)
    }
}

/// Returns `true` if `urn` is a well-formed function URN.
#[must_use]
pub fn is_valid_function_urn(urn: &str) -> bool {
    FUNCTION_URN.is_match(urn)
}

/// Returns `true` if `urn` is a well-formed extension URN.
#[must_use]
pub fn is_valid_extension_urn(urn: &str) -> bool {
    EXTENSION_URN.is_match(urn)
}

// ---------------------------------------------------------------------------
// Known URNs
// ---------------------------------------------------------------------------

/// Extension URNs shipped with the protocol.
pub mod extensions {
    pub const ASYNC: &str = "urn:cline:forrst:ext:async";
    pub const CACHING: &str = "urn:cline:forrst:ext:caching";
    pub const DEADLINE: &str = "urn:cline:forrst:ext:deadline";
    pub const RATE_LIMIT: &str = "urn:cline:forrst:ext:rate-limit";
}

/// Version under which every [`SystemFunction`] is registered.
pub const SYSTEM_FUNCTION_VERSION: &str = "1.0.0";

/// System functions known to every Forrst server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemFunction {
    Ping,
    OperationStatus,
    OperationCancel,
    OperationList,
}

impl SystemFunction {
    pub const ALL: [Self; 4] = [
        Self::Ping,
        Self::OperationStatus,
        Self::OperationCancel,
        Self::OperationList,
    ];

    #[must_use]
    pub const fn urn(self) -> &'static str {
        match self {
            Self::Ping => "urn:cline:forrst:fn:ping",
            Self::OperationStatus => "urn:cline:forrst:ext:async:fn:status",
            Self::OperationCancel => "urn:cline:forrst:ext:async:fn:cancel",
            Self::OperationList => "urn:cline:forrst:ext:async:fn:list",
        }
    }

    #[must_use]
    pub fn from_urn(urn: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.urn() == urn)
    }
}

impl fmt::Display for SystemFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.urn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_function_urn() {
        let urn = FunctionUrn::parse("urn:acme:forrst:fn:orders.list").unwrap();
        assert_eq!(urn.vendor, "acme");
        assert_eq!(urn.extension, None);
        assert_eq!(urn.name, "orders.list");
        assert!(!urn.is_reserved());
        assert_eq!(urn.to_string(), "urn:acme:forrst:fn:orders.list");
    }

    #[test]
    fn parses_extension_scoped_function_urn() {
        let urn = FunctionUrn::parse("urn:cline:forrst:ext:async:fn:status").unwrap();
        assert_eq!(urn.extension.as_deref(), Some("async"));
        assert!(urn.is_reserved());
    }

    #[test]
    fn rejects_malformed_urns() {
        for bad in [
            "",
            "urn:acme:forrst:orders",
            "urn:Acme:forrst:fn:orders",
            "urn:acme:other:fn:orders",
            "urn:acme:forrst:fn:",
            "urn:acme:forrst:fn:orders:list",
            "urn:acme:forrst:ext:async",
        ] {
            assert!(!is_valid_function_urn(bad), "{bad} should be rejected");
        }
    }

    #[test]
    fn validates_extension_urns() {
        assert!(is_valid_extension_urn(extensions::RATE_LIMIT));
        assert!(is_valid_extension_urn("urn:acme:forrst:ext:audit-log"));
        assert!(!is_valid_extension_urn("urn:acme:forrst:fn:ping"));
    }

    #[test]
    fn system_function_urns_are_valid_and_round_trip() {
        for f in SystemFunction::ALL {
            assert!(is_valid_function_urn(f.urn()), "{f}");
            assert_eq!(SystemFunction::from_urn(f.urn()), Some(f));
        }
        assert_eq!(SystemFunction::from_urn("urn:acme:forrst:fn:ping"), None);
    }
}

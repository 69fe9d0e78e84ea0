//! Versioned function registry.
//!
//! Each function URN maps to its registered versions kept in ascending semver
//! precedence. Several versions of one function coexist for staged rollout;
//! [`FunctionRegistry::resolve`] never crosses to an unstable release unless
//! the caller asks for one by exact version or stability alias.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use forrst_core::{ForrstError, FunctionUrn};
use semver::Version;
use serde::Serialize;
use tracing::debug;

use super::FunctionHandler;

// ---------------------------------------------------------------------------
// Stability
// ---------------------------------------------------------------------------

/// Release channel derived from a version's prerelease tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    Stable,
    Rc,
    Beta,
    Alpha,
}

impl Stability {
    /// No prerelease is `Stable`; `alpha*`, `beta*` and `rc*` map to their
    /// channel; any other prerelease text is treated as `Alpha`.
    #[must_use]
    pub fn of(version: &Version) -> Self {
        let pre = version.pre.as_str();
        if pre.is_empty() {
            Self::Stable
        } else if pre.starts_with("beta") {
            Self::Beta
        } else if pre.starts_with("rc") {
            Self::Rc
        } else {
            Self::Alpha
        }
    }

    /// Parses a stability alias used as a version selector.
    #[must_use]
    pub fn from_alias(alias: &str) -> Option<Self> {
        match alias {
            "stable" => Some(Self::Stable),
            "rc" => Some(Self::Rc),
            "beta" => Some(Self::Beta),
            "alpha" => Some(Self::Alpha),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Rc => "rc",
            Self::Beta => "beta",
            Self::Alpha => "alpha",
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selector alias for "highest registered version of any stability".
pub const DEV_ALIAS: &str = "dev";

// ---------------------------------------------------------------------------
// FunctionRegistration
// ---------------------------------------------------------------------------

/// One `(urn, version)` entry of the registry.
pub struct FunctionRegistration {
    pub urn: String,
    pub version: Version,
    pub stability: Stability,
    pub handler: Arc<dyn FunctionHandler>,
    /// Registered through [`FunctionRegistry::register_system`].
    pub system: bool,
}

impl fmt::Debug for FunctionRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistration")
            .field("urn", &self.urn)
            .field("version", &self.version.to_string())
            .field("stability", &self.stability)
            .field("system", &self.system)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

/// Errors from registering or resolving functions.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid function urn: {urn}")]
    InvalidUrn { urn: String },

    #[error("invalid version `{version}` for {urn}: {reason}")]
    InvalidVersion {
        urn: String,
        version: String,
        reason: String,
    },

    #[error("{urn} version {version} is already registered")]
    Conflict { urn: String, version: String },

    #[error("namespace of {urn} is reserved for system functions")]
    ReservedNamespace { urn: String },

    #[error("function not found: {urn}")]
    FunctionNotFound { urn: String },

    #[error("no version of {urn} matches {}", .selector.as_deref().unwrap_or("latest stable"))]
    VersionNotFound {
        urn: String,
        selector: Option<String>,
    },
}

impl From<RegistryError> for ForrstError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidUrn { .. } | RegistryError::InvalidVersion { .. } => {
                ForrstError::InvalidRequest {
                    message: err.to_string(),
                    pointer: None,
                }
            }
            RegistryError::Conflict { .. } => ForrstError::Conflict {
                message: err.to_string(),
            },
            RegistryError::ReservedNamespace { urn } => ForrstError::ReservedNamespace { urn },
            RegistryError::FunctionNotFound { urn } => {
                ForrstError::FunctionNotFound { function: urn }
            }
            RegistryError::VersionNotFound { urn, selector } => ForrstError::VersionNotFound {
                function: urn,
                selector,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// FunctionRegistry
// ---------------------------------------------------------------------------

/// Registry of versioned functions.
///
/// Shared via `Arc` between the dispatcher and whoever registers functions;
/// registration and resolution may happen concurrently.
pub struct FunctionRegistry {
    /// URN -> registrations sorted by ascending semver precedence.
    functions: DashMap<String, Vec<Arc<FunctionRegistration>>>,
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            functions: DashMap::new(),
        }
    }

    /// Registers an application function.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidUrn`] / [`RegistryError::InvalidVersion`] for malformed input
    /// - [`RegistryError::ReservedNamespace`] when the URN uses the reserved vendor
    /// - [`RegistryError::Conflict`] when `(urn, version)` already exists
    pub fn register(
        &self,
        urn: &str,
        version: &str,
        handler: Arc<dyn FunctionHandler>,
    ) -> Result<Arc<FunctionRegistration>, RegistryError> {
        self.insert(urn, version, handler, false)
    }

    /// Registers a system function; exempt from the reserved-namespace check.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register) minus `ReservedNamespace`.
    pub fn register_system(
        &self,
        urn: &str,
        version: &str,
        handler: Arc<dyn FunctionHandler>,
    ) -> Result<Arc<FunctionRegistration>, RegistryError> {
        self.insert(urn, version, handler, true)
    }

    fn insert(
        &self,
        urn: &str,
        version: &str,
        handler: Arc<dyn FunctionHandler>,
        system: bool,
    ) -> Result<Arc<FunctionRegistration>, RegistryError> {
        let parsed = FunctionUrn::parse(urn).ok_or_else(|| RegistryError::InvalidUrn {
            urn: urn.to_string(),
        })?;
        if parsed.is_reserved() && !system {
            return Err(RegistryError::ReservedNamespace {
                urn: urn.to_string(),
            });
        }
        let version = Version::parse(version).map_err(|e| RegistryError::InvalidVersion {
            urn: urn.to_string(),
            version: version.to_string(),
            reason: e.to_string(),
        })?;

        let registration = Arc::new(FunctionRegistration {
            urn: urn.to_string(),
            stability: Stability::of(&version),
            version,
            handler,
            system,
        });

        let mut versions = self.functions.entry(urn.to_string()).or_default();
        match versions.binary_search_by(|r| r.version.cmp_precedence(&registration.version)) {
            Ok(_) => {
                return Err(RegistryError::Conflict {
                    urn: urn.to_string(),
                    version: registration.version.to_string(),
                })
            }
            Err(pos) => versions.insert(pos, Arc::clone(&registration)),
        }
        debug!(
            urn,
            version = %registration.version,
            stability = %registration.stability,
            system,
            "function registered"
        );
        Ok(registration)
    }

    /// Resolves a version selector to one registration.
    ///
    /// | selector | picks |
    /// |---|---|
    /// | `None`, `"stable"` | highest stable version |
    /// | `"alpha"`, `"beta"`, `"rc"` | highest version of that stability |
    /// | `"dev"` | highest version of any stability |
    /// | exact semver | that version |
    ///
    /// # Errors
    ///
    /// [`RegistryError::FunctionNotFound`] for an unknown URN and
    /// [`RegistryError::VersionNotFound`] when nothing matches the selector.
    pub fn resolve(
        &self,
        urn: &str,
        selector: Option<&str>,
    ) -> Result<Arc<FunctionRegistration>, RegistryError> {
        let versions = self
            .functions
            .get(urn)
            .ok_or_else(|| RegistryError::FunctionNotFound {
                urn: urn.to_string(),
            })?;

        let highest_with = |stability: Stability| {
            versions
                .iter()
                .rev()
                .find(|r| r.stability == stability)
                .cloned()
        };

        let found = match selector {
            None => highest_with(Stability::Stable),
            Some(DEV_ALIAS) => versions.last().cloned(),
            Some(text) => match Stability::from_alias(text) {
                Some(stability) => highest_with(stability),
                None => Version::parse(text).ok().and_then(|wanted| {
                    versions
                        .iter()
                        .find(|r| r.version.cmp_precedence(&wanted).is_eq())
                        .cloned()
                }),
            },
        };

        found.ok_or_else(|| RegistryError::VersionNotFound {
            urn: urn.to_string(),
            selector: selector.map(str::to_string),
        })
    }

    /// All registered versions of `urn`, ascending. Empty for unknown URNs.
    #[must_use]
    pub fn get_versions(&self, urn: &str) -> Vec<Version> {
        self.functions
            .get(urn)
            .map(|versions| versions.iter().map(|r| r.version.clone()).collect())
            .unwrap_or_default()
    }

    /// Every registered URN, sorted.
    #[must_use]
    pub fn functions(&self) -> Vec<String> {
        let mut urns: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        urns.sort();
        urns
    }

    #[must_use]
    pub fn contains(&self, urn: &str) -> bool {
        self.functions.contains_key(urn)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::function::handler_fn;

    const REPORT: &str = "urn:acme:forrst:fn:report";

    fn noop() -> Arc<dyn FunctionHandler> {
        handler_fn(|_req| async { Ok(json!(null)) })
    }

    fn registry_with(versions: &[&str]) -> FunctionRegistry {
        let registry = FunctionRegistry::new();
        for v in versions {
            registry.register(REPORT, v, noop()).unwrap();
        }
        registry
    }

    fn resolved(registry: &FunctionRegistry, selector: Option<&str>) -> String {
        registry.resolve(REPORT, selector).unwrap().version.to_string()
    }

    #[test]
    fn derives_stability_from_prerelease() {
        let cases = [
            ("1.0.0", Stability::Stable),
            ("1.0.0-alpha.1", Stability::Alpha),
            ("1.0.0-beta", Stability::Beta),
            ("1.0.0-beta.2", Stability::Beta),
            ("1.0.0-rc.1", Stability::Rc),
            ("1.0.0-nightly.20240101", Stability::Alpha),
        ];
        for (version, expected) in cases {
            assert_eq!(Stability::of(&Version::parse(version).unwrap()), expected, "{version}");
        }
    }

    #[test]
    fn duplicate_registration_is_conflict() {
        let registry = registry_with(&["1.0.0"]);
        let err = registry.register(REPORT, "1.0.0", noop()).unwrap_err();
        assert!(matches!(err, RegistryError::Conflict { .. }));
        assert_eq!(ForrstError::from(err).code(), forrst_core::ErrorCode::Conflict);
    }

    #[test]
    fn reserved_vendor_is_rejected_for_applications() {
        let registry = FunctionRegistry::new();
        let err = registry
            .register("urn:cline:forrst:fn:ping", "1.0.0", noop())
            .unwrap_err();
        assert!(matches!(err, RegistryError::ReservedNamespace { .. }));
        assert_eq!(
            ForrstError::from(err).code(),
            forrst_core::ErrorCode::ReservedNamespace
        );

        assert!(registry
            .register_system("urn:cline:forrst:fn:ping", "1.0.0", noop())
            .unwrap()
            .system);
    }

    #[test]
    fn rejects_malformed_urn_and_version() {
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.register("report", "1.0.0", noop()),
            Err(RegistryError::InvalidUrn { .. })
        ));
        assert!(matches!(
            registry.register(REPORT, "v1", noop()),
            Err(RegistryError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn latest_stable_ignores_prereleases() {
        let registry = registry_with(&["1.0.0", "2.0.0-beta.1", "1.5.0", "1.10.0"]);
        assert_eq!(resolved(&registry, None), "1.10.0");
        assert_eq!(resolved(&registry, Some("stable")), "1.10.0");
    }

    #[test]
    fn latest_stable_fails_when_only_prereleases_exist() {
        let registry = registry_with(&["1.0.0-beta.1"]);
        let err = registry.resolve(REPORT, None).unwrap_err();
        assert!(matches!(err, RegistryError::VersionNotFound { selector: None, .. }));
    }

    #[test]
    fn beta_alias_picks_highest_beta() {
        let registry = registry_with(&["1.0.0", "2.0.0-beta.1", "2.0.0-beta.3", "2.0.0-rc.1"]);
        assert_eq!(resolved(&registry, Some("beta")), "2.0.0-beta.3");
        assert_eq!(resolved(&registry, Some("rc")), "2.0.0-rc.1");

        let stable_only = registry_with(&["1.0.0"]);
        assert!(matches!(
            stable_only.resolve(REPORT, Some("beta")),
            Err(RegistryError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn dev_alias_picks_highest_of_any_stability() {
        let registry = registry_with(&["1.0.0", "2.0.0-alpha.1", "1.9.0"]);
        assert_eq!(resolved(&registry, Some("dev")), "2.0.0-alpha.1");
    }

    #[test]
    fn exact_version_selector() {
        let registry = registry_with(&["1.0.0", "1.1.0"]);
        assert_eq!(resolved(&registry, Some("1.0.0")), "1.0.0");
        assert!(matches!(
            registry.resolve(REPORT, Some("1.2.0")),
            Err(RegistryError::VersionNotFound { .. })
        ));
        assert!(matches!(
            registry.resolve(REPORT, Some("newest")),
            Err(RegistryError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn unknown_function_is_not_found() {
        let registry = FunctionRegistry::new();
        let err = registry.resolve(REPORT, None).unwrap_err();
        assert!(matches!(err, RegistryError::FunctionNotFound { .. }));
    }

    #[test]
    fn versions_are_listed_ascending() {
        let registry = registry_with(&["2.0.0", "1.0.0-rc.1", "1.0.0", "1.2.3"]);
        let versions: Vec<String> = registry
            .get_versions(REPORT)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(versions, ["1.0.0-rc.1", "1.0.0", "1.2.3", "2.0.0"]);
        assert!(registry.get_versions("urn:acme:forrst:fn:missing").is_empty());
    }

    #[test]
    fn lists_function_urns_sorted() {
        let registry = registry_with(&["1.0.0"]);
        registry
            .register("urn:acme:forrst:fn:alpha", "1.0.0", noop())
            .unwrap();
        assert_eq!(
            registry.functions(),
            ["urn:acme:forrst:fn:alpha".to_string(), REPORT.to_string()]
        );
    }

    fn version_strategy() -> impl Strategy<Value = String> {
        (0u64..4, 0u64..4, 0u64..4, prop_oneof![
            Just(String::new()),
            Just("-alpha.1".to_string()),
            Just("-beta.2".to_string()),
            Just("-rc.1".to_string()),
        ])
            .prop_map(|(major, minor, patch, pre)| format!("{major}.{minor}.{patch}{pre}"))
    }

    proptest! {
        #[test]
        fn default_and_dev_pick_the_highest_candidates(
            raw in proptest::collection::btree_set(version_strategy(), 1..12)
        ) {
            let versions: Vec<&str> = raw.iter().map(String::as_str).collect();
            let registry = registry_with(&versions);
            let parsed: Vec<Version> = raw.iter().map(|v| Version::parse(v).unwrap()).collect();

            let highest = parsed.iter().max().unwrap();
            prop_assert_eq!(resolved(&registry, Some("dev")), highest.to_string());

            match parsed.iter().filter(|v| v.pre.is_empty()).max() {
                Some(stable) => prop_assert_eq!(resolved(&registry, None), stable.to_string()),
                None => prop_assert!(registry.resolve(REPORT, None).is_err()),
            }
        }
    }
}

//! Capability reference parsing and canonicalization.
//!
//! A capability is referenced in one of three accepted forms:
//!
//! - `app/cap[@ver]`
//! - `@alias/app/cap[@ver]`
//! - `cap:@alias/app/cap@ver` (canonical identity)
//!
//! The canonical identity `cap:@<alias>/<app>/<cap>@<version>` is the stable
//! key form: lowercased alias, SemVer-normalized version.
//!
//! Grammar: alias `[A-Za-z][A-Za-z0-9_-]*`; app and cap
//! `[A-Za-z][A-Za-z0-9._-]*`. The characters `#`, `?`, whitespace, and NUL
//! are rejected anywhere in a reference.

use snafu::Snafu;

use crate::constants::CANONICAL_PREFIX;
use crate::constants::DEFAULT_ALIAS;
use crate::constants::MAX_REFERENCE_LENGTH;

/// Result type for identity operations.
pub type Result<T, E = IdentityError> = std::result::Result<T, E>;

/// Errors produced while parsing or canonicalizing capability references.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum IdentityError {
    /// Reference was empty after trimming.
    #[snafu(display("capability reference is empty"))]
    EmptyReference,

    /// Reference exceeds the accepted length bound.
    #[snafu(display("capability reference is {len} chars, max {max}"))]
    ReferenceTooLong {
        /// Actual length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// Reference contains a forbidden character.
    #[snafu(display("capability reference contains forbidden character {character:?}"))]
    ForbiddenCharacter {
        /// The offending character.
        character: char,
    },

    /// Reference has no `/` separating app from capability.
    #[snafu(display("capability reference '{raw}' is missing an app/cap separator"))]
    MissingSeparator {
        /// The raw reference.
        raw: String,
    },

    /// Alias segment violates the alias grammar.
    #[snafu(display("invalid alias segment '{alias}'"))]
    InvalidAlias {
        /// The offending alias.
        alias: String,
    },

    /// App segment violates the name grammar.
    #[snafu(display("invalid app segment '{app}'"))]
    InvalidApp {
        /// The offending app name.
        app: String,
    },

    /// Capability segment violates the name grammar.
    #[snafu(display("invalid capability segment '{cap}'"))]
    InvalidCapability {
        /// The offending capability name.
        cap: String,
    },

    /// Version string is not normalizable SemVer.
    #[snafu(display("invalid version '{version}'"))]
    InvalidVersion {
        /// The offending version.
        version: String,
    },

    /// Canonicalization had neither a parsed nor a resolved version.
    #[snafu(display("no version available to canonicalize '{raw}'"))]
    MissingVersion {
        /// The raw reference.
        raw: String,
    },
}

/// A parsed capability reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    /// Alias segment, when present (without the leading `@`).
    pub alias: Option<String>,
    /// Application segment.
    pub app: String,
    /// Capability segment.
    pub cap: String,
    /// Version segment, when present (as written, not normalized).
    pub version: Option<String>,
    /// The trimmed input the reference was parsed from.
    pub raw: String,
}

impl ParsedReference {
    /// The `app/cap` pair without alias or version.
    pub fn cap_ref(&self) -> String {
        format!("{}/{}", self.app, self.cap)
    }
}

/// Options for [`canonicalize`].
#[derive(Debug, Clone)]
pub struct CanonicalizeOptions<'a> {
    /// Alias used when the reference does not carry one.
    pub default_alias: &'a str,
    /// Version used when the reference does not carry one.
    pub resolved_version: Option<&'a str>,
}

impl Default for CanonicalizeOptions<'_> {
    fn default() -> Self {
        Self {
            default_alias: DEFAULT_ALIAS,
            resolved_version: None,
        }
    }
}

/// Parse a capability reference into its segments.
pub fn parse_reference(input: &str) -> Result<ParsedReference> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return EmptyReferenceSnafu.fail();
    }
    if trimmed.len() > MAX_REFERENCE_LENGTH {
        return ReferenceTooLongSnafu {
            len: trimmed.len(),
            max: MAX_REFERENCE_LENGTH,
        }
        .fail();
    }
    if let Some(character) = trimmed.chars().find(|c| is_forbidden(*c)) {
        return ForbiddenCharacterSnafu { character }.fail();
    }

    let raw = trimmed.to_string();
    let mut rest = trimmed.strip_prefix(CANONICAL_PREFIX).unwrap_or(trimmed);

    let alias = if let Some(stripped) = rest.strip_prefix('@') {
        let (alias, remainder) = stripped.split_once('/').ok_or_else(|| {
            MissingSeparatorSnafu { raw: raw.clone() }.build()
        })?;
        validate_alias(alias)?;
        rest = remainder;
        Some(alias.to_string())
    } else {
        None
    };

    let (app, cap_and_version) = rest.split_once('/').ok_or_else(|| {
        MissingSeparatorSnafu { raw: raw.clone() }.build()
    })?;
    validate_name(app).map_err(|_| InvalidAppSnafu { app: app.to_string() }.build())?;

    let (cap, version) = match cap_and_version.rsplit_once('@') {
        Some((cap, version)) => (cap, Some(version.to_string())),
        None => (cap_and_version, None),
    };
    validate_name(cap).map_err(|_| InvalidCapabilitySnafu { cap: cap.to_string() }.build())?;
    if let Some(ref version) = version
        && version.is_empty()
    {
        return InvalidVersionSnafu { version: version.clone() }.fail();
    }

    Ok(ParsedReference {
        alias,
        app: app.to_string(),
        cap: cap.to_string(),
        version,
        raw,
    })
}

/// Normalize a version string to `MAJOR.MINOR.PATCH[-prerelease][+build]`.
///
/// Accepts a leading `v`, bare majors (`1` becomes `1.0.0`), and
/// major.minor pairs (`1.2` becomes `1.2.0`). Full SemVer passes through
/// unchanged. Idempotent on its own output.
pub fn normalize_version(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let stripped = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if stripped.is_empty() {
        return InvalidVersionSnafu { version: input.to_string() }.fail();
    }

    let (core, suffix) = match stripped.find(['-', '+']) {
        Some(idx) => stripped.split_at(idx),
        None => (stripped, ""),
    };
    if !suffix.is_empty()
        && (suffix.len() == 1
            || !suffix[1..].chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '+'))
    {
        return InvalidVersionSnafu { version: input.to_string() }.fail();
    }

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return InvalidVersionSnafu { version: input.to_string() }.fail();
    }
    for part in &parts {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) || part.parse::<u64>().is_err() {
            return InvalidVersionSnafu { version: input.to_string() }.fail();
        }
    }

    let major = parts[0];
    let minor = parts.get(1).copied().unwrap_or("0");
    let patch = parts.get(2).copied().unwrap_or("0");
    Ok(format!("{major}.{minor}.{patch}{suffix}"))
}

/// Build the canonical identity `cap:@<alias>/<app>/<cap>@<version>`.
///
/// The alias is lowercased; the version comes from the parsed reference when
/// present, otherwise from `resolved_version`.
pub fn canonicalize(parsed: &ParsedReference, opts: CanonicalizeOptions<'_>) -> Result<String> {
    let alias = parsed.alias.as_deref().unwrap_or(opts.default_alias).to_ascii_lowercase();
    validate_alias(&alias)?;

    let version = match (parsed.version.as_deref(), opts.resolved_version) {
        (Some(v), _) => v,
        (None, Some(v)) => v,
        (None, None) => return MissingVersionSnafu { raw: parsed.raw.clone() }.fail(),
    };
    let version = normalize_version(version)?;

    Ok(format!("{CANONICAL_PREFIX}@{alias}/{}/{}@{version}", parsed.app, parsed.cap))
}

fn is_forbidden(c: char) -> bool {
    c == '#' || c == '?' || c == '\0' || c.is_whitespace()
}

fn validate_alias(alias: &str) -> Result<()> {
    let mut chars = alias.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        InvalidAliasSnafu { alias: alias.to_string() }.fail()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        InvalidAliasSnafu { alias: name.to_string() }.fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_reference() {
        let parsed = parse_reference("my.app/my.cap").unwrap();
        assert_eq!(parsed.alias, None);
        assert_eq!(parsed.app, "my.app");
        assert_eq!(parsed.cap, "my.cap");
        assert_eq!(parsed.version, None);
    }

    #[test]
    fn parses_aliased_reference_with_version() {
        let parsed = parse_reference("@Partner/billing/charge@1.2").unwrap();
        assert_eq!(parsed.alias.as_deref(), Some("Partner"));
        assert_eq!(parsed.app, "billing");
        assert_eq!(parsed.cap, "charge");
        assert_eq!(parsed.version.as_deref(), Some("1.2"));
    }

    #[test]
    fn parses_canonical_identity() {
        let parsed = parse_reference("cap:@main/my.app/my.cap@1.0.0").unwrap();
        assert_eq!(parsed.alias.as_deref(), Some("main"));
        assert_eq!(parsed.version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn rejects_forbidden_characters() {
        for input in ["a/b#c", "a/b?x", "a /b", "a/b@1 ", "a\0/b"] {
            assert!(
                matches!(parse_reference(input), Err(IdentityError::ForbiddenCharacter { .. })),
                "expected forbidden-character error for {input:?}"
            );
        }
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(parse_reference("justaname"), Err(IdentityError::MissingSeparator { .. })));
        assert!(matches!(parse_reference("@alias/apponly"), Err(IdentityError::MissingSeparator { .. })));
    }

    #[test]
    fn rejects_bad_segments() {
        assert!(parse_reference("1app/cap").is_err());
        assert!(parse_reference("app/2cap").is_err());
        assert!(parse_reference("@9alias/app/cap").is_err());
    }

    #[test]
    fn normalize_version_pads_partial_versions() {
        assert_eq!(normalize_version("1").unwrap(), "1.0.0");
        assert_eq!(normalize_version("v1").unwrap(), "1.0.0");
        assert_eq!(normalize_version("1.0").unwrap(), "1.0.0");
        assert_eq!(normalize_version("1.0.0").unwrap(), "1.0.0");
        assert_eq!(normalize_version("2.3.4-rc.1+build5").unwrap(), "2.3.4-rc.1+build5");
    }

    #[test]
    fn normalize_version_is_idempotent() {
        for input in ["1", "v2.1", "3.4.5", "1.0.0-alpha"] {
            let once = normalize_version(input).unwrap();
            assert_eq!(normalize_version(&once).unwrap(), once);
        }
    }

    #[test]
    fn normalize_version_rejects_garbage() {
        for input in ["", "v", "a.b.c", "1..2", "1.2.3.4", "1.-2"] {
            assert!(normalize_version(input).is_err(), "expected error for {input:?}");
        }
    }

    #[test]
    fn canonicalize_lowercases_alias_and_normalizes_version() {
        let parsed = parse_reference("@Partner/billing/charge@1").unwrap();
        let canonical = canonicalize(&parsed, CanonicalizeOptions::default()).unwrap();
        assert_eq!(canonical, "cap:@partner/billing/charge@1.0.0");
    }

    #[test]
    fn canonicalize_uses_resolved_version_when_reference_has_none() {
        let parsed = parse_reference("my.app/my.cap").unwrap();
        let canonical = canonicalize(
            &parsed,
            CanonicalizeOptions {
                resolved_version: Some("2.1"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(canonical, "cap:@main/my.app/my.cap@2.1.0");
    }

    #[test]
    fn canonicalize_without_any_version_fails() {
        let parsed = parse_reference("my.app/my.cap").unwrap();
        assert!(matches!(
            canonicalize(&parsed, CanonicalizeOptions::default()),
            Err(IdentityError::MissingVersion { .. })
        ));
    }

    #[test]
    fn canonicalize_is_idempotent_through_reparse() {
        let parsed = parse_reference("@Main/my.app/my.cap@1").unwrap();
        let canonical = canonicalize(&parsed, CanonicalizeOptions::default()).unwrap();
        let reparsed = parse_reference(&canonical).unwrap();
        let again = canonicalize(&reparsed, CanonicalizeOptions::default()).unwrap();
        assert_eq!(canonical, again);
        assert_eq!(reparsed.alias.as_deref(), Some("main"));
        assert_eq!(reparsed.app, "my.app");
        assert_eq!(reparsed.cap, "my.cap");
    }
}

//! Version requirement expressions
//!
//! A requirement is a whitespace-separated list of clauses combined as a
//! logical AND, e.g. `">=1.0.0 <2.0.0"`. A clause is either a pin
//! (`"1.2.3"` or `"=1.2.3"`) or a semver range (`">=1.0.0"`, `"^1.2"`).
//! Callers may hand the combined string to collaborators (the cloud
//! negotiation request carries it verbatim), but internally the clauses
//! stay separate so combining requirements never splices strings.

use std::fmt;

use semver::{Version, VersionReq};

use crate::errors::DeploymentError;

/// A single clause of a requirement expression
#[derive(Debug, Clone)]
struct RangeClause {
    /// The clause exactly as written by the caller
    source: String,

    kind: ClauseKind,
}

#[derive(Debug, Clone)]
enum ClauseKind {
    /// An exact version pin
    Exact(Version),

    /// A semver range
    Range(VersionReq),
}

/// A parsed version requirement: one or more clauses ANDed together
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    clauses: Vec<RangeClause>,
}

impl VersionConstraint {
    /// Parse a requirement expression.
    ///
    /// Clauses are separated by whitespace or commas; an expression with no
    /// clauses is invalid.
    pub fn parse(expr: &str) -> Result<Self, DeploymentError> {
        let mut clauses = Vec::new();

        for token in expr.split(|c: char| c.is_whitespace() || c == ',') {
            if token.is_empty() {
                continue;
            }
            clauses.push(parse_clause(token)?);
        }

        if clauses.is_empty() {
            return Err(DeploymentError::Invalid(format!(
                "empty version requirement: {:?}",
                expr
            )));
        }

        Ok(Self { clauses })
    }

    /// Whether a concrete version satisfies every clause
    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().all(|clause| match &clause.kind {
            ClauseKind::Exact(pin) => pin == version,
            ClauseKind::Range(req) => req.matches(version),
        })
    }

    /// The pinned version, if any clause is an exact pin
    pub fn pin(&self) -> Option<&Version> {
        self.clauses.iter().find_map(|clause| match &clause.kind {
            ClauseKind::Exact(pin) => Some(pin),
            ClauseKind::Range(_) => None,
        })
    }

    /// AND another requirement into this one.
    ///
    /// Clauses with identical source text are kept once. Two differing pins
    /// can never both be satisfied, so that combination fails with a
    /// conflict instead of producing an unsatisfiable requirement.
    pub fn merge(&mut self, other: &VersionConstraint) -> Result<(), DeploymentError> {
        if let (Some(a), Some(b)) = (self.pin(), other.pin()) {
            if a != b {
                return Err(DeploymentError::Conflict(format!(
                    "pinned versions {} and {} cannot both be satisfied",
                    a, b
                )));
            }
        }

        for clause in &other.clauses {
            if !self.clauses.iter().any(|c| c.source == clause.source) {
                self.clauses.push(clause.clone());
            }
        }

        Ok(())
    }
}

fn parse_clause(token: &str) -> Result<RangeClause, DeploymentError> {
    let pin_text = token.strip_prefix('=').unwrap_or(token);
    if let Ok(version) = Version::parse(pin_text) {
        return Ok(RangeClause {
            source: token.to_string(),
            kind: ClauseKind::Exact(version),
        });
    }

    match VersionReq::parse(token) {
        Ok(req) => Ok(RangeClause {
            source: token.to_string(),
            kind: ClauseKind::Range(req),
        }),
        Err(e) => Err(DeploymentError::Invalid(format!(
            "bad version requirement clause {:?}: {}",
            token, e
        ))),
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for clause in &self.clauses {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}", clause.source)?;
            first = false;
        }
        Ok(())
    }
}

impl PartialEq for VersionConstraint {
    fn eq(&self, other: &Self) -> bool {
        self.clauses.len() == other.clauses.len()
            && self
                .clauses
                .iter()
                .zip(&other.clauses)
                .all(|(a, b)| a.source == b.source)
    }
}

impl Eq for VersionConstraint {}

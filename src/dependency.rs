// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package relationship fields.

Binary packages express relationships through a meta language of the form
`libc6 (>= 2.4), awk | mawk`. A comma-separated list is a conjunction of
[Relation]s; each relation is a disjunction of [Possibility] alternatives.
See <https://www.debian.org/doc/debian-policy/ch-relationships.html>.
*/

use {
    crate::{
        error::{Error, Result},
        package_version::PackageVersion,
    },
    std::fmt::{Display, Formatter},
};

/// A version comparison operator in a package relationship.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VersionOperator {
    /// `<<` - strictly earlier.
    StrictlyEarlier,
    /// `<=` - earlier or equal.
    EarlierOrEqual,
    /// `=` - exactly equal.
    Equal,
    /// `>=` - later or equal.
    LaterOrEqual,
    /// `>>` - strictly later.
    StrictlyLater,
}

impl VersionOperator {
    fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "<<" => Self::StrictlyEarlier,
            "<=" => Self::EarlierOrEqual,
            "=" => Self::Equal,
            ">=" => Self::LaterOrEqual,
            ">>" => Self::StrictlyLater,
            _ => return Err(Error::RelationOperator(s.to_string())),
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::StrictlyEarlier => "<<",
            Self::EarlierOrEqual => "<=",
            Self::Equal => "=",
            Self::LaterOrEqual => ">=",
            Self::StrictlyLater => ">>",
        }
    }
}

impl Display for VersionOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A version constraint attached to a [Possibility].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VersionConstraint {
    pub operator: VersionOperator,
    pub version: PackageVersion,
}

impl Display for VersionConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.operator, self.version)
    }
}

/// A single alternative within a relation: a package name and an optional
/// version constraint.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Possibility {
    pub name: String,
    pub constraint: Option<VersionConstraint>,
}

impl Possibility {
    /// Parse a single alternative, e.g. `libc6 (>= 2.4)`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        let (name, constraint) = match s.find('(') {
            Some(open) => {
                let close = s
                    .find(')')
                    .ok_or_else(|| Error::MalformedControl(format!("unclosed constraint: {}", s)))?;

                let inner = s[open + 1..close].trim();
                let (op, version) = inner
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| Error::MalformedControl(format!("bad constraint: {}", s)))?;

                (
                    s[0..open].trim(),
                    Some(VersionConstraint {
                        operator: VersionOperator::parse(op)?,
                        version: PackageVersion::parse(version.trim())?,
                    }),
                )
            }
            None => (s, None),
        };

        if name.is_empty() {
            return Err(Error::MalformedControl(format!(
                "missing package name in relation: {}",
                s
            )));
        }

        // An architecture qualifier (`python3:any`) is not significant when
        // looking up binary packages by name.
        let name = name.split(':').next().expect("split yields at least one item");

        Ok(Self {
            name: name.to_string(),
            constraint,
        })
    }
}

impl Display for Possibility {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.constraint {
            Some(constraint) => write!(f, "{} ({})", self.name, constraint),
            None => f.write_str(&self.name),
        }
    }
}

/// A disjunction of [Possibility] alternatives, e.g. `awk | mawk`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Relation {
    pub possibilities: Vec<Possibility>,
}

impl Relation {
    /// Parse a relation, e.g. `default-mta | mail-transport-agent`.
    pub fn parse(s: &str) -> Result<Self> {
        let possibilities = s
            .split('|')
            .map(Possibility::parse)
            .collect::<Result<Vec<_>>>()?;

        if possibilities.is_empty() {
            return Err(Error::MalformedControl(format!("empty relation: {}", s)));
        }

        Ok(Self { possibilities })
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for possibility in &self.possibilities {
            if !first {
                f.write_str(" | ")?;
            }
            first = false;

            write!(f, "{}", possibility)?;
        }

        Ok(())
    }
}

/// Parse a full relationship field value into a list of relations.
///
/// An empty or whitespace-only field yields an empty list.
pub fn parse_relations(s: &str) -> Result<Vec<Relation>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Relation::parse)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_bare_name() -> Result<()> {
        let relations = parse_relations("libtinfo6")?;
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].possibilities.len(), 1);
        assert_eq!(relations[0].possibilities[0].name, "libtinfo6");
        assert!(relations[0].possibilities[0].constraint.is_none());

        Ok(())
    }

    #[test]
    fn parse_constraints_and_alternatives() -> Result<()> {
        let relations = parse_relations("libc6 (>= 2.36), awk | mawk (<< 2.0)")?;
        assert_eq!(relations.len(), 2);

        let constraint = relations[0].possibilities[0].constraint.as_ref().unwrap();
        assert_eq!(constraint.operator, VersionOperator::LaterOrEqual);
        assert_eq!(constraint.version, PackageVersion::parse("2.36")?);

        assert_eq!(relations[1].possibilities.len(), 2);
        assert_eq!(relations[1].possibilities[0].name, "awk");
        assert_eq!(
            relations[1].possibilities[1].constraint.as_ref().unwrap().operator,
            VersionOperator::StrictlyEarlier
        );

        Ok(())
    }

    #[test]
    fn parse_strips_architecture_qualifier() -> Result<()> {
        let relations = parse_relations("python3:any (>= 3.11)")?;
        assert_eq!(relations[0].possibilities[0].name, "python3");

        Ok(())
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert!(matches!(
            parse_relations("libc6 (~> 2.36)"),
            Err(Error::RelationOperator(_))
        ));
    }

    #[test]
    fn empty_field_is_empty_list() -> Result<()> {
        assert!(parse_relations("")?.is_empty());
        assert!(parse_relations("  ")?.is_empty());

        Ok(())
    }

    #[test]
    fn display_round_trip() -> Result<()> {
        for s in ["libc6 (>= 2.36)", "awk | mawk (<< 2.0)", "base-files"] {
            let relation = Relation::parse(s)?;
            assert_eq!(relation.to_string(), s);
        }

        Ok(())
    }
}

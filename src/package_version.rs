// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version string handling. */

use {
    crate::error::{Error, Result},
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// A Debian package version.
///
/// Versions have the form `[epoch:]upstream_version[-debian_revision]` and
/// sort according to the rules in
/// <https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

/// An epoch is a non-empty run of ASCII digits.
fn parse_epoch(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok()
}

/// Whether a component is non-empty and made of legal characters:
/// alphanumerics plus `. + ~`, and embedded hyphens only where allowed
/// (an upstream version that is followed by a revision).
fn valid_component(component: &str, allow_hyphen: bool) -> bool {
    !component.is_empty()
        && component.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(b, b'.' | b'+' | b'~')
                || (allow_hyphen && b == b'-')
        })
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    ///
    /// The grammar is `[epoch:]upstream_version[-debian_revision]`: the
    /// epoch ends at the first colon and the revision starts at the last
    /// hyphen.
    pub fn parse(s: &str) -> Result<Self> {
        let syntax = || Error::VersionSyntax(s.to_string());

        if s.is_empty() {
            return Err(Error::VersionSyntax("empty version string".to_string()));
        }

        let (epoch, body) = match s.split_once(':') {
            Some((digits, body)) => (Some(parse_epoch(digits).ok_or_else(syntax)?), body),
            None => (None, s),
        };

        let (upstream, revision) = match body.rsplit_once('-') {
            Some((upstream, revision)) => (upstream, Some(revision)),
            None => (body, None),
        };

        if !valid_component(upstream, revision.is_some()) {
            return Err(syntax());
        }

        if let Some(revision) = revision {
            if !valid_component(revision, false) {
                return Err(syntax());
            }
        }

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision: revision.map(str::to_string),
        })
    }

    /// The `epoch` component, if explicitly present.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// The `epoch` component, with `0` assumed when absent.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    /// The `upstream_version` component.
    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    /// The `debian_revision` component, if present.
    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }

        write!(f, "{}", self.upstream_version)?;

        if let Some(revision) = &self.debian_revision {
            write!(f, "-{}", revision)?;
        }

        Ok(())
    }
}

impl FromStr for PackageVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Sort weight of a character in the modified lexical comparison.
///
/// Tilde sorts before everything, including the end of a part. Letters sort
/// before non-letters.
fn char_weight(c: char) -> i32 {
    if c == '~' {
        -1
    } else if c.is_ascii_alphabetic() {
        c as i32
    } else {
        c as i32 + 256
    }
}

/// Split a string into its leading non-digit run and the remainder.
fn split_leading_nondigits(s: &str) -> (&str, &str) {
    match s.find(|c: char| c.is_ascii_digit()) {
        Some(pos) => (&s[0..pos], &s[pos..]),
        None => (s, ""),
    }
}

/// Split a string into its leading digit run and the remainder.
fn split_leading_digits(s: &str) -> (&str, &str) {
    let pos = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());

    (&s[0..pos], &s[pos..])
}

/// Compare two digit runs numerically without a precision limit.
///
/// An empty run counts as zero.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');

    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        res => res,
    }
}

/// Compare two non-digit runs using the modified lexical ordering.
///
/// A missing character weighs 0, so `~` sorts before the end of a part and
/// everything else sorts after it.
fn lexical_compare(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars();
    let mut b_chars = b.chars();

    loop {
        match (a_chars.next(), b_chars.next()) {
            (None, None) => return Ordering::Equal,
            (a_char, b_char) => {
                let a_weight = a_char.map(char_weight).unwrap_or(0);
                let b_weight = b_char.map(char_weight).unwrap_or(0);

                match a_weight.cmp(&b_weight) {
                    Ordering::Equal => {}
                    res => return res,
                }
            }
        }
    }
}

/// Compare a version component string (upstream version or revision) using
/// Debian rules.
///
/// Alternates between comparing non-digit runs lexically and digit runs
/// numerically until a difference is found or both inputs are exhausted.
fn compare_component(a: &str, b: &str) -> Ordering {
    let mut a_remaining = a;
    let mut b_remaining = b;

    loop {
        let (a_nondigit, a_rest) = split_leading_nondigits(a_remaining);
        let (b_nondigit, b_rest) = split_leading_nondigits(b_remaining);

        match lexical_compare(a_nondigit, b_nondigit) {
            Ordering::Equal => {}
            res => return res,
        }

        let (a_digits, a_rest) = split_leading_digits(a_rest);
        let (b_digits, b_rest) = split_leading_digits(b_rest);

        match compare_digit_runs(a_digits, b_digits) {
            Ordering::Equal => {}
            res => return res,
        }

        if a_rest.is_empty() && b_rest.is_empty() {
            return Ordering::Equal;
        }

        a_remaining = a_rest;
        b_remaining = b_rest;
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Epochs compare numerically. The absence of a revision is
        // equivalent to `0`.
        match self.epoch_assumed().cmp(&other.epoch_assumed()) {
            Ordering::Equal => {}
            res => return res,
        }

        match compare_component(&self.upstream_version, &other.upstream_version) {
            Ordering::Equal => {}
            res => return res,
        }

        match compare_component(
            self.debian_revision.as_deref().unwrap_or("0"),
            other.debian_revision.as_deref().unwrap_or("0"),
        ) {
            Ordering::Equal => {}
            res => return res,
        }

        // Distinct spellings that the policy algorithm considers equal
        // (`1.0` vs `1.0-0`, `1.01` vs `1.1`) still need a deterministic
        // order so that Ord agrees with the derived Eq.
        (&self.epoch, &self.upstream_version, &self.debian_revision).cmp(&(
            &other.epoch,
            &other.upstream_version,
            &other.debian_revision,
        ))
    }
}

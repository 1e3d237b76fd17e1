// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Binary package records.

A [PackageRecord] is a typed view over a deb822 paragraph, as found in a
repository `Packages` index or a `.deb` control archive. The original
paragraph is retained so records can be re-serialized faithfully (the
unpacker emits them into the dpkg `status` file).
*/

use {
    crate::{
        control::{ControlField, ControlParagraph},
        dependency::{parse_relations, Relation},
        error::Result,
        package_version::PackageVersion,
    },
    std::str::FromStr,
    url::Url,
};

/// Package priority, as declared in the `Priority` control field.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Priority {
    Required,
    Important,
    Standard,
    Optional,
    Extra,
}

impl FromStr for Priority {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        Ok(match s {
            "required" => Self::Required,
            "important" => Self::Important,
            "standard" => Self::Standard,
            "optional" => Self::Optional,
            "extra" => Self::Extra,
            _ => return Err(()),
        })
    }
}

/// A binary package record.
#[derive(Clone, Debug)]
pub struct PackageRecord {
    paragraph: ControlParagraph,
    name: String,
    version: PackageVersion,
    architecture: String,
    priority: Option<Priority>,
    depends: Vec<Relation>,
    pre_depends: Vec<Relation>,
    provides: Vec<Relation>,
    filename: Option<String>,
    sha256: Option<String>,
    urls: Vec<Url>,
    status: Vec<String>,
}

impl PackageRecord {
    /// Construct a record from a parsed control paragraph.
    ///
    /// `Package`, `Version`, and `Architecture` are required. Repository
    /// index stanzas additionally carry `Filename` and `SHA256`; stanzas
    /// from a `.deb` control archive do not.
    pub fn from_paragraph(paragraph: ControlParagraph) -> Result<Self> {
        let name = paragraph.required_field_str("Package")?.to_string();
        let version = PackageVersion::parse(paragraph.required_field_str("Version")?)?;
        let architecture = paragraph.required_field_str("Architecture")?.to_string();

        let priority = paragraph
            .field_str("Priority")
            .and_then(|v| Priority::from_str(v).ok());

        let depends = parse_relations(paragraph.field_str("Depends").unwrap_or_default())?;
        let pre_depends = parse_relations(paragraph.field_str("Pre-Depends").unwrap_or_default())?;
        let provides = parse_relations(paragraph.field_str("Provides").unwrap_or_default())?;

        let filename = paragraph.field_str("Filename").map(ToString::to_string);
        let sha256 = paragraph.field_str("SHA256").map(ToString::to_string);

        Ok(Self {
            paragraph,
            name,
            version,
            architecture,
            priority,
            depends,
            pre_depends,
            provides,
            filename,
            sha256,
            urls: vec![],
            status: vec![],
        })
    }

    /// The `Package` field value.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parsed `Version` field.
    pub fn version(&self) -> &PackageVersion {
        &self.version
    }

    /// The `Architecture` field (may be the pseudo-architecture `all`).
    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// The parsed `Priority` field, if present and recognized.
    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    /// Parsed `Depends` relations.
    pub fn depends(&self) -> &[Relation] {
        &self.depends
    }

    /// Parsed `Pre-Depends` relations.
    pub fn pre_depends(&self) -> &[Relation] {
        &self.pre_depends
    }

    /// Parsed `Provides` relations.
    pub fn provides(&self) -> &[Relation] {
        &self.provides
    }

    /// The repository-relative path of the `.deb`, when known.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// The SHA-256 of the `.deb` payload, when known.
    pub fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref()
    }

    /// Mirror URLs this package can be fetched from, in insertion order.
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    /// Append a mirror URL if an identical one is not already present.
    pub fn add_url(&mut self, url: Url) {
        if !self.urls.contains(&url) {
            self.urls.push(url);
        }
    }

    /// Merge another record's URLs into this one, preserving order and
    /// dropping duplicates.
    pub fn merge_urls_from(&mut self, other: &PackageRecord) {
        for url in &other.urls {
            self.add_url(url.clone());
        }
    }

    /// The dpkg status words, if assigned.
    pub fn status(&self) -> &[String] {
        &self.status
    }

    /// Assign the dpkg status words (e.g. `install ok unpacked`).
    pub fn set_status(&mut self, status: &[&str]) {
        self.status = status.iter().map(ToString::to_string).collect();
    }

    /// The underlying control paragraph.
    pub fn paragraph(&self) -> &ControlParagraph {
        &self.paragraph
    }

    /// The paragraph to emit into a dpkg `status` file: the original
    /// stanza plus the `Status` field.
    pub fn to_status_paragraph(&self) -> ControlParagraph {
        let mut paragraph = self.paragraph.clone();

        if !self.status.is_empty() {
            paragraph.set_field(ControlField::new("Status", self.status.join(" ")));
        }

        paragraph
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `[In]Release` file primitives. */

use {
    crate::{
        control::{ControlParagraph, ControlParagraphReader},
        error::{Error, Result},
        keyring::Keyring,
    },
    chrono::{DateTime, TimeZone, Utc},
    mailparse::dateparse,
    pgp_cleartext::{CleartextSignatureReader, CleartextSignatures},
    std::io::BufRead,
};

/// A line from a `SHA256` index in a release file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseEntry {
    /// Path of the indexed file, relative to the release directory.
    pub path: String,
    /// Hex-encoded SHA-256 of the file.
    pub digest: String,
    /// Size of the file in bytes.
    pub size: u64,
}

/// A Debian repository `Release` file.
///
/// Release files list a suite's components, architectures, and per-file
/// checksums. `InRelease` variants carry an inline PGP cleartext
/// signature, which is retained for verification.
pub struct ReleaseFile {
    paragraph: ControlParagraph,
    signatures: Option<CleartextSignatures>,
}

impl ReleaseFile {
    /// Construct an instance from unarmored control data.
    ///
    /// The source must contain exactly one paragraph.
    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let paragraphs = ControlParagraphReader::new(reader).collect::<Result<Vec<_>>>()?;

        if paragraphs.len() != 1 {
            return Err(Error::ReleaseParse(format!(
                "expected 1 paragraph; got {}",
                paragraphs.len()
            )));
        }

        Ok(Self {
            paragraph: paragraphs.into_iter().next().expect("length checked"),
            signatures: None,
        })
    }

    /// Construct an instance from an `InRelease` file bearing a PGP
    /// cleartext signature.
    ///
    /// The signature is captured but not validated; call
    /// [ReleaseFile::require_signed] to enforce trust.
    pub fn from_armored_reader(reader: impl BufRead) -> Result<Self> {
        let reader = CleartextSignatureReader::new(reader);
        let mut reader = std::io::BufReader::new(reader);

        let mut slf = Self::from_reader(&mut reader)?;
        slf.signatures = Some(reader.into_inner().finalize());

        Ok(slf)
    }

    /// The captured cleartext signatures, if this came from an `InRelease`.
    pub fn signatures(&self) -> Option<&CleartextSignatures> {
        self.signatures.as_ref()
    }

    /// Require that this release was signed by a key in the given keyring.
    pub fn require_signed(&self, keyring: &Keyring) -> Result<()> {
        let signatures = self
            .signatures
            .as_ref()
            .ok_or_else(|| Error::ReleaseUnsigned("release file carries no signature".into()))?;

        if !keyring.verifies(signatures) {
            return Err(Error::ReleaseUnsigned(
                "no signature matches a key in the trusted keyring".into(),
            ));
        }

        Ok(())
    }

    /// The `Suite` field (e.g. `stable`).
    pub fn suite(&self) -> Option<&str> {
        self.paragraph.field_str("Suite")
    }

    /// The `Codename` field (e.g. `bookworm`).
    pub fn codename(&self) -> Option<&str> {
        self.paragraph.field_str("Codename")
    }

    /// The `Origin` field.
    pub fn origin(&self) -> Option<&str> {
        self.paragraph.field_str("Origin")
    }

    /// Architectures published by this suite.
    pub fn architectures(&self) -> Vec<&str> {
        self.paragraph
            .field("Architectures")
            .map(|f| f.iter_words().collect())
            .unwrap_or_default()
    }

    /// Components published by this suite.
    pub fn components(&self) -> Vec<&str> {
        self.paragraph
            .field("Components")
            .map(|f| f.iter_words().collect())
            .unwrap_or_default()
    }

    /// Time the release file was created, normalized to UTC.
    pub fn date(&self) -> Option<Result<DateTime<Utc>>> {
        self.paragraph.field_str("Date").map(|v| {
            let ts = dateparse(v).map_err(|e| Error::ReleaseParse(e.to_string()))?;

            Utc.timestamp_opt(ts, 0)
                .single()
                .ok_or_else(|| Error::ReleaseParse(format!("timestamp out of range: {}", ts)))
        })
    }

    /// Parsed entries of the `SHA256` field.
    ///
    /// Each line has the form `<digest> <size> <path>`.
    pub fn sha256_entries(&self) -> Result<Vec<ReleaseEntry>> {
        let field = match self.paragraph.field("SHA256") {
            Some(field) => field,
            None => return Ok(vec![]),
        };

        field
            .iter_lines()
            .filter(|line| !line.is_empty())
            .map(|line| {
                let mut parts = line.split_ascii_whitespace();

                let digest = parts
                    .next()
                    .ok_or_else(|| Error::ReleaseParse(format!("missing digest: {}", line)))?;
                let size = parts
                    .next()
                    .ok_or_else(|| Error::ReleaseParse(format!("missing size: {}", line)))?;
                let path = parts
                    .next()
                    .ok_or_else(|| Error::ReleaseParse(format!("missing path: {}", line)))?;

                if parts.next().is_some() {
                    return Err(Error::ReleaseParse(format!(
                        "unexpected trailing data: {}",
                        line
                    )));
                }

                Ok(ReleaseEntry {
                    path: path.to_string(),
                    digest: digest.to_string(),
                    size: size
                        .parse()
                        .map_err(|e| Error::ReleaseParse(format!("bad size: {}: {}", line, e)))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const RELEASE: &str = "Origin: Debian\n\
        Suite: stable\n\
        Codename: bookworm\n\
        Date: Sat, 10 Feb 2024 08:23:12 UTC\n\
        Architectures: all amd64 arm64\n\
        Components: main contrib non-free\n\
        SHA256:\n \
        3957f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80fe63 738242 contrib/Contents-all\n \
        c054d8b15020335623e2a72e0f8e67633de1e74c8a5c0a2e3a34795f1b2441dd 1207 main/binary-amd64/Packages.gz\n \
        e2693e5e0a8c39a2c63b6fb7ab9cf05e5cd35b56620953b0cb683ee1b50e20f1 1089 main/binary-all/Packages.gz\n";

    #[test]
    fn parses_fields() -> Result<()> {
        let release = ReleaseFile::from_reader(RELEASE.as_bytes())?;

        assert_eq!(release.suite(), Some("stable"));
        assert_eq!(release.codename(), Some("bookworm"));
        assert_eq!(release.architectures(), vec!["all", "amd64", "arm64"]);
        assert_eq!(release.components(), vec!["main", "contrib", "non-free"]);
        assert!(release.date().unwrap().is_ok());

        Ok(())
    }

    #[test]
    fn parses_sha256_entries() -> Result<()> {
        let release = ReleaseFile::from_reader(RELEASE.as_bytes())?;

        let entries = release.sha256_entries()?;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].path, "main/binary-amd64/Packages.gz");
        assert_eq!(entries[1].size, 1207);
        assert!(entries[1].digest.starts_with("c054d8b"));

        Ok(())
    }

    #[test]
    fn multiple_paragraphs_are_rejected() {
        let data = "Suite: stable\n\nSuite: testing\n";

        assert!(matches!(
            ReleaseFile::from_reader(data.as_bytes()),
            Err(Error::ReleaseParse(_))
        ));
    }

    #[test]
    fn unsigned_release_fails_require_signed() -> Result<()> {
        let release = ReleaseFile::from_reader(RELEASE.as_bytes())?;

        assert!(matches!(
            release.require_signed(&Keyring::default()),
            Err(Error::ReleaseUnsigned(_))
        ));

        Ok(())
    }
}

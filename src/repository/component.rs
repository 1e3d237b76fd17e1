// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Per-architecture repository components. */

use {
    crate::{
        control::ControlParagraphReader,
        error::{Error, Result},
        io::{self, HashReader},
        package::PackageRecord,
        repository::http::HttpClient,
    },
    chrono::{DateTime, Utc},
    std::collections::HashMap,
    tracing::debug,
    url::Url,
};

/// `Packages` index filenames, in retrieval preference order.
const INDEX_CANDIDATES: &[&str] = &["Packages.xz", "Packages.gz", "Packages"];

/// One (component, architecture) slice of a repository.
///
/// Produced by [crate::repository::Source::components]; carries the subset
/// of the release's SHA256 manifest scoped to this slice.
#[derive(Clone, Debug)]
pub struct Component {
    /// Component name (e.g. `main`).
    pub name: String,
    /// Architecture (may be the pseudo-architecture `all`).
    pub arch: String,
    /// Base URL of the `binary-<arch>` directory.
    pub base_url: Url,
    /// Expected SHA-256 digests of files under [Component::base_url],
    /// keyed by filename.
    pub sha256_sums: HashMap<String, String>,
    pub(crate) source_url: Url,
}

impl Component {
    /// Fetch and decode this component's `Packages` index.
    ///
    /// Compressed variants are preferred; every candidate is hash-verified
    /// against the release manifest before its records are trusted. Only
    /// when all candidates fail does the call fail, with the accumulated
    /// errors joined. Returns the records and the index's `Last-Modified`
    /// time (the zero instant when unknown).
    pub async fn packages(
        &self,
        http: &HttpClient,
    ) -> Result<(Vec<PackageRecord>, DateTime<Utc>)> {
        let mut errors: Vec<String> = vec![];

        for name in INDEX_CANDIDATES {
            let url = self.base_url.join(name)?;

            debug!(url = %url, "attempting to download packages index");

            let response = match http.get(&url).await {
                Ok(response) => response,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    errors.push(format!("{}: {}", name, e));
                    continue;
                }
            };

            match self.decode_index(name, &response.body) {
                Ok(records) => return Ok((records, response.last_modified)),
                Err(e) => {
                    errors.push(format!("{}: {}", name, e));
                    continue;
                }
            }
        }

        Err(Error::IndexUnreachable(errors.join("; ")))
    }

    /// Decode and verify one index candidate body.
    fn decode_index(&self, name: &str, body: &[u8]) -> Result<Vec<PackageRecord>> {
        let mut hashed = HashReader::new(body);

        let mut records = ControlParagraphReader::new(std::io::BufReader::new(io::decompress(
            &mut hashed,
        )?))
        .map(|paragraph| paragraph.and_then(PackageRecord::from_paragraph))
        .collect::<Result<Vec<_>>>()?;

        // A decoder can stop short of trailing framing bytes; the digest
        // must cover the entire body.
        io::drain(&mut hashed)?;

        let expected = self.sha256_sums.get(name).ok_or_else(|| {
            Error::IndexUnreachable(format!("release manifest has no checksum for {}", name))
        })?;

        hashed.verify(expected)?;

        for record in &mut records {
            let Some(filename) = record.filename().map(ToString::to_string) else {
                continue;
            };

            record.add_url(self.source_url.join(&filename)?);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod test {
    use {super::*, sha2::Digest, std::io::Write};

    const INDEX: &str = "Package: bash\n\
        Version: 5.2.15-2+b2\n\
        Architecture: amd64\n\
        Filename: pool/main/b/bash/bash_5.2.15-2+b2_amd64.deb\n\
        SHA256: 32ff1c5dffc1f77d69d2a630a1db3f4986f501fc116a7fc6e16d09797e42ef9f\n\
        \n\
        Package: mawk\n\
        Version: 1.3.4.20200120-3.1\n\
        Architecture: amd64\n\
        Provides: awk\n\
        Filename: pool/main/m/mawk/mawk_1.3.4.20200120-3.1_amd64.deb\n\
        SHA256: 62a648e02c3faf5a8d9e5734ee49d0a46b2725b57a402ed7f6ff6a667ea3c7d2\n";

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(sha2::Sha256::digest(data))
    }

    fn component(sums: HashMap<String, String>) -> Component {
        Component {
            name: "main".to_string(),
            arch: "amd64".to_string(),
            base_url: Url::parse(
                "https://deb.debian.org/debian/dists/stable/main/binary-amd64/",
            )
            .unwrap(),
            sha256_sums: sums,
            source_url: Url::parse("https://deb.debian.org/debian/").unwrap(),
        }
    }

    #[test]
    fn decodes_plain_index_and_annotates_urls() -> Result<()> {
        let sums = HashMap::from([("Packages".to_string(), sha256_hex(INDEX.as_bytes()))]);

        let records = component(sums).decode_index("Packages", INDEX.as_bytes())?;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name(), "bash");
        assert_eq!(
            records[0].urls()[0].as_str(),
            "https://deb.debian.org/debian/pool/main/b/bash/bash_5.2.15-2+b2_amd64.deb"
        );

        Ok(())
    }

    #[test]
    fn decodes_gzip_index() -> Result<()> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(INDEX.as_bytes())?;
        let compressed = encoder.finish()?;

        // The digest covers the compressed body.
        let sums = HashMap::from([("Packages.gz".to_string(), sha256_hex(&compressed))]);

        let records = component(sums).decode_index("Packages.gz", &compressed)?;

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name(), "mawk");

        Ok(())
    }

    #[test]
    fn corrupted_index_fails_verification() {
        let sums = HashMap::from([("Packages".to_string(), sha256_hex(INDEX.as_bytes()))]);

        let mut corrupted = INDEX.as_bytes().to_vec();
        *corrupted.last_mut().unwrap() ^= 0x01;

        let res = component(sums).decode_index("Packages", &corrupted);

        assert!(matches!(res, Err(Error::HashMismatch)));
    }

    #[test]
    fn missing_manifest_entry_is_an_error() {
        let res = component(HashMap::new()).decode_index("Packages", INDEX.as_bytes());

        assert!(matches!(res, Err(Error::IndexUnreachable(_))));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! OpenPGP trust material.

Repository signatures are verified against keyrings named in the recipe.
A keyring location is either a filesystem path or an HTTPS URL; other URL
schemes are rejected.
*/

use {
    crate::{
        error::{Error, Result},
        repository::http::HttpClient,
    },
    pgp::composed::{Deserializable, SignedPublicKey},
    pgp_cleartext::CleartextSignatures,
    std::io::Read,
    tracing::debug,
    url::Url,
};

/// A set of trusted OpenPGP public keys.
#[derive(Debug, Default)]
pub struct Keyring {
    keys: Vec<SignedPublicKey>,
}

impl Keyring {
    /// Load a keyring from a filesystem path or HTTPS URL.
    ///
    /// An empty location yields an empty keyring. URL bodies are fully
    /// read before parsing so the response cache observes the complete
    /// response.
    pub async fn load(location: &str, http: &HttpClient) -> Result<Self> {
        if location.is_empty() {
            return Ok(Self::default());
        }

        if location.contains("://") {
            let url = Url::parse(location)?;

            if url.scheme() != "https" {
                return Err(Error::KeySchemeNotAllowed(location.to_string()));
            }

            debug!(url = %url, "downloading keyring");

            let response = http.get(&url).await?;

            Self::from_armored_reader(std::io::Cursor::new(&response.body[..]))
        } else {
            debug!(path = location, "reading keyring file");

            let file = std::fs::File::open(location)?;

            Self::from_armored_reader(file)
        }
    }

    /// Parse an ASCII-armored keyring.
    pub fn from_armored_reader(reader: impl Read + std::io::Seek) -> Result<Self> {
        let (keys, _) = SignedPublicKey::from_armor_many(reader)
            .map_err(|e| Error::KeyringParse(e.to_string()))?;

        let keys = keys
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::KeyringParse(e.to_string()))?;

        Ok(Self { keys })
    }

    /// Whether the keyring holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The number of primary keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether any key (or subkey) in this keyring produced one of the
    /// given cleartext signatures.
    pub fn verifies(&self, signatures: &CleartextSignatures) -> bool {
        for key in &self.keys {
            if matches!(signatures.verify(key), Ok(count) if count > 0) {
                return true;
            }

            for subkey in &key.public_subkeys {
                if matches!(signatures.verify(subkey), Ok(count) if count > 0) {
                    return true;
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod test {
    use {super::*, tokio_util::sync::CancellationToken};

    fn http() -> HttpClient {
        HttpClient::new(None, CancellationToken::new())
    }

    #[tokio::test]
    async fn empty_location_is_empty_keyring() -> Result<()> {
        let keyring = Keyring::load("", &http()).await?;
        assert!(keyring.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn non_https_url_is_rejected() {
        let res = Keyring::load("http://keys.example.com/archive.asc", &http()).await;

        assert!(matches!(res, Err(Error::KeySchemeNotAllowed(_))));

        let res = Keyring::load("ftp://keys.example.com/archive.asc", &http()).await;

        assert!(matches!(res, Err(Error::KeySchemeNotAllowed(_))));
    }

    #[test]
    fn garbage_input_is_a_parse_error() {
        let res = Keyring::from_armored_reader(std::io::Cursor::new("not a keyring".as_bytes()));

        assert!(matches!(res, Err(Error::KeyringParse(_))));
    }
}

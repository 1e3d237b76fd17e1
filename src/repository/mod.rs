// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian repository access.

A [Source] binds a repository URL, a distribution, a component list, and
a trusted keyring. Discovering a source yields [Component] descriptors,
one per (component, architecture) pair published by the signed release.
See <https://wiki.debian.org/DebianRepository/Format>.
*/

use {
    crate::{
        error::{Error, Result},
        keyring::Keyring,
        recipe::SourceConfig,
        repository::{http::HttpClient, release::ReleaseFile},
    },
    std::collections::{HashMap, HashSet},
    tracing::{debug, warn},
    url::Url,
};

pub mod component;
pub mod http;
pub mod release;

pub use component::Component;

const DEFAULT_DISTRIBUTION: &str = "stable";
const DEFAULT_COMPONENT: &str = "main";

/// A Debian repository source.
pub struct Source {
    keyring: Keyring,
    url: Url,
    distribution: String,
    components: Vec<String>,
}

impl Source {
    /// Construct a source from its recipe configuration, loading the
    /// trusted keyring it names.
    pub async fn new(http: &HttpClient, conf: &SourceConfig) -> Result<Self> {
        let distribution = conf
            .distribution
            .clone()
            .unwrap_or_else(|| DEFAULT_DISTRIBUTION.to_string());

        let components = if conf.components.is_empty() {
            vec![DEFAULT_COMPONENT.to_string()]
        } else {
            conf.components.clone()
        };

        // Trailing slashes are significant to Url::join.
        let mut url = Url::parse(&conf.url)?;
        if !url.path().ends_with('/') {
            url.set_path(&format!("{}/", url.path()));
        }

        let keyring = Keyring::load(&conf.signed_by, http).await?;

        Ok(Self {
            keyring,
            url,
            distribution,
            components,
        })
    }

    /// The base URL of this source.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Discover the components available for a target architecture.
    ///
    /// Fetches and verifies the suite's `InRelease`, then intersects its
    /// published architectures with {`all`, `target_arch`} and its
    /// components with the configured set. An empty intersection yields
    /// an empty list.
    pub async fn components(&self, http: &HttpClient, target_arch: &str) -> Result<Vec<Component>> {
        let release_url = self
            .url
            .join(&format!("dists/{}/InRelease", self.distribution))?;

        debug!(url = %release_url, "fetching InRelease");

        let response = http.get(&release_url).await.map_err(|e| match e {
            Error::Cancelled => Error::Cancelled,
            e => Error::ReleaseUnreachable(format!("{}: {}", release_url, e)),
        })?;

        let release = ReleaseFile::from_armored_reader(&response.body[..])?;
        release.require_signed(&self.keyring)?;

        self.components_from_release(&release, target_arch)
    }

    fn components_from_release(
        &self,
        release: &ReleaseFile,
        target_arch: &str,
    ) -> Result<Vec<Component>> {
        let architectures = release
            .architectures()
            .into_iter()
            .filter(|arch| *arch == "all" || *arch == target_arch)
            .collect::<Vec<_>>();

        if architectures.is_empty() {
            warn!(url = %self.url, target_arch, "no architectures available");
            return Ok(vec![]);
        }

        let mut desired = self
            .components
            .iter()
            .map(String::as_str)
            .collect::<HashSet<_>>();
        desired.insert(DEFAULT_COMPONENT);

        let components = release
            .components()
            .into_iter()
            .filter(|component| desired.contains(component))
            .collect::<Vec<_>>();

        if components.is_empty() {
            warn!(url = %self.url, "no components available");
            return Ok(vec![]);
        }

        let entries = release.sha256_entries()?;

        let mut out = vec![];
        for component in &components {
            for arch in &architectures {
                let base_url = self.url.join(&format!(
                    "dists/{}/{}/binary-{}/",
                    self.distribution, component, arch
                ))?;

                let prefix = format!("{}/binary-{}/", component, arch);

                let sha256_sums = entries
                    .iter()
                    .filter(|entry| entry.path.starts_with(&prefix))
                    .map(|entry| (entry.path[prefix.len()..].to_string(), entry.digest.clone()))
                    .collect::<HashMap<_, _>>();

                out.push(Component {
                    name: component.to_string(),
                    arch: arch.to_string(),
                    base_url,
                    sha256_sums,
                    source_url: self.url.clone(),
                });
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const RELEASE: &str = "Suite: stable\n\
        Codename: bookworm\n\
        Architectures: all amd64 arm64\n\
        Components: main contrib non-free\n\
        SHA256:\n \
        c054d8b15020335623e2a72e0f8e67633de1e74c8a5c0a2e3a34795f1b2441dd 1207 main/binary-amd64/Packages.gz\n \
        e2693e5e0a8c39a2c63b6fb7ab9cf05e5cd35b56620953b0cb683ee1b50e20f1 1089 main/binary-all/Packages.gz\n \
        11c1123f28db16e3f28c7b34ae84f1c929c567de6970f3f1b95dac9b498dd80f 8342 contrib/binary-amd64/Packages.gz\n";

    fn source() -> Source {
        Source {
            keyring: Keyring::default(),
            url: Url::parse("https://deb.debian.org/debian/").unwrap(),
            distribution: "stable".to_string(),
            components: vec!["main".to_string()],
        }
    }

    #[test]
    fn intersects_architectures_and_components() -> Result<()> {
        let release = ReleaseFile::from_reader(RELEASE.as_bytes())?;

        let components = source().components_from_release(&release, "amd64")?;

        assert_eq!(components.len(), 2);
        assert_eq!(components[0].name, "main");
        assert_eq!(components[0].arch, "all");
        assert_eq!(components[1].name, "main");
        assert_eq!(components[1].arch, "amd64");

        Ok(())
    }

    #[test]
    fn component_urls_and_checksums_are_scoped() -> Result<()> {
        let release = ReleaseFile::from_reader(RELEASE.as_bytes())?;

        let components = source().components_from_release(&release, "amd64")?;

        let amd64 = &components[1];
        assert_eq!(
            amd64.base_url.as_str(),
            "https://deb.debian.org/debian/dists/stable/main/binary-amd64/"
        );
        assert_eq!(amd64.sha256_sums.len(), 1);
        assert!(amd64.sha256_sums["Packages.gz"].starts_with("c054d8b"));

        Ok(())
    }

    #[test]
    fn unknown_architecture_still_yields_all() -> Result<()> {
        let release = ReleaseFile::from_reader(RELEASE.as_bytes())?;

        // The pseudo-architecture `all` matches any target.
        let components = source().components_from_release(&release, "riscv64")?;
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].arch, "all");

        Ok(())
    }

    #[test]
    fn no_matching_architecture_yields_empty_list() -> Result<()> {
        let release =
            ReleaseFile::from_reader("Architectures: s390x\nComponents: main\n".as_bytes())?;

        let components = source().components_from_release(&release, "amd64")?;
        assert!(components.is_empty());

        Ok(())
    }

    #[test]
    fn main_component_is_always_desired() -> Result<()> {
        let release = ReleaseFile::from_reader(RELEASE.as_bytes())?;

        let mut source = source();
        source.components = vec!["contrib".to_string()];

        let components = source.components_from_release(&release, "amd64")?;

        let names = components.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert!(names.contains(&"main"));
        assert!(names.contains(&"contrib"));

        Ok(())
    }
}

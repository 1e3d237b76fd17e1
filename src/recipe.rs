// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build recipes.

A recipe is a YAML document declaring the repositories, packages, and
users/groups of the filesystem to build.
*/

use {
    crate::error::{Error, Result},
    serde::Deserialize,
    std::io::Read,
};

/// A declarative build recipe.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    /// Build options.
    #[serde(default)]
    pub options: Options,
    /// Apt repositories to fetch packages from.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Package selection.
    #[serde(default)]
    pub packages: PackagesConfig,
    /// Groups to create in the image.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    /// Users to create in the image.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl Recipe {
    /// Load a recipe from YAML.
    pub fn from_yaml(reader: impl Read) -> Result<Self> {
        serde_yaml::from_reader(reader).map_err(|e| Error::Recipe(e.to_string()))
    }
}

/// Build options.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Skip the automatic inclusion of priority `required` packages.
    #[serde(default)]
    pub omit_required: bool,
}

/// An apt repository to use as a package source.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    /// Base URL of the repository.
    pub url: String,
    /// Trusted keyring: an HTTPS URL or a file path.
    #[serde(default)]
    pub signed_by: String,
    /// Distribution name (e.g. `bookworm`) or class (e.g. `stable`).
    /// Defaults to `stable`.
    #[serde(default)]
    pub distribution: Option<String>,
    /// Components to use. Defaults to `[main]`.
    #[serde(default)]
    pub components: Vec<String>,
}

/// Package selection configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagesConfig {
    /// Packages to install, each `name` or `name=version`.
    #[serde(default)]
    pub include: Vec<String>,
    /// Packages to exclude from installation.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A group to create.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    pub name: String,
    /// Explicit GID; allocated when absent.
    #[serde(default)]
    pub gid: Option<u32>,
    /// Users to add as members.
    #[serde(default)]
    pub members: Vec<String>,
    /// Allocate the GID from the system range.
    #[serde(default)]
    pub system: bool,
}

/// A user to create.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    pub name: String,
    /// Explicit UID; allocated when absent.
    #[serde(default)]
    pub uid: Option<u32>,
    /// Groups the user belongs to; the first is the primary group.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub home_dir: String,
    #[serde(default)]
    pub shell: String,
    /// Allocate the UID from the system range.
    #[serde(default)]
    pub system: bool,
}

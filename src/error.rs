// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use thiserror::Error;

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid version syntax: {0}")]
    VersionSyntax(String),

    #[error("unknown version relation operator: {0}")]
    RelationOperator(String),

    #[error("unable to locate package: {0}")]
    PackageNotFound(String),

    #[error("requested package is no longer selected: {0}")]
    PinDroppedDuringResolution(String),

    #[error("unsatisfiable dependency: {0}")]
    UnsatisfiableDependency(String),

    #[error("virtual package without an installable provider: {0}")]
    UnsatisfiableVirtual(String),

    #[error("virtual package with multiple installation candidates: {0}")]
    AmbiguousVirtual(String),

    #[error("failed to fetch release file: {0}")]
    ReleaseUnreachable(String),

    #[error("release file is not signed by a trusted key: {0}")]
    ReleaseUnsigned(String),

    #[error("failed to fetch packages index: {0}")]
    IndexUnreachable(String),

    #[error("content hash mismatch")]
    HashMismatch,

    #[error("unsupported debian package version: {0}")]
    UnsupportedDebVersion(String),

    #[error("unknown compression format")]
    UnknownCompression,

    #[error("malformed control data: {0}")]
    MalformedControl(String),

    #[error("key location must be a file path or https URL: {0}")]
    KeySchemeNotAllowed(String),

    #[error("failed to parse keyring: {0}")]
    KeyringParse(String),

    #[error("release file parse error: {0}")]
    ReleaseParse(String),

    #[error("failed to download package: {0}")]
    DownloadFailed(String),

    #[error("package {package}: {source}")]
    Package {
        package: String,
        #[source]
        source: Box<Error>,
    },

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recipe error: {0}")]
    Recipe(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap an error with the name of the package being processed.
    pub fn for_package(self, package: impl ToString) -> Self {
        Self::Package {
            package: package.to_string(),
            source: Box::new(self),
        }
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, Error>;

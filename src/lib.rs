// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Declarative builder for minimal Debian base filesystems.

A recipe names package repositories, packages to include or exclude, and
users/groups. This crate fetches signed repository metadata, resolves a
consistent package set, downloads and unpacks the selected packages, and
emits a reproducible root filesystem payload plus a compatible dpkg
database, for consumption by a downstream image builder.

# A Tour of Functionality

Repository interaction lives in the [repository] module. A
[repository::Source] binds a repository URL, distribution, component
list, and trusted OpenPGP keyring ([keyring::Keyring]); discovering it
fetches and verifies the suite's signed `InRelease` and yields
[repository::Component] descriptors. Each component downloads and
hash-verifies its `Packages` index into [package::PackageRecord]s.

Records are indexed by a [database::PackageDB]: an ordered map keyed by
`(name, version)` with first-class virtual packages maintained from
`Provides` declarations. The [resolver] module computes a dependency
closure over the database with iterative pruning and newest-wins
selection.

Selected packages are fetched by [download] and decomposed by [unpack],
which synthesizes the dpkg database tree (`var/lib/dpkg/status`,
per-package info files and file manifests) as a single reproducible
tarball.

[builder] sequences the above per target architecture. Supporting
primitives: deb822 parsing in [control], version ordering in
[package_version], the relationship meta language in [dependency],
digest-verifying readers and magic-byte decompression in [io], and an
HTTP response cache in [cache].
*/

pub mod builder;
pub mod cache;
pub mod control;
pub mod database;
pub mod dependency;
pub mod download;
pub mod error;
pub mod io;
pub mod keyring;
pub mod package;
pub mod package_version;
pub mod recipe;
pub mod repository;
pub mod resolver;
pub mod unpack;
pub mod users;

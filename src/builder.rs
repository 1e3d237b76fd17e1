// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build orchestration.

Sequences the core subsystems for one target architecture: source
discovery and index ingestion (concurrent), dependency resolution,
package download, and unpacking. The resulting artifacts are handed to a
downstream image builder.

Each bulk phase is supervised: the first task failure cancels the phase's
token, which every in-flight network operation observes.
*/

use {
    crate::{
        database::PackageDB,
        download,
        error::Result,
        package::Priority,
        recipe::Recipe,
        repository::{http::HttpClient, Component, Source},
        resolver,
        unpack::{self, UnpackResult},
    },
    chrono::{DateTime, Utc},
    futures::{stream::FuturesUnordered, StreamExt},
    std::path::{Path, PathBuf},
    tokio_util::sync::CancellationToken,
    tracing::info,
};

/// Artifacts produced for one platform, consumed by the image builder.
pub struct PlatformArtifacts {
    /// Tarball holding the synthetic dpkg database tree.
    pub dpkg_database_archive: PathBuf,
    /// Uncompressed package data archives, in deterministic order.
    pub data_archives: Vec<PathBuf>,
    /// The newest `Last-Modified` across all consumed package indices,
    /// suitable as a reproducible build timestamp.
    pub source_date_epoch: DateTime<Utc>,
}

/// Run every task to completion, cancelling the phase token and
/// returning the first error if any task fails.
async fn supervised<T>(
    tasks: impl IntoIterator<Item = impl std::future::Future<Output = Result<T>>>,
    phase: &CancellationToken,
) -> Result<Vec<T>> {
    let mut stream = tasks.into_iter().collect::<FuturesUnordered<_>>();

    let mut results = vec![];
    while let Some(result) = stream.next().await {
        match result {
            Ok(value) => results.push(value),
            Err(e) => {
                phase.cancel();
                return Err(e);
            }
        }
    }

    Ok(results)
}

/// Populate a package database from every source in the recipe.
///
/// Source discovery and component ingestion both run concurrently
/// (components are few, so parallelism is unbounded). Returns the
/// database and the newest index `Last-Modified` instant.
pub async fn load_package_db(
    http: &HttpClient,
    recipe: &Recipe,
    target_arch: &str,
) -> Result<(PackageDB, DateTime<Utc>)> {
    let phase = http.cancellation_token().child_token();

    let components: Vec<Component> = supervised(
        recipe.sources.iter().map(|conf| {
            let http = http.clone();

            async move {
                let source = Source::new(&http, conf).await?;
                source.components(&http, target_arch).await
            }
        }),
        &phase,
    )
    .await?
    .into_iter()
    .flatten()
    .collect();

    info!(components = components.len(), "loading package indices");

    let db = PackageDB::new();
    let mut source_date_epoch = crate::repository::http::zero_instant();

    // Aggregate on this task: workers fetch and decode, the drain loop
    // owns the database and the epoch.
    let mut stream = components
        .iter()
        .map(|component| {
            let http = http.clone();

            async move { component.packages(&http).await }
        })
        .collect::<FuturesUnordered<_>>();

    while let Some(result) = stream.next().await {
        match result {
            Ok((records, last_modified)) => {
                if last_modified > source_date_epoch {
                    source_date_epoch = last_modified;
                }

                db.add_all(records);
            }
            Err(e) => {
                phase.cancel();
                return Err(e);
            }
        }
    }

    Ok((db, source_date_epoch))
}

/// Names of every priority `required` package in the database.
pub fn required_package_names(db: &PackageDB) -> Vec<String> {
    let mut names = vec![];

    let _ = db.for_each::<()>(|record| {
        if record.priority() == Some(Priority::Required) {
            names.push(record.name().to_string());
        }

        Ok(())
    });

    names.dedup();

    names
}

/// Build the artifacts for one target architecture.
pub async fn build_platform(
    http: &HttpClient,
    recipe: &Recipe,
    target_arch: &str,
    work_dir: &Path,
) -> Result<PlatformArtifacts> {
    info!(target_arch, "loading packages");

    let (db, source_date_epoch) = load_package_db(http, recipe, target_arch).await?;

    // Priority `required` packages are installed unless the recipe opts
    // out.
    let mut include = if recipe.options.omit_required {
        vec![]
    } else {
        required_package_names(&db)
    };
    include.extend(recipe.packages.include.iter().cloned());

    info!(count = include.len(), "resolving selected packages");

    let selected = resolver::resolve(&db, &include, &recipe.packages.exclude)?;

    info!(count = selected.len(), "downloading selected packages");

    let download_dir = work_dir.join("packages");
    let package_paths = download::download_selected(http, &download_dir, &selected).await?;

    info!("unpacking packages");

    let UnpackResult {
        dpkg_database_archive,
        data_archives,
    } = unpack::unpack(work_dir, &package_paths, http.cancellation_token()).await?;

    Ok(PlatformArtifacts {
        dpkg_database_archive,
        data_archives,
        source_date_epoch,
    })
}

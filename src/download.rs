// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Fetching selected packages.

Downloads every record in a selected set, verifying each `.deb` body
against the record's SHA-256. Mirror URLs are tried in randomized order;
only after every mirror fails does the joined error surface.
*/

use {
    crate::{
        database::PackageDB,
        error::{Error, Result},
        io::{self, HashReader},
        package::PackageRecord,
        repository::http::HttpClient,
    },
    futures::StreamExt,
    rand::seq::SliceRandom,
    std::path::{Path, PathBuf},
    tracing::debug,
    url::Url,
};

/// Concurrent package fetch cap.
const DOWNLOAD_CONCURRENCY: usize = 10;

/// Download every package in `selected` into `download_dir`.
///
/// Returns the downloaded paths sorted, so downstream phases see a
/// deterministic order regardless of completion order.
pub async fn download_selected(
    http: &HttpClient,
    download_dir: &Path,
    selected: &PackageDB,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(download_dir).await?;

    let fetches = selected.records().into_iter().map(|record| {
        let http = http.clone();
        let dir = download_dir.to_path_buf();

        async move { download_with_mirrors(&http, &dir, &record).await }
    });

    let mut stream = futures::stream::iter(fetches).buffer_unordered(DOWNLOAD_CONCURRENCY);

    let mut paths = vec![];
    while let Some(path) = stream.next().await {
        paths.push(path?);
    }

    paths.sort();

    Ok(paths)
}

async fn download_with_mirrors(
    http: &HttpClient,
    dir: &Path,
    record: &PackageRecord,
) -> Result<PathBuf> {
    let sha256 = record.sha256().ok_or_else(|| {
        Error::DownloadFailed(format!("{} has no SHA256 digest", record.name()))
    })?;

    let mut urls = record.urls().to_vec();
    urls.shuffle(&mut rand::thread_rng());

    if urls.is_empty() {
        return Err(Error::DownloadFailed(format!(
            "{} has no download URLs",
            record.name()
        )));
    }

    let mut errors: Vec<String> = vec![];

    for url in &urls {
        debug!(url = %url, "downloading package");

        match download_one(http, dir, url, sha256).await {
            Ok(path) => return Ok(path),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => errors.push(format!("{}: {}", url, e)),
        }
    }

    Err(Error::DownloadFailed(format!(
        "{}: {}",
        record.name(),
        errors.join("; ")
    )))
}

async fn download_one(http: &HttpClient, dir: &Path, url: &Url, sha256: &str) -> Result<PathBuf> {
    let response = http.get(url).await?;

    let mut hashed = HashReader::new(&response.body[..]);
    io::drain(&mut hashed)?;
    hashed.verify(sha256)?;

    let path = dir.join(deb_filename(url)?);
    tokio::fs::write(&path, &response.body).await?;

    Ok(path)
}

/// The local filename for a package URL: the final path segment.
fn deb_filename(url: &Url) -> Result<String> {
    url.path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| Error::DownloadFailed(format!("URL has no filename: {}", url)))
}

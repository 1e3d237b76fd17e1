// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package unpacking.

Decomposes `.deb` files into their control and data archives and
synthesizes the dpkg database tree a compatible package manager expects:
`var/lib/dpkg/status`, per-package info files, and per-package file
manifests, serialized into a single `dpkg.tar`.

Decompression fans out to a worker pool sized to the CPU count; database
synthesis is sequential because its writes are ordering-dependent. All
archive headers are normalized (mtime 0, uid/gid 0) so the output is
bit-exact reproducible for identical inputs.
*/

use {
    crate::{
        control::ControlParagraphReader,
        error::{Error, Result},
        io::{self, Compression},
        package::PackageRecord,
    },
    futures::StreamExt,
    std::{
        fs::File,
        io::Read,
        path::{Path, PathBuf},
    },
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

/// Status words stamped onto every unpacked package.
const UNPACKED_STATUS: &[&str] = &["install", "ok", "unpacked"];

/// Artifacts produced by [unpack].
pub struct UnpackResult {
    /// Tarball holding the synthetic dpkg database tree.
    pub dpkg_database_archive: PathBuf,
    /// Uncompressed `data.tar` paths, one per input, in input order.
    pub data_archives: Vec<PathBuf>,
}

/// Unpack `.deb` files into `temp_dir` and synthesize the dpkg database.
pub async fn unpack(
    temp_dir: &Path,
    package_paths: &[PathBuf],
    cancel: &CancellationToken,
) -> Result<UnpackResult> {
    // Decompress all packages in parallel. Workers fill a fixed-size slice
    // by index so downstream output follows input order.
    let tasks = package_paths.iter().enumerate().map(|(index, path)| {
        let temp_dir = temp_dir.to_path_buf();
        let path = path.clone();
        let cancel = cancel.clone();

        async move {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let archives = tokio::task::spawn_blocking(move || {
                decompose_package(&temp_dir, &path)
                    .map_err(|e| e.for_package(deb_stem(&path).unwrap_or_default()))
            })
            .await
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

            Ok((index, archives))
        }
    });

    let mut decompressed: Vec<Option<(PathBuf, PathBuf)>> = vec![None; package_paths.len()];

    let mut stream = futures::stream::iter(tasks).buffer_unordered(num_cpus::get());
    while let Some(result) = stream.next().await {
        let (index, archives) = result?;
        decompressed[index] = Some(archives);
    }
    drop(stream);

    let archives = decompressed
        .into_iter()
        .map(|entry| entry.expect("all workers completed"))
        .collect::<Vec<_>>();

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    // Sequentially build the synthetic database tree.
    let temp_dir = temp_dir.to_path_buf();
    tokio::task::spawn_blocking(move || build_database_archive(&temp_dir, archives))
        .await
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// The package filename without its `.deb` suffix.
fn deb_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();

    Some(name.strip_suffix(".deb").unwrap_or(&name).to_string())
}

/// Split one `.deb` into uncompressed control and data tars on disk.
fn decompose_package(temp_dir: &Path, package_path: &Path) -> Result<(PathBuf, PathBuf)> {
    let stem = deb_stem(package_path)
        .ok_or_else(|| Error::MalformedControl("package path has no filename".into()))?;

    let mut archive = ar::Archive::new(File::open(package_path)?);

    let mut format_checked = false;
    let mut control_path: Option<PathBuf> = None;
    let mut data_path: Option<PathBuf> = None;

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry?;
        let name = String::from_utf8_lossy(entry.header().identifier()).to_string();

        if name == "debian-binary" {
            let mut version = String::new();
            entry.read_to_string(&mut version)?;

            if version != "2.0\n" {
                return Err(Error::UnsupportedDebVersion(version.trim().to_string()));
            }

            format_checked = true;
        } else if name.starts_with("control.tar") {
            if control_path.is_some() {
                return Err(Error::MalformedControl("duplicate control archive".into()));
            }

            debug!(package = %stem, member = %name, "decompressing control archive");

            let out = temp_dir.join(format!("{}_control.tar", stem));
            extract_archive_member(&mut entry, &out)?;
            control_path = Some(out);
        } else if name.starts_with("data.tar") {
            if data_path.is_some() {
                return Err(Error::MalformedControl("duplicate data archive".into()));
            }

            debug!(package = %stem, member = %name, "decompressing data archive");

            let out = temp_dir.join(format!("{}_data.tar", stem));
            extract_archive_member(&mut entry, &out)?;
            data_path = Some(out);
        }
    }

    if !format_checked {
        return Err(Error::UnsupportedDebVersion("missing debian-binary".into()));
    }

    let control_path =
        control_path.ok_or_else(|| Error::MalformedControl("missing control archive".into()))?;
    let data_path =
        data_path.ok_or_else(|| Error::MalformedControl("missing data archive".into()))?;

    Ok((control_path, data_path))
}

/// Stream-decompress an archive member to a file.
///
/// Compression is detected from the member's leading bytes. An
/// uncompressed tar passes through; anything unrecognizable is an error.
fn extract_archive_member(member: impl Read, out_path: &Path) -> Result<()> {
    let (header, replay) = io::peek(member, 512)?;

    let mut reader: Box<dyn Read + '_> = match Compression::detect(&header) {
        Some(compression) => io::decompressor(compression, replay)?,
        None if io::is_tar_header(&header) => Box::new(replay),
        None => return Err(Error::UnknownCompression),
    };

    let mut out = File::create(out_path)?;
    std::io::copy(&mut reader, &mut out)?;

    Ok(())
}

/// Build `dpkg.tar` from decomposed control/data archive pairs.
fn build_database_archive(
    temp_dir: &Path,
    archives: Vec<(PathBuf, PathBuf)>,
) -> Result<UnpackResult> {
    let dpkg_tar_path = temp_dir.join("dpkg.tar");

    let mut builder = tar::Builder::new(File::create(&dpkg_tar_path)?);

    for dir in ["var/", "var/lib/", "var/lib/dpkg/", "var/lib/dpkg/info/"] {
        append_dir(&mut builder, dir)?;
    }

    let mut records = Vec::with_capacity(archives.len());
    let mut data_archives = Vec::with_capacity(archives.len());

    for (control_path, data_path) in &archives {
        let stem = control_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
            .trim_end_matches("_control.tar")
            .to_string();

        let mut record = extract_control_archive(&mut builder, control_path)
            .map_err(|e| e.for_package(&stem))?;
        record.set_status(UNPACKED_STATUS);

        let files = data_archive_file_list(data_path).map_err(|e| e.for_package(&stem))?;

        // An empty data archive gets no file manifest.
        if !files.is_empty() {
            let content = files.join("\n") + "\n";

            append_file(
                &mut builder,
                &format!("var/lib/dpkg/info/{}.list", record.name()),
                0o644,
                content.as_bytes(),
            )?;
        }

        records.push(record);
        data_archives.push(data_path.clone());
    }

    let mut status = Vec::new();
    for record in &records {
        record.to_status_paragraph().write(&mut status)?;
        status.push(b'\n');
    }

    append_file(&mut builder, "var/lib/dpkg/status", 0o644, &status)?;

    builder.finish()?;

    Ok(UnpackResult {
        dpkg_database_archive: dpkg_tar_path,
        data_archives,
    })
}

/// Decode the `control` member into a record and emit every other member
/// as a dpkg info file, preserving its mode.
fn extract_control_archive(
    builder: &mut tar::Builder<File>,
    control_tar_path: &Path,
) -> Result<PackageRecord> {
    let mut archive = tar::Archive::new(File::open(control_tar_path)?);

    let mut control_data: Option<Vec<u8>> = None;
    let mut members: Vec<(String, u32, Vec<u8>)> = vec![];

    for entry in archive.entries()? {
        let mut entry = entry?;

        if entry.header().entry_type().is_dir() {
            continue;
        }

        let name = normalize_tar_path(&entry.path()?.to_string_lossy());
        if name.is_empty() {
            continue;
        }

        let mode = entry.header().mode()? & 0o7777;

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;

        if name == "control" {
            control_data = Some(data);
        } else {
            members.push((name, mode, data));
        }
    }

    let control_data = control_data
        .ok_or_else(|| Error::MalformedControl("control archive has no control member".into()))?;

    let paragraph = ControlParagraphReader::new(&control_data[..])
        .next()
        .ok_or_else(|| Error::MalformedControl("control member is empty".into()))??;

    let record = PackageRecord::from_paragraph(paragraph)?;

    // Deterministic info-file order regardless of how the control tar was
    // assembled.
    members.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, mode, data) in &members {
        append_file(
            builder,
            &format!("var/lib/dpkg/info/{}.{}", record.name(), name),
            *mode,
            data,
        )?;
    }

    Ok(record)
}

/// Every entry path in a data archive, excluding the root.
fn data_archive_file_list(data_tar_path: &Path) -> Result<Vec<String>> {
    let mut archive = tar::Archive::new(File::open(data_tar_path)?);

    let mut files = vec![];
    for entry in archive.entries()? {
        let entry = entry?;

        let name = normalize_tar_path(&entry.path()?.to_string_lossy());
        if name.is_empty() {
            continue;
        }

        files.push(name);
    }

    Ok(files)
}

/// Strip the `./` prefix and any trailing slash from a tar entry path.
fn normalize_tar_path(path: &str) -> String {
    path.trim_start_matches("./")
        .trim_end_matches('/')
        .to_string()
}

fn deterministic_header() -> tar::Header {
    let mut header = tar::Header::new_ustar();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);

    header
}

fn append_dir(builder: &mut tar::Builder<File>, path: &str) -> Result<()> {
    let mut header = deterministic_header();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);

    builder.append_data(&mut header, path, std::io::empty())?;

    Ok(())
}

fn append_file(
    builder: &mut tar::Builder<File>,
    path: &str,
    mode: u32,
    data: &[u8],
) -> Result<()> {
    let mut header = deterministic_header();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(mode);
    header.set_size(data.len() as u64);

    builder.append_data(&mut header, path, data)?;

    Ok(())
}

#[cfg(test)]
mod test {
    use {super::*, std::collections::BTreeSet, std::io::Write};

    /// Assemble a `.deb`: an ar archive holding `debian-binary`, a
    /// compressed control tar, and a compressed data tar.
    struct DebSpec<'a> {
        filename: &'a str,
        package: &'a str,
        version: &'a str,
        control_members: Vec<(&'a str, u32, &'a str)>,
        data_paths: Vec<&'a str>,
        format_version: &'a str,
    }

    fn build_control_tar(spec: &DebSpec<'_>) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        let control = format!(
            "Package: {}\nVersion: {}\nArchitecture: amd64\n",
            spec.package, spec.version
        );

        let mut header = tar::Header::new_ustar();
        header.set_mode(0o644);
        header.set_size(control.len() as u64);
        builder
            .append_data(&mut header, "./control", control.as_bytes())
            .unwrap();

        for (name, mode, content) in &spec.control_members {
            let mut header = tar::Header::new_ustar();
            header.set_mode(*mode);
            header.set_size(content.len() as u64);
            builder
                .append_data(&mut header, format!("./{}", name), content.as_bytes())
                .unwrap();
        }

        builder.into_inner().unwrap()
    }

    fn build_data_tar(spec: &DebSpec<'_>) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        for path in &spec.data_paths {
            let mut header = tar::Header::new_ustar();

            if path.ends_with('/') {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder
                    .append_data(&mut header, format!("./{}", path), std::io::empty())
                    .unwrap();
            } else {
                header.set_mode(0o644);
                header.set_size(4);
                builder
                    .append_data(&mut header, format!("./{}", path), "data".as_bytes())
                    .unwrap();
            }
        }

        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn xz(data: &[u8]) -> Vec<u8> {
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn build_deb(dir: &Path, spec: &DebSpec<'_>) -> PathBuf {
        let control_tar = gzip(&build_control_tar(spec));
        let data_tar = xz(&build_data_tar(spec));

        let path = dir.join(spec.filename);
        let mut builder = ar::Builder::new(File::create(&path).unwrap());

        let version = spec.format_version.as_bytes();
        let mut header = ar::Header::new(b"debian-binary".to_vec(), version.len() as u64);
        header.set_mode(0o644);
        builder.append(&header, version).unwrap();

        let mut header = ar::Header::new(b"control.tar.gz".to_vec(), control_tar.len() as u64);
        header.set_mode(0o644);
        builder.append(&header, &control_tar[..]).unwrap();

        let mut header = ar::Header::new(b"data.tar.xz".to_vec(), data_tar.len() as u64);
        header.set_mode(0o644);
        builder.append(&header, &data_tar[..]).unwrap();

        path
    }

    fn base_files_spec() -> DebSpec<'static> {
        DebSpec {
            filename: "base-files_12.4+deb12u5_amd64.deb",
            package: "base-files",
            version: "12.4+deb12u5",
            control_members: vec![
                ("conffiles", 0o644, "/etc/debian_version\n"),
                ("md5sums", 0o644, "d41d8cd98f00b204e9800998ecf8427e  etc/debian_version\n"),
                ("postinst", 0o755, "#!/bin/sh\nexit 0\n"),
            ],
            data_paths: vec!["etc/", "etc/debian_version"],
            format_version: "2.0\n",
        }
    }

    fn base_passwd_spec() -> DebSpec<'static> {
        DebSpec {
            filename: "base-passwd_3.6.1_amd64.deb",
            package: "base-passwd",
            version: "3.6.1",
            control_members: vec![
                ("md5sums", 0o644, "d41d8cd98f00b204e9800998ecf8427e  etc/passwd\n"),
                ("postinst", 0o755, "#!/bin/sh\nexit 0\n"),
                ("postrm", 0o755, "#!/bin/sh\nexit 0\n"),
                ("preinst", 0o755, "#!/bin/sh\nexit 0\n"),
                ("templates", 0o644, "Template: base-passwd/title\n"),
            ],
            data_paths: vec!["etc/", "etc/passwd"],
            format_version: "2.0\n",
        }
    }

    fn archive_paths(path: &Path) -> BTreeSet<String> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());

        archive
            .entries()
            .unwrap()
            .map(|entry| normalize_tar_path(&entry.unwrap().path().unwrap().to_string_lossy()))
            .collect()
    }

    fn archive_file(path: &Path, name: &str) -> Option<Vec<u8>> {
        let mut archive = tar::Archive::new(File::open(path).unwrap());

        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();

            if normalize_tar_path(&entry.path().unwrap().to_string_lossy()) == name {
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                return Some(data);
            }
        }

        None
    }

    #[tokio::test]
    async fn unpack_two_packages_builds_dpkg_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let packages = vec![
            build_deb(dir.path(), &base_files_spec()),
            build_deb(dir.path(), &base_passwd_spec()),
        ];

        let result = unpack(dir.path(), &packages, &CancellationToken::new()).await?;

        assert_eq!(result.data_archives.len(), 2);
        assert!(result.data_archives[0]
            .to_string_lossy()
            .ends_with("base-files_12.4+deb12u5_amd64_data.tar"));
        assert!(result.data_archives[1]
            .to_string_lossy()
            .ends_with("base-passwd_3.6.1_amd64_data.tar"));

        let expected = [
            "var",
            "var/lib",
            "var/lib/dpkg",
            "var/lib/dpkg/info",
            "var/lib/dpkg/info/base-files.conffiles",
            "var/lib/dpkg/info/base-files.list",
            "var/lib/dpkg/info/base-files.md5sums",
            "var/lib/dpkg/info/base-files.postinst",
            "var/lib/dpkg/info/base-passwd.list",
            "var/lib/dpkg/info/base-passwd.md5sums",
            "var/lib/dpkg/info/base-passwd.postinst",
            "var/lib/dpkg/info/base-passwd.postrm",
            "var/lib/dpkg/info/base-passwd.preinst",
            "var/lib/dpkg/info/base-passwd.templates",
            "var/lib/dpkg/status",
        ]
        .into_iter()
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>();

        assert_eq!(archive_paths(&result.dpkg_database_archive), expected);

        Ok(())
    }

    #[tokio::test]
    async fn status_and_file_lists_have_expected_content() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let packages = vec![
            build_deb(dir.path(), &base_files_spec()),
            build_deb(dir.path(), &base_passwd_spec()),
        ];

        let result = unpack(dir.path(), &packages, &CancellationToken::new()).await?;

        let status = String::from_utf8(
            archive_file(&result.dpkg_database_archive, "var/lib/dpkg/status").unwrap(),
        )
        .unwrap();

        assert!(status.contains("Package: base-files\n"));
        assert!(status.contains("Package: base-passwd\n"));
        assert_eq!(status.matches("Status: install ok unpacked\n").count(), 2);

        let list = String::from_utf8(
            archive_file(
                &result.dpkg_database_archive,
                "var/lib/dpkg/info/base-files.list",
            )
            .unwrap(),
        )
        .unwrap();

        assert_eq!(list, "etc\netc/debian_version\n");

        Ok(())
    }

    #[tokio::test]
    async fn unpack_is_reproducible() -> Result<()> {
        let build = |dir: &Path| {
            vec![
                build_deb(dir, &base_files_spec()),
                build_deb(dir, &base_passwd_spec()),
            ]
        };

        let dir_a = tempfile::tempdir()?;
        let result_a = unpack(dir_a.path(), &build(dir_a.path()), &CancellationToken::new()).await?;

        let dir_b = tempfile::tempdir()?;
        let result_b = unpack(dir_b.path(), &build(dir_b.path()), &CancellationToken::new()).await?;

        assert_eq!(
            std::fs::read(&result_a.dpkg_database_archive)?,
            std::fs::read(&result_b.dpkg_database_archive)?
        );

        Ok(())
    }

    #[tokio::test]
    async fn preserves_info_file_modes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let packages = vec![build_deb(dir.path(), &base_files_spec())];

        let result = unpack(dir.path(), &packages, &CancellationToken::new()).await?;

        let mut archive = tar::Archive::new(File::open(&result.dpkg_database_archive)?);
        for entry in archive.entries()? {
            let entry = entry?;
            let path = normalize_tar_path(&entry.path()?.to_string_lossy());

            if path == "var/lib/dpkg/info/base-files.postinst" {
                assert_eq!(entry.header().mode()? & 0o7777, 0o755);
                return Ok(());
            }
        }

        panic!("postinst entry not found");
    }

    #[tokio::test]
    async fn empty_data_archive_omits_file_list() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let mut spec = base_files_spec();
        spec.data_paths = vec![];

        let packages = vec![build_deb(dir.path(), &spec)];
        let result = unpack(dir.path(), &packages, &CancellationToken::new()).await?;

        assert!(archive_file(
            &result.dpkg_database_archive,
            "var/lib/dpkg/info/base-files.list"
        )
        .is_none());

        Ok(())
    }

    #[tokio::test]
    async fn unsupported_format_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let mut spec = base_files_spec();
        spec.format_version = "3.0\n";

        let packages = vec![build_deb(dir.path(), &spec)];
        let res = unpack(dir.path(), &packages, &CancellationToken::new()).await;

        match res {
            Err(Error::Package { source, .. }) => {
                assert!(matches!(*source, Error::UnsupportedDebVersion(_)))
            }
            other => panic!("expected wrapped UnsupportedDebVersion, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn unknown_member_compression_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk_1.0_amd64.deb");

        let mut builder = ar::Builder::new(File::create(&path).unwrap());

        let mut header = ar::Header::new(b"debian-binary".to_vec(), 4);
        header.set_mode(0o644);
        builder.append(&header, "2.0\n".as_bytes()).unwrap();

        let garbage = b"\x7fELF not an archive at all";
        let mut header = ar::Header::new(b"control.tar.zst".to_vec(), garbage.len() as u64);
        header.set_mode(0o644);
        builder.append(&header, &garbage[..]).unwrap();

        drop(builder);

        let res = unpack(
            dir.path(),
            &[path],
            &CancellationToken::new(),
        )
        .await;

        match res {
            Err(Error::Package { source, .. }) => {
                assert!(matches!(*source, Error::UnknownCompression))
            }
            other => panic!("expected wrapped UnknownCompression, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn cancelled_token_aborts_unpack() {
        let dir = tempfile::tempdir().unwrap();
        let packages = vec![build_deb(dir.path(), &base_files_spec())];

        let cancel = CancellationToken::new();
        cancel.cancel();

        let res = unpack(dir.path(), &packages, &cancel).await;

        assert!(matches!(res, Err(Error::Cancelled)));
    }
}

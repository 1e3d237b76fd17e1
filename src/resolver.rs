// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency resolution.

Given a populated [PackageDB] and lists of packages to include and
exclude, computes a closed, consistent package selection. The resolver is
deliberately greedy: it walks the dependency closure breadth-first,
iteratively prunes candidates whose dependencies cannot be satisfied, and
selects the newest version of each remaining name, with explicit
`name=version` pins taking precedence. Conflict fields are not enforced.
*/

use {
    crate::{
        database::{Entry, PackageDB, PackageKey, VirtualPackage},
        dependency::{Possibility, VersionOperator},
        error::{Error, Result},
        package::{PackageRecord, Priority},
        package_version::PackageVersion,
    },
    std::collections::{BTreeMap, HashSet, VecDeque},
    tracing::debug,
};

/// Resolve the dependency closure of `include` against `package_db`.
///
/// Entries in `include` and `exclude` are package names with an optional
/// `=version` suffix. The returned database contains the selected set.
pub fn resolve(package_db: &PackageDB, include: &[String], exclude: &[String]) -> Result<PackageDB> {
    // Phase 1: seed the candidate set from the include list.
    let mut requested: BTreeMap<String, Option<PackageVersion>> = BTreeMap::new();

    let mut excluded: HashSet<String> = HashSet::new();
    for entry in exclude {
        let (name, _) = parse_name_version(entry)?;
        excluded.insert(name);
    }

    let candidate_db = PackageDB::new();

    for entry in include {
        let (name, version) = parse_name_version(entry)?;

        match &version {
            Some(version) => {
                let found = package_db
                    .exactly_equal(&name, version)
                    .and_then(|entry| entry.as_real().cloned())
                    .ok_or_else(|| Error::PackageNotFound(entry.clone()))?;

                candidate_db.add(found);
            }
            None => {
                let entries = package_db.get(&name);
                if entries.is_empty() {
                    return Err(Error::PackageNotFound(entry.clone()));
                }

                candidate_db.add_all(entries.iter().filter_map(|e| e.as_real().cloned()));
            }
        }

        requested.insert(name, version);
    }

    // Phase 2: breadth-first dependency closure.
    debug!("building dependency closure");

    let mut queue: VecDeque<PackageRecord> = candidate_db.records().into();
    let mut visited: HashSet<PackageKey> = HashSet::new();

    while let Some(record) = queue.pop_front() {
        let key = PackageKey::new(record.name(), record.version().clone());
        if !visited.insert(key) {
            continue;
        }

        let deps = match dependencies_of(package_db, &candidate_db, &record, &excluded) {
            Ok(deps) => deps,
            Err(e @ (Error::UnsatisfiableVirtual(_) | Error::AmbiguousVirtual(_))) => {
                return Err(e);
            }
            Err(e) => {
                // The candidate stays queued for pruning rather than
                // failing the resolution outright: a newer version with
                // broken dependencies must not shadow a usable older one.
                debug!(
                    name = record.name(),
                    version = %record.version(),
                    error = %e,
                    "candidate has unsatisfiable dependencies"
                );
                continue;
            }
        };

        for dep in deps {
            let dep_key = PackageKey::new(dep.name(), dep.version().clone());

            if !visited.contains(&dep_key) {
                candidate_db.add(dep.clone());
                queue.push_back(dep);
            }
        }
    }

    // Phase 3: iteratively prune candidates with unsatisfiable dependencies.
    debug!("pruning unsatisfiable candidates");
    prune_unsatisfied(&candidate_db, package_db, &excluded);

    // Phase 4: select the newest version of each name, honoring pins.
    debug!("selecting newest version of each package");

    let selected_db = PackageDB::new();

    for record in candidate_db.records() {
        if let Some(Some(pinned)) = requested.get(record.name()) {
            if record.version() == pinned {
                selected_db.add(record);
            }
            continue;
        }

        let existing = selected_db
            .get(record.name())
            .into_iter()
            .find_map(|entry| entry.as_real().cloned());

        match existing {
            Some(existing) => {
                if record.version() > existing.version() {
                    selected_db.remove(&existing);
                    selected_db.add(record);
                }
            }
            None => selected_db.add(record),
        }
    }

    // Phase 5: version selection can invalidate dependents; prune again.
    prune_unsatisfied(&selected_db, package_db, &excluded);

    // Phase 6: every requested package must have survived.
    debug!("confirming requested packages are still selected");

    for (name, version) in &requested {
        match version {
            Some(version) => {
                let survived = selected_db
                    .exactly_equal(name, version)
                    .map(|entry| !entry.is_virtual())
                    .unwrap_or(false);

                if !survived {
                    return Err(Error::PinDroppedDuringResolution(format!(
                        "{}={}",
                        name, version
                    )));
                }
            }
            None => {
                if !selected_db.get(name).iter().any(|e| !e.is_virtual()) {
                    return Err(Error::PinDroppedDuringResolution(name.clone()));
                }
            }
        }
    }

    Ok(selected_db)
}

/// Split an include/exclude entry into a name and optional pinned version.
fn parse_name_version(entry: &str) -> Result<(String, Option<PackageVersion>)> {
    match entry.split_once('=') {
        Some((name, version)) => Ok((name.to_string(), Some(PackageVersion::parse(version)?))),
        None => Ok((entry.to_string(), None)),
    }
}

/// Remove candidates whose dependencies no longer resolve, repeating until
/// a full pass removes nothing.
fn prune_unsatisfied(candidate_db: &PackageDB, package_db: &PackageDB, excluded: &HashSet<String>) {
    loop {
        let mut prune_list = vec![];

        for record in candidate_db.records() {
            if let Err(e) = dependencies_of(package_db, candidate_db, &record, excluded) {
                debug!(
                    name = record.name(),
                    version = %record.version(),
                    error = %e,
                    "pruning unsatisfiable candidate"
                );

                prune_list.push(record);
            }
        }

        if prune_list.is_empty() {
            break;
        }

        for record in &prune_list {
            candidate_db.remove(record);
        }
    }
}

/// Compute the direct dependency records of a package.
///
/// For each relation the first possibility with a non-empty candidate set
/// wins. Version constraints are resolved against the full database with
/// the reference operator collapse: `<<` and `<=` both query
/// earlier-or-equal, `>>` and `>=` both query later-or-equal. Excluded
/// names are dropped after virtual replacement, so an alternative emptied
/// by exclusion falls through to the next one.
fn dependencies_of(
    package_db: &PackageDB,
    candidate_db: &PackageDB,
    record: &PackageRecord,
    excluded: &HashSet<String>,
) -> Result<Vec<PackageRecord>> {
    let mut dependencies = vec![];

    let relations = record.pre_depends().iter().chain(record.depends().iter());

    for relation in relations {
        let mut resolved = None;

        for possibility in &relation.possibilities {
            let entries = entries_for_possibility(package_db, possibility)?;

            let mut records = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry {
                    Entry::Real(record) => records.push(record),
                    Entry::Virtual(virt) => {
                        records.push(resolve_virtual(package_db, candidate_db, &virt)?)
                    }
                }
            }

            records.retain(|record| !excluded.contains(record.name()));

            if !records.is_empty() {
                resolved = Some(records);
                break;
            }
        }

        match resolved {
            Some(records) => dependencies.extend(records),
            None => {
                return Err(Error::UnsatisfiableDependency(relation.to_string()));
            }
        }
    }

    Ok(dependencies)
}

fn entries_for_possibility(package_db: &PackageDB, possibility: &Possibility) -> Result<Vec<Entry>> {
    Ok(match &possibility.constraint {
        Some(constraint) => match constraint.operator {
            VersionOperator::StrictlyEarlier | VersionOperator::EarlierOrEqual => {
                package_db.earlier_or_equal(&possibility.name, &constraint.version)
            }
            VersionOperator::Equal => package_db
                .exactly_equal(&possibility.name, &constraint.version)
                .into_iter()
                .collect(),
            VersionOperator::LaterOrEqual | VersionOperator::StrictlyLater => {
                package_db.later_or_equal(&possibility.name, &constraint.version)
            }
        },
        None => package_db.get(&possibility.name),
    })
}

/// Replace a virtual package with one of its real providers.
///
/// Providers that no longer exist in the database are ignored. With
/// multiple live providers, one already in the candidate set wins, then
/// one with priority `required`; otherwise the choice is ambiguous.
fn resolve_virtual(
    package_db: &PackageDB,
    candidate_db: &PackageDB,
    virt: &VirtualPackage,
) -> Result<PackageRecord> {
    let providers = virt
        .providers
        .iter()
        .filter_map(|key| {
            let version = key.version.as_ref()?;

            package_db
                .exactly_equal(&key.name, version)
                .and_then(|entry| entry.as_real().cloned())
        })
        .collect::<Vec<_>>();

    match providers.len() {
        0 => Err(Error::UnsatisfiableVirtual(virt.name.clone())),
        1 => Ok(providers.into_iter().next().expect("length checked")),
        _ => {
            if let Some(provider) = providers.iter().find(|provider| {
                candidate_db
                    .exactly_equal(provider.name(), provider.version())
                    .map_or(false, |entry| !entry.is_virtual())
            }) {
                return Ok(provider.clone());
            }

            if let Some(provider) = providers
                .iter()
                .find(|provider| provider.priority() == Some(Priority::Required))
            {
                return Ok(provider.clone());
            }

            Err(Error::AmbiguousVirtual(virt.name.clone()))
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::control::ControlParagraphReader};

    fn record(name: &str, version: &str, extra: &str) -> PackageRecord {
        let stanza = format!(
            "Package: {}\nVersion: {}\nArchitecture: amd64\n{}",
            name, version, extra
        );

        let paragraph = ControlParagraphReader::new(stanza.as_bytes())
            .next()
            .unwrap()
            .unwrap();

        PackageRecord::from_paragraph(paragraph).unwrap()
    }

    /// A miniature bookworm-shaped universe: bash with its transitive
    /// dependencies, an `awk` virtual provided by a required mawk and an
    /// optional gawk, and an older bash to exercise pinning.
    fn base_universe() -> PackageDB {
        let db = PackageDB::new();

        db.add_all([
            record("base-files", "12.4+deb12u5", "Priority: required\n"),
            record(
                "bash",
                "5.2.15-2+b2",
                "Priority: required\n\
                 Pre-Depends: libc6 (>= 2.36), libtinfo6 (>= 6)\n\
                 Depends: base-files, debianutils (>= 2.15)\n",
            ),
            record(
                "bash",
                "5.1-6",
                "Priority: required\n\
                 Pre-Depends: libc6 (>= 2.31), libtinfo6 (>= 6)\n\
                 Depends: base-files, debianutils (>= 2.15)\n",
            ),
            record(
                "debianutils",
                "5.7-0.5~deb12u1",
                "Depends: libc6 (>= 2.36), awk\n",
            ),
            record("gcc-12-base", "12.2.0-14", ""),
            record("libc6", "2.36-9+deb12u4", "Depends: libgcc-s1\n"),
            record(
                "libgcc-s1",
                "12.2.0-14",
                "Depends: gcc-12-base (= 12.2.0-14), libc6 (>= 2.35)\n",
            ),
            record("libtinfo6", "6.4-4", "Depends: libc6 (>= 2.34)\n"),
            record(
                "mawk",
                "1.3.4.20200120-3.1",
                "Priority: required\nProvides: awk\nDepends: libc6 (>= 2.33)\n",
            ),
            record(
                "gawk",
                "1:5.2.1-2",
                "Priority: optional\nProvides: awk\nDepends: libc6 (>= 2.33)\n",
            ),
        ]);

        db
    }

    fn selected_name_versions(db: &PackageDB) -> Vec<String> {
        db.records()
            .iter()
            .map(|r| format!("{}={}", r.name(), r.version()))
            .collect()
    }

    #[test]
    fn pinned_include_resolves_transitive_closure() -> Result<()> {
        let db = base_universe();

        let selected = resolve(&db, &["bash=5.2.15-2+b2".to_string()], &[])?;

        assert_eq!(
            selected_name_versions(&selected),
            vec![
                "base-files=12.4+deb12u5",
                "bash=5.2.15-2+b2",
                "debianutils=5.7-0.5~deb12u1",
                "gcc-12-base=12.2.0-14",
                "libc6=2.36-9+deb12u4",
                "libgcc-s1=12.2.0-14",
                "libtinfo6=6.4-4",
                "mawk=1.3.4.20200120-3.1",
            ]
        );

        Ok(())
    }

    #[test]
    fn bare_include_selects_newest_version() -> Result<()> {
        let db = base_universe();

        let selected = resolve(&db, &["bash".to_string()], &[])?;

        let bash = selected.get("bash");
        assert_eq!(bash.len(), 1);
        assert_eq!(bash[0].version().unwrap().to_string(), "5.2.15-2+b2");

        Ok(())
    }

    #[test]
    fn pin_overrides_newest_wins() -> Result<()> {
        let db = base_universe();

        let selected = resolve(&db, &["bash=5.1-6".to_string()], &[])?;

        let bash = selected.get("bash");
        assert_eq!(bash.len(), 1);
        assert_eq!(bash[0].version().unwrap().to_string(), "5.1-6");

        Ok(())
    }

    #[test]
    fn resolution_is_deterministic() -> Result<()> {
        let db = base_universe();
        let include = ["bash".to_string(), "gawk".to_string()];

        let first = resolve(&db, &include, &[])?;
        let second = resolve(&db, &include, &[])?;

        assert_eq!(selected_name_versions(&first), selected_name_versions(&second));

        Ok(())
    }

    #[test]
    fn required_provider_wins_for_virtual_dependency() -> Result<()> {
        let db = base_universe();

        let selected = resolve(&db, &["debianutils".to_string()], &[])?;

        assert!(!selected.get("mawk").is_empty());
        assert!(selected.get("gawk").is_empty());

        Ok(())
    }

    #[test]
    fn candidate_provider_wins_over_required() -> Result<()> {
        let db = base_universe();

        // gawk is requested explicitly, so it is already a candidate when
        // debianutils' `awk` dependency is resolved.
        let selected = resolve(&db, &["gawk".to_string(), "debianutils".to_string()], &[])?;

        assert!(!selected.get("gawk").is_empty());
        assert!(selected.get("mawk").is_empty());

        Ok(())
    }

    #[test]
    fn ambiguous_virtual_fails() {
        let db = PackageDB::new();
        db.add_all([
            record("some-pkg", "1.0", "Depends: awk\n"),
            record("mawk", "1.3", "Priority: optional\nProvides: awk\n"),
            record("gawk", "5.2", "Priority: optional\nProvides: awk\n"),
        ]);

        let res = resolve(&db, &["some-pkg".to_string()], &[]);

        match res {
            Err(Error::AmbiguousVirtual(name)) => assert_eq!(name, "awk"),
            other => panic!("expected AmbiguousVirtual, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn excluded_dependency_falls_through_to_alternative() -> Result<()> {
        let db = PackageDB::new();
        db.add_all([
            record("app", "1.0", "Depends: mta-a | mta-b\n"),
            record("mta-a", "1.0", ""),
            record("mta-b", "1.0", ""),
        ]);

        let selected = resolve(&db, &["app".to_string()], &["mta-a".to_string()])?;

        assert!(selected.get("mta-a").is_empty());
        assert!(!selected.get("mta-b").is_empty());

        Ok(())
    }

    #[test]
    fn broken_newer_version_is_pruned_in_favor_of_older() -> Result<()> {
        let db = PackageDB::new();
        db.add_all([
            record("tool", "2.0", "Depends: libmissing\n"),
            record("tool", "1.0", ""),
        ]);

        let selected = resolve(&db, &["tool".to_string()], &[])?;

        let tool = selected.get("tool");
        assert_eq!(tool.len(), 1);
        assert_eq!(tool[0].version().unwrap().to_string(), "1.0");

        Ok(())
    }

    #[test]
    fn unknown_package_is_reported() {
        let db = base_universe();

        assert!(matches!(
            resolve(&db, &["no-such-package".to_string()], &[]),
            Err(Error::PackageNotFound(_))
        ));
        assert!(matches!(
            resolve(&db, &["bash=9.9".to_string()], &[]),
            Err(Error::PackageNotFound(_))
        ));
    }

    #[test]
    fn pruned_pin_is_reported() {
        let db = PackageDB::new();
        db.add_all([
            record("tool", "2.0", "Depends: libmissing\n"),
            record("tool", "1.0", ""),
        ]);

        let res = resolve(&db, &["tool=2.0".to_string()], &[]);

        assert!(matches!(res, Err(Error::PinDroppedDuringResolution(_))));
    }

    #[test]
    fn version_constraints_filter_candidates() -> Result<()> {
        let db = PackageDB::new();
        db.add_all([
            record("app", "1.0", "Depends: lib (>= 2.0)\n"),
            record("lib", "1.0", ""),
            record("lib", "2.1", ""),
        ]);

        let selected = resolve(&db, &["app".to_string()], &[])?;

        let lib = selected.get("lib");
        assert_eq!(lib.len(), 1);
        assert_eq!(lib[0].version().unwrap().to_string(), "2.1");

        Ok(())
    }
}

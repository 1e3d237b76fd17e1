// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! In-memory package database.

An ordered index of package records keyed by `(name, version)`, with
first-class virtual packages maintained from `Provides` declarations.
The database supports concurrent readers and a single writer; every query
sees a consistent snapshot relative to any writer.
*/

use {
    crate::{package::PackageRecord, package_version::PackageVersion},
    std::{
        collections::{btree_map, BTreeMap},
        sync::RwLock,
    },
};

/// Identity of a database entry.
///
/// Virtual packages declared without a version carry `None`, which sorts
/// before every concrete version of the same name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PackageKey {
    pub name: String,
    pub version: Option<PackageVersion>,
}

impl PackageKey {
    pub fn new(name: impl ToString, version: PackageVersion) -> Self {
        Self {
            name: name.to_string(),
            version: Some(version),
        }
    }

    fn for_record(record: &PackageRecord) -> Self {
        Self::new(record.name(), record.version().clone())
    }
}

/// Which kind of entry a tree key addresses.
///
/// Real entries order before virtual entries of the same name and version.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum EntryKind {
    Real,
    Virtual,
}

/// Internal ordered map key.
///
/// The kind discriminant keeps a real package and a virtual package with
/// the same name and version from aliasing: a package may carry the same
/// `(name, version)` that another package's `Provides` declares, and
/// neither side may clobber the other's state.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct TreeKey {
    name: String,
    version: Option<PackageVersion>,
    kind: EntryKind,
}

impl TreeKey {
    fn real(record: &PackageRecord) -> Self {
        Self {
            name: record.name().to_string(),
            version: Some(record.version().clone()),
            kind: EntryKind::Real,
        }
    }

    fn for_provided(possibility: &crate::dependency::Possibility) -> Self {
        Self {
            name: possibility.name.clone(),
            version: possibility
                .constraint
                .as_ref()
                .map(|constraint| constraint.version.clone()),
            kind: EntryKind::Virtual,
        }
    }
}

/// A virtual package introduced by one or more real packages' `Provides`.
#[derive(Clone, Debug)]
pub struct VirtualPackage {
    pub name: String,
    pub version: Option<PackageVersion>,
    /// Real records providing this name, as keys into the database, in
    /// registration order.
    pub providers: Vec<PackageKey>,
}

/// A database entry: a real package record or a virtual package.
#[derive(Clone, Debug)]
pub enum Entry {
    Real(PackageRecord),
    Virtual(VirtualPackage),
}

impl Entry {
    /// The package name of this entry.
    pub fn name(&self) -> &str {
        match self {
            Self::Real(record) => record.name(),
            Self::Virtual(virt) => &virt.name,
        }
    }

    /// The version of this entry, when it has one.
    pub fn version(&self) -> Option<&PackageVersion> {
        match self {
            Self::Real(record) => Some(record.version()),
            Self::Virtual(virt) => virt.version.as_ref(),
        }
    }

    /// Whether this entry is a virtual package.
    pub fn is_virtual(&self) -> bool {
        matches!(self, Self::Virtual(_))
    }

    /// The real record, if this entry is one.
    pub fn as_real(&self) -> Option<&PackageRecord> {
        match self {
            Self::Real(record) => Some(record),
            Self::Virtual(_) => None,
        }
    }

    /// Whether this entry's version satisfies `≤ version`.
    ///
    /// A versionless virtual entry sorts before every concrete version and
    /// therefore satisfies every upper bound.
    fn is_earlier_or_equal(&self, version: &PackageVersion) -> bool {
        match self.version() {
            Some(v) => v <= version,
            None => true,
        }
    }

    fn is_strictly_earlier(&self, version: &PackageVersion) -> bool {
        match self.version() {
            Some(v) => v < version,
            None => true,
        }
    }

    fn is_later_or_equal(&self, version: &PackageVersion) -> bool {
        match self.version() {
            Some(v) => v >= version,
            None => false,
        }
    }

    fn is_strictly_later(&self, version: &PackageVersion) -> bool {
        match self.version() {
            Some(v) => v > version,
            None => false,
        }
    }
}

/// A package database.
#[derive(Debug, Default)]
pub struct PackageDB {
    tree: RwLock<BTreeMap<TreeKey, Entry>>,
}

impl PackageDB {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of non-virtual records.
    pub fn len(&self) -> usize {
        let tree = self.tree.read().expect("lock poisoned");

        tree.values().filter(|entry| !entry.is_virtual()).count()
    }

    /// Whether the database holds no non-virtual records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a package to the database.
    ///
    /// If a record with the same `(name, version)` already exists, the
    /// existing record is kept and the incoming record's URLs are merged
    /// into it (duplicates removed, insertion order preserved). Virtual
    /// packages declared by `Provides` are upserted with this record
    /// registered as a provider.
    pub fn add(&self, record: PackageRecord) {
        let mut tree = self.tree.write().expect("lock poisoned");
        add_record(&mut tree, record);
    }

    /// Add multiple packages, as if [PackageDB::add] were called in sequence.
    pub fn add_all(&self, records: impl IntoIterator<Item = PackageRecord>) {
        let mut tree = self.tree.write().expect("lock poisoned");

        for record in records {
            add_record(&mut tree, record);
        }
    }

    /// Remove a package from the database, unregistering it from any
    /// virtual packages it provides. A virtual package whose last provider
    /// is removed disappears.
    pub fn remove(&self, record: &PackageRecord) {
        let mut tree = self.tree.write().expect("lock poisoned");

        let key = PackageKey::for_record(record);
        tree.remove(&TreeKey::real(record));

        for relation in record.provides() {
            for possibility in &relation.possibilities {
                let virtual_key = TreeKey::for_provided(possibility);

                if let Some(Entry::Virtual(virt)) = tree.get_mut(&virtual_key) {
                    virt.providers.retain(|provider| *provider != key);

                    if virt.providers.is_empty() {
                        tree.remove(&virtual_key);
                    }
                }
            }
        }
    }

    /// Visit non-virtual records in `(name, version)` ascending order,
    /// stopping at the first error.
    pub fn for_each<E>(
        &self,
        mut f: impl FnMut(&PackageRecord) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        let tree = self.tree.read().expect("lock poisoned");

        for entry in tree.values() {
            if let Entry::Real(record) = entry {
                f(record)?;
            }
        }

        Ok(())
    }

    /// Clone all non-virtual records in `(name, version)` ascending order.
    pub fn records(&self) -> Vec<PackageRecord> {
        let tree = self.tree.read().expect("lock poisoned");

        tree.values()
            .filter_map(|entry| entry.as_real().cloned())
            .collect()
    }

    /// All entries (virtual and real) with the given name, in
    /// version-ascending order.
    pub fn get(&self, name: &str) -> Vec<Entry> {
        let tree = self.tree.read().expect("lock poisoned");
        entries_for_name(&tree, name).cloned().collect()
    }

    /// Entries with the given name whose version is strictly earlier.
    pub fn strictly_earlier(&self, name: &str, version: &PackageVersion) -> Vec<Entry> {
        let tree = self.tree.read().expect("lock poisoned");

        entries_for_name(&tree, name)
            .filter(|entry| entry.is_strictly_earlier(version))
            .cloned()
            .collect()
    }

    /// Entries with the given name whose version is earlier or equal.
    pub fn earlier_or_equal(&self, name: &str, version: &PackageVersion) -> Vec<Entry> {
        let tree = self.tree.read().expect("lock poisoned");

        entries_for_name(&tree, name)
            .filter(|entry| entry.is_earlier_or_equal(version))
            .cloned()
            .collect()
    }

    /// The entry with exactly the given name and version, if present.
    ///
    /// When a real record and a virtual package share the name and
    /// version, the real record wins.
    pub fn exactly_equal(&self, name: &str, version: &PackageVersion) -> Option<Entry> {
        let tree = self.tree.read().expect("lock poisoned");

        for kind in [EntryKind::Real, EntryKind::Virtual] {
            let key = TreeKey {
                name: name.to_string(),
                version: Some(version.clone()),
                kind,
            };

            if let Some(entry) = tree.get(&key) {
                return Some(entry.clone());
            }
        }

        None
    }

    /// Entries with the given name whose version is later or equal, in
    /// version-ascending order.
    pub fn later_or_equal(&self, name: &str, version: &PackageVersion) -> Vec<Entry> {
        let tree = self.tree.read().expect("lock poisoned");

        entries_for_name(&tree, name)
            .filter(|entry| entry.is_later_or_equal(version))
            .cloned()
            .collect()
    }

    /// Entries with the given name whose version is strictly later.
    pub fn strictly_later(&self, name: &str, version: &PackageVersion) -> Vec<Entry> {
        let tree = self.tree.read().expect("lock poisoned");

        entries_for_name(&tree, name)
            .filter(|entry| entry.is_strictly_later(version))
            .cloned()
            .collect()
    }
}

fn entries_for_name<'a>(
    tree: &'a BTreeMap<TreeKey, Entry>,
    name: &'a str,
) -> impl Iterator<Item = &'a Entry> {
    let start = TreeKey {
        name: name.to_string(),
        version: None,
        kind: EntryKind::Real,
    };

    tree.range(start..)
        .take_while(move |(key, _)| key.name == name)
        .map(|(_, entry)| entry)
}

fn add_record(tree: &mut BTreeMap<TreeKey, Entry>, record: PackageRecord) {
    let key = PackageKey::for_record(&record);

    match tree.entry(TreeKey::real(&record)) {
        btree_map::Entry::Occupied(mut occupied) => match occupied.get_mut() {
            Entry::Real(existing) => existing.merge_urls_from(&record),
            Entry::Virtual(_) => unreachable!("virtual entries live under virtual keys"),
        },
        btree_map::Entry::Vacant(vacant) => {
            vacant.insert(Entry::Real(record.clone()));
        }
    }

    for relation in record.provides() {
        for possibility in &relation.possibilities {
            let virtual_key = TreeKey::for_provided(possibility);

            let entry = tree.entry(virtual_key.clone()).or_insert_with(|| {
                Entry::Virtual(VirtualPackage {
                    name: virtual_key.name.clone(),
                    version: virtual_key.version.clone(),
                    providers: vec![],
                })
            });

            match entry {
                Entry::Virtual(virt) => {
                    if !virt.providers.contains(&key) {
                        virt.providers.push(key.clone());
                    }
                }
                Entry::Real(_) => unreachable!("real entries live under real keys"),
            }
        }
    }
}

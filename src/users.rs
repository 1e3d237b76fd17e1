// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! passwd and group file editing.

Deterministic application of recipe user and group declarations to
`etc/passwd` and `etc/group` content. These are pure functions over file
content; writing the results into the built filesystem is the image
builder's concern.
*/

use {
    crate::{
        error::{Error, Result},
        recipe::{GroupConfig, UserConfig},
    },
    std::collections::BTreeMap,
};

const SYSTEM_ID_MIN: u32 = 100;
const USER_ID_MIN: u32 = 1000;
const ID_MAX: u32 = 60000;

/// Whether a name is acceptable for a user or group.
fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }

    name.len() <= 32 && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Replace (or append) the entry whose name matches, preserving every
/// other line.
fn upsert_entry(content: &str, name: &str, entry: String) -> String {
    let prefix = format!("{}:", name);
    let mut found = false;

    let mut out = String::with_capacity(content.len() + entry.len() + 1);
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with(&prefix) {
            out.push_str(&entry);
            found = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    if !found {
        out.push_str(&entry);
        out.push('\n');
    }

    out
}

/// Parse `name -> id` pairs from a passwd- or group-shaped file.
fn parse_ids(content: &str, min_fields: usize) -> Result<BTreeMap<String, u32>> {
    let mut ids = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields = line.split(':').collect::<Vec<_>>();
        if fields.len() < min_fields {
            return Err(Error::Recipe(format!("invalid database entry: {}", line)));
        }

        let id = fields[2]
            .parse::<u32>()
            .map_err(|e| Error::Recipe(format!("invalid id in entry {}: {}", line, e)))?;

        ids.insert(fields[0].to_string(), id);
    }

    Ok(ids)
}

/// The lowest unallocated ID in the requested range.
fn next_free_id(used: &BTreeMap<String, u32>, system: bool) -> Result<u32> {
    let min = if system { SYSTEM_ID_MIN } else { USER_ID_MIN };

    let used = used.values().collect::<std::collections::HashSet<_>>();

    (min..=ID_MAX)
        .find(|id| !used.contains(id))
        .ok_or_else(|| Error::Recipe("no available id".into()))
}

fn deduplicate(members: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    members
        .iter()
        .filter(|member| seen.insert(member.as_str()))
        .cloned()
        .collect()
}

/// Apply a group declaration to `etc/group` content.
///
/// Returns the updated content and the group's GID.
pub fn create_or_update_group(group_content: &str, group: &GroupConfig) -> Result<(String, u32)> {
    if !valid_name(&group.name) {
        return Err(Error::Recipe(format!("invalid group name: {}", group.name)));
    }

    let gid = match group.gid {
        Some(gid) => gid,
        None => next_free_id(&parse_ids(group_content, 4)?, group.system)?,
    };

    let entry = format!(
        "{}:x:{}:{}",
        group.name,
        gid,
        deduplicate(&group.members).join(",")
    );

    Ok((upsert_entry(group_content, &group.name, entry), gid))
}

/// Apply a user declaration to `etc/passwd` content, registering the user
/// as a member of each of its groups in `etc/group`.
///
/// The user's first group is its primary group and must already exist (by
/// name or numeric GID). Returns the updated passwd and group contents.
pub fn create_or_update_user(
    passwd_content: &str,
    group_content: &str,
    user: &UserConfig,
) -> Result<(String, String)> {
    if !valid_name(&user.name) {
        return Err(Error::Recipe(format!("invalid user name: {}", user.name)));
    }

    if user.groups.is_empty() {
        return Err(Error::Recipe(format!(
            "user {} must belong to at least one group",
            user.name
        )));
    }

    let group_ids = parse_ids(group_content, 4)?;

    let lookup_gid = |group_name: &str| -> Result<u32> {
        if let Ok(gid) = group_name.parse::<u32>() {
            return Ok(gid);
        }

        group_ids
            .get(group_name)
            .copied()
            .ok_or_else(|| Error::Recipe(format!("group not found: {}", group_name)))
    };

    let primary_gid = lookup_gid(&user.groups[0])?;

    let uid = match user.uid {
        Some(uid) => uid,
        None => next_free_id(&parse_ids(passwd_content, 6)?, user.system)?,
    };

    let entry = format!(
        "{}:x:{}:{}::{}:{}",
        user.name, uid, primary_gid, user.home_dir, user.shell
    );

    let passwd_content = upsert_entry(passwd_content, &user.name, entry);

    // Register membership in every named group.
    let mut group_content = group_content.to_string();
    for group_name in &user.groups {
        if group_name.parse::<u32>().is_ok() {
            continue;
        }

        let (name, gid, mut members) = parse_group_entry(&group_content, group_name)?;
        if !members.contains(&user.name) {
            members.push(user.name.clone());
        }

        let entry = format!("{}:x:{}:{}", name, gid, members.join(","));
        group_content = upsert_entry(&group_content, &name, entry);
    }

    Ok((passwd_content, group_content))
}

fn parse_group_entry(content: &str, name: &str) -> Result<(String, u32, Vec<String>)> {
    let prefix = format!("{}:", name);

    for line in content.lines() {
        let line = line.trim();
        if !line.starts_with(&prefix) {
            continue;
        }

        let fields = line.split(':').collect::<Vec<_>>();
        if fields.len() < 4 {
            return Err(Error::Recipe(format!("invalid group entry: {}", line)));
        }

        let gid = fields[2]
            .parse::<u32>()
            .map_err(|e| Error::Recipe(format!("invalid GID in entry {}: {}", line, e)))?;

        let members = fields[3]
            .split(',')
            .filter(|member| !member.is_empty())
            .map(ToString::to_string)
            .collect();

        return Ok((name.to_string(), gid, members));
    }

    Err(Error::Recipe(format!("group not found: {}", name)))
}

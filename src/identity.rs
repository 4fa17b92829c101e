//! Contributor alias merging.
//!
//! Every author `(name, email)` pair is reduced to a normalized key by
//! [`identity_key`]; aliases that share a key collapse into one
//! [`ContributorIdentity`].

use crate::model::{Alias, CommitRecord, ContributorIdentity, Warning};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

pub const UNKNOWN_IDENTITY: &str = "unknown";
const NAME_KEY_PREFIX: &str = "name:";

/// Webmail providers that ignore dots in the local part. The first entry is
/// the canonical domain the others fold into.
const DOT_INSENSITIVE_DOMAINS: &[&str] = &["gmail.com", "googlemail.com"];
const NOREPLY_DOMAINS: &[&str] = &["users.noreply.github.com", "users.noreply.gitlab.com"];
const BOT_MARKERS: &[&str] = &["[bot]", "(bot)"];

/// Normalized grouping key of an author.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdentityKey {
    Email(String),
    Name(String),
    Unknown,
}

impl IdentityKey {
    /// Stable string form, also used as the canonical email.
    pub fn as_canonical(&self) -> String {
        match self {
            IdentityKey::Email(email) => email.clone(),
            IdentityKey::Name(name) => format!("{NAME_KEY_PREFIX}{name}"),
            IdentityKey::Unknown => UNKNOWN_IDENTITY.to_string(),
        }
    }
}

pub fn identity_key(name: &str, email: &str) -> IdentityKey {
    if let Some(email) = normalize_email(email) {
        return IdentityKey::Email(email);
    }
    let name = normalize_name(name);
    if name.is_empty() {
        IdentityKey::Unknown
    } else {
        IdentityKey::Name(name)
    }
}

/// Lowercase the address, strip dots for dot-insensitive webmail and drop
/// `+tag` suffixes on code-hosting no-reply addresses. `None` when the
/// address is empty or not of the form `local@domain`.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().trim_start_matches('<').trim_end_matches('>').to_lowercase();
    let (local, domain) = email.rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || local.contains(char::is_whitespace) {
        return None;
    }

    if DOT_INSENSITIVE_DOMAINS.contains(&domain) {
        let local = local.replace('.', "");
        if local.is_empty() {
            return None;
        }
        return Some(format!("{local}@{}", DOT_INSENSITIVE_DOMAINS[0]));
    }

    if NOREPLY_DOMAINS.contains(&domain) {
        if let Some((base, _tag)) = local.split_once('+') {
            if !base.is_empty() {
                return Some(format!("{base}@{domain}"));
            }
        }
    }

    Some(format!("{local}@{domain}"))
}

/// Trim, collapse whitespace, strip bot markers and title-case each word.
pub fn normalize_name(raw: &str) -> String {
    let mut name = raw.trim();
    while let Some(marker) = BOT_MARKERS.iter().find(|m| {
        name.len() >= m.len()
            && name
                .get(name.len() - m.len()..)
                .is_some_and(|tail| tail.eq_ignore_ascii_case(m))
    }) {
        name = name[..name.len() - marker.len()].trim_end();
    }

    name.split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Resolved identities plus the alias lookup used to attribute commits.
#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    identities: BTreeMap<String, ContributorIdentity>,
    by_alias: HashMap<Alias, String>,
}

impl IdentityTable {
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, canonical_id: &str) -> Option<&ContributorIdentity> {
        self.identities.get(canonical_id)
    }

    /// Identity a commit is attributed to.
    pub fn for_commit(&self, record: &CommitRecord) -> Option<&ContributorIdentity> {
        let alias = Alias {
            name: record.author_name.clone(),
            email: record.author_email.clone(),
        };
        self.by_alias.get(&alias).and_then(|id| self.identities.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContributorIdentity> {
        self.identities.values()
    }

    /// Identities by commit count descending, then display name and id.
    pub fn ranked(&self) -> Vec<&ContributorIdentity> {
        let mut ranked: Vec<_> = self.identities.values().collect();
        ranked.sort_by(|a, b| {
            b.total_commits
                .cmp(&a.total_commits)
                .then_with(|| a.display_name.cmp(&b.display_name))
                .then_with(|| a.canonical_id.cmp(&b.canonical_id))
        });
        ranked
    }

    pub fn into_identities(self) -> BTreeMap<String, ContributorIdentity> {
        self.identities
    }
}

#[derive(Debug, Default)]
struct AliasGroup {
    aliases: BTreeMap<Alias, u64>,
    first: Option<chrono::DateTime<chrono::Utc>>,
    last: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Default)]
pub struct ContributorIdentityResolver {
    warnings: Vec<Warning>,
}

impl ContributorIdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group every author alias of `records` into canonical identities.
    pub fn resolve(&mut self, records: &[CommitRecord]) -> IdentityTable {
        let mut groups: BTreeMap<IdentityKey, AliasGroup> = BTreeMap::new();

        for record in records {
            let key = identity_key(&record.author_name, &record.author_email);
            let group = groups.entry(key).or_default();
            let alias = Alias {
                name: record.author_name.clone(),
                email: record.author_email.clone(),
            };
            *group.aliases.entry(alias).or_insert(0) += 1;
            group.first = Some(group.first.map_or(record.timestamp, |t| t.min(record.timestamp)));
            group.last = Some(group.last.map_or(record.timestamp, |t| t.max(record.timestamp)));
        }

        let mut table = IdentityTable::default();
        for (key, group) in groups {
            let canonical_id = key.as_canonical();
            let display_name = self.pick_display_name(&key, &canonical_id, &group.aliases);

            for alias in group.aliases.keys() {
                table.by_alias.insert(alias.clone(), canonical_id.clone());
            }

            let identity = ContributorIdentity {
                canonical_id: canonical_id.clone(),
                display_name,
                canonical_email: canonical_id.clone(),
                total_commits: group.aliases.values().sum(),
                aliases: group.aliases.into_keys().collect::<BTreeSet<_>>(),
                first_commit: group.first,
                last_commit: group.last,
            };
            table.identities.insert(canonical_id, identity);
        }

        debug!(identities = table.len(), "Resolved contributor identities");
        table
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// The alias with the most commits names the identity; exact ties go to
    /// the alphabetically first name and are reported when the names differ.
    fn pick_display_name(
        &mut self,
        key: &IdentityKey,
        canonical_id: &str,
        aliases: &BTreeMap<Alias, u64>,
    ) -> String {
        let normalized = match key {
            IdentityKey::Unknown => return "Unknown".to_string(),
            IdentityKey::Name(name) => return name.clone(),
            IdentityKey::Email(email) => email,
        };

        let best = aliases.values().copied().max().unwrap_or(0);
        let leaders: BTreeSet<&str> = aliases
            .iter()
            .filter(|(_, count)| **count == best)
            .map(|(alias, _)| alias.name.trim())
            .filter(|name| !name.is_empty())
            .collect();

        if leaders.len() > 1 {
            let names: Vec<&str> = leaders.iter().copied().collect();
            let detail = format!(
                "aliases tie at {} commits ({}), keeping '{}'",
                best,
                names.join(", "),
                names[0]
            );
            warn!("Ambiguous alias merge for {}: {}", canonical_id, detail);
            self.warnings.push(Warning::IdentityResolution {
                canonical_id: canonical_id.to_string(),
                detail,
            });
        }

        match leaders.iter().next() {
            Some(name) => name.to_string(),
            None => aliases
                .keys()
                .map(|alias| alias.name.trim())
                .find(|name| !name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| normalized.split('@').next().unwrap_or_default().to_string()),
        }
    }
}

//! Content version numbers and the version-bump rules for draft, publish and
//! migration.
//!
//! Per (node, language, branch) a content history moves through
//! `NO_CONTENT → DRAFT(v) → {DRAFT(v + 0.1), PUBLISHED}`. Drafts bump the
//! minor number, publishing bumps the major number. Migration follows
//! [`plan_migration`].

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

// ─── Version numbers ─────────────────────────────────────────────────────────

/// A `major.minor` content version. Serialised as the string `"1.2"`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct VersionNumber {
  pub major: u32,
  pub minor: u32,
}

impl VersionNumber {
  /// The version of a node's first draft.
  pub const FIRST_DRAFT: VersionNumber = VersionNumber { major: 0, minor: 1 };

  pub const fn new(major: u32, minor: u32) -> Self { Self { major, minor } }

  /// The next draft version: same major, minor + 1.
  pub fn next_draft(self) -> Self { Self::new(self.major, self.minor + 1) }

  /// The next published version: `(major + 1).0`.
  pub fn next_published(self) -> Self { Self::new(self.major + 1, 0) }
}

impl fmt::Display for VersionNumber {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.major, self.minor)
  }
}

impl FromStr for VersionNumber {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Error> {
    let invalid = || Error::InvalidVersionNumber(s.to_owned());
    let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
    Ok(Self {
      major: major.parse().map_err(|_| invalid())?,
      minor: minor.parse().map_err(|_| invalid())?,
    })
  }
}

impl TryFrom<String> for VersionNumber {
  type Error = Error;

  fn try_from(s: String) -> Result<Self, Error> { s.parse() }
}

impl From<VersionNumber> for String {
  fn from(v: VersionNumber) -> Self { v.to_string() }
}

// ─── Migration plan ──────────────────────────────────────────────────────────

/// What the migration needs to know about one head pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadState {
  pub container_id:    Uuid,
  pub version:         VersionNumber,
  /// The head's container is on the migration's source version.
  pub needs_migration: bool,
}

/// The containers a migration step writes for one (node, language, branch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPlan {
  /// Neither head is on the source version.
  Nothing,
  /// One new container; both pointers move to it.
  Shared { version: VersionNumber },
  /// Independent new containers. `None` leaves that pointer alone.
  Separate {
    draft:     Option<VersionNumber>,
    published: Option<VersionNumber>,
  },
}

impl MigrationPlan {
  pub fn is_nothing(&self) -> bool { matches!(self, Self::Nothing) }
}

/// Decide which containers a migration creates, and at which versions.
///
/// - A published head on the source version becomes `(M + 1).0`, where `M`
///   is the highest major across both heads.
/// - A draft sharing that container (or no draft at all) follows it.
/// - A diverged draft becomes `published'.major.1` when the published head
///   migrated in the same step, else `draft + 0.1`.
pub fn plan_migration(
  draft: Option<HeadState>,
  published: Option<HeadState>,
) -> MigrationPlan {
  let migrating_published = published.filter(|p| p.needs_migration);
  let migrating_draft = draft.filter(|d| d.needs_migration);

  match (migrating_published, draft) {
    (Some(p), draft) => {
      let major = draft.map_or(p.version.major, |d| d.version.major.max(p.version.major));
      let new_published = VersionNumber::new(major, 0).next_published();

      match draft {
        None => MigrationPlan::Shared { version: new_published },
        Some(d) if d.container_id == p.container_id => {
          MigrationPlan::Shared { version: new_published }
        }
        Some(_) => MigrationPlan::Separate {
          draft:     migrating_draft.map(|_| VersionNumber::new(new_published.major, 1)),
          published: Some(new_published),
        },
      }
    }
    (None, _) => match migrating_draft {
      Some(d) => MigrationPlan::Separate {
        draft:     Some(d.version.next_draft()),
        published: None,
      },
      None => MigrationPlan::Nothing,
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn head(version: &str, needs_migration: bool) -> HeadState {
    HeadState {
      container_id: Uuid::new_v4(),
      version: version.parse().unwrap(),
      needs_migration,
    }
  }

  #[test]
  fn version_number_string_form() {
    let v: VersionNumber = "2.13".parse().unwrap();
    assert_eq!(v, VersionNumber::new(2, 13));
    assert_eq!(v.to_string(), "2.13");
    assert_eq!(serde_json::to_string(&v).unwrap(), "\"2.13\"");
    assert!("2".parse::<VersionNumber>().is_err());
    assert!("a.b".parse::<VersionNumber>().is_err());
  }

  #[test]
  fn bumps() {
    assert_eq!(VersionNumber::FIRST_DRAFT.next_draft(), VersionNumber::new(0, 2));
    assert_eq!(VersionNumber::new(1, 4).next_published(), VersionNumber::new(2, 0));
    assert!(VersionNumber::new(1, 10) > VersionNumber::new(1, 9));
  }

  #[test]
  fn draft_only() {
    let plan = plan_migration(Some(head("0.1", true)), None);
    assert_eq!(plan, MigrationPlan::Separate {
      draft:     Some(VersionNumber::new(0, 2)),
      published: None,
    });
  }

  #[test]
  fn shared_published() {
    let p = head("1.0", true);
    let plan = plan_migration(Some(p), Some(p));
    assert_eq!(plan, MigrationPlan::Shared { version: VersionNumber::new(2, 0) });
  }

  #[test]
  fn diverged_draft_follows_new_published_major() {
    let plan = plan_migration(Some(head("1.1", true)), Some(head("1.0", true)));
    assert_eq!(plan, MigrationPlan::Separate {
      draft:     Some(VersionNumber::new(2, 1)),
      published: Some(VersionNumber::new(2, 0)),
    });
  }

  #[test]
  fn published_only_on_source() {
    let plan = plan_migration(Some(head("2.1", false)), Some(head("1.0", true)));
    assert_eq!(plan, MigrationPlan::Separate {
      draft:     None,
      published: Some(VersionNumber::new(3, 0)),
    });
  }

  #[test]
  fn draft_on_source_with_published_elsewhere() {
    let plan = plan_migration(Some(head("1.3", true)), Some(head("1.0", false)));
    assert_eq!(plan, MigrationPlan::Separate {
      draft:     Some(VersionNumber::new(1, 4)),
      published: None,
    });
  }

  #[test]
  fn published_without_draft() {
    let plan = plan_migration(None, Some(head("3.0", true)));
    assert_eq!(plan, MigrationPlan::Shared { version: VersionNumber::new(4, 0) });
  }

  #[test]
  fn nothing_on_source() {
    assert!(plan_migration(Some(head("0.3", false)), None).is_nothing());
    assert!(plan_migration(None, None).is_nothing());
  }
}

//! Integration tests for `SqliteStore` against an in-memory database.

use strata_core::{
  content::{FieldMap, FieldValue, ListValue, Micronode},
  schema::{FieldSchema, FieldType, ListItemType, SchemaKind, SchemaSnapshot},
  store::{ContentStore, FailureKind, MigrationCommit, NewDraft, NewNode, StoreFailure},
  versioning::VersionNumber,
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn article(version: u32) -> SchemaSnapshot {
  SchemaSnapshot::new("article", version)
    .with_field(FieldSchema::new("title", FieldType::String))
}

fn title(s: &str) -> FieldMap {
  FieldMap::from([("title".to_owned(), FieldValue::String(s.to_owned()))])
}

struct Fixture {
  store:     SqliteStore,
  branch:    Uuid,
  version:   Uuid,
  node:      Uuid,
}

async fn fixture() -> Fixture {
  let s = store().await;
  let (project, branch) = s.create_project("demo".into()).await.unwrap();
  let schema = s
    .create_schema_container(SchemaKind::Schema, article(1))
    .await
    .unwrap();
  let version = schema.latest_version().uuid;
  s.assign_schema_version(branch.branch_id, schema.uuid, version)
    .await
    .unwrap();
  let node = s
    .create_node(NewNode {
      project_id:       project.project_id,
      schema_container: schema.uuid,
      parent_id:        None,
    })
    .await
    .unwrap();
  Fixture { store: s, branch: branch.branch_id, version, node: node.node_id }
}

fn draft(f: &Fixture, text: &str) -> NewDraft {
  NewDraft {
    node_id:        f.node,
    language:       "en".into(),
    branch_id:      f.branch,
    schema_version: f.version,
    fields:         title(text),
    editor:         Some("editor".into()),
  }
}

// ─── Schemas ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn schema_lineage_round_trips() {
  let s = store().await;
  let created = s
    .create_schema_container(SchemaKind::Microschema, article(1))
    .await
    .unwrap();

  let second = s
    .append_schema_version(created.uuid, article(2), vec![])
    .await
    .unwrap();
  assert_eq!(second.index, 1);
  assert_eq!(second.previous, Some(0));

  let fetched = s.get_schema_container(created.uuid).await.unwrap().unwrap();
  assert_eq!(fetched.kind, SchemaKind::Microschema);
  assert_eq!(fetched.versions.len(), 2);
  assert_eq!(fetched.versions[0].next, Some(1));
  assert_eq!(fetched.latest_version().uuid, second.uuid);
  assert_eq!(fetched.name(), "article");
}

#[tokio::test]
async fn append_rejects_stale_version() {
  let s = store().await;
  let created = s
    .create_schema_container(SchemaKind::Schema, article(1))
    .await
    .unwrap();
  let err = s
    .append_schema_version(created.uuid, article(1), vec![])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(strata_core::Error::StaleVersion { .. })));
  assert_eq!(err.failure_kind(), FailureKind::Rejected);
}

#[tokio::test]
async fn assign_rejects_foreign_version() {
  let s = store().await;
  let (_, branch) = s.create_project("p".into()).await.unwrap();
  let a = s.create_schema_container(SchemaKind::Schema, article(1)).await.unwrap();
  let b = s.create_schema_container(SchemaKind::Schema, article(1)).await.unwrap();

  let err = s
    .assign_schema_version(branch.branch_id, a.uuid, b.latest_version().uuid)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ForeignVersion { .. }));

  s.assign_schema_version(branch.branch_id, a.uuid, a.latest_version().uuid)
    .await
    .unwrap();
  let fetched = s.get_branch(branch.branch_id).await.unwrap().unwrap();
  assert_eq!(fetched.assigned_version(a.uuid), Some(a.latest_version().uuid));
}

// ─── Projects ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn project_comes_with_initial_branch() {
  let s = store().await;
  let (project, branch) = s.create_project("site".into()).await.unwrap();
  assert_eq!(branch.project_id, project.project_id);
  assert_eq!(branch.name, "site");

  let other = s.create_branch(project.project_id, "v2".into()).await.unwrap();
  assert!(s.get_branch(other.branch_id).await.unwrap().is_some());
  assert!(s.get_project(project.project_id).await.unwrap().is_some());

  let missing = s.create_branch(Uuid::new_v4(), "x".into()).await.unwrap_err();
  assert!(matches!(missing, Error::ProjectNotFound(_)));
}

// ─── Content versioning ──────────────────────────────────────────────────────

#[tokio::test]
async fn draft_versions_bump_minor() {
  let f = fixture().await;
  let first = f.store.save_draft(draft(&f, "one")).await.unwrap();
  let second = f.store.save_draft(draft(&f, "two")).await.unwrap();

  assert_eq!(first.version, VersionNumber::new(0, 1));
  assert_eq!(second.version, VersionNumber::new(0, 2));
  assert_eq!(second.previous, Some(first.container_id));

  let heads = f.store.get_heads(f.node, "en".into(), f.branch).await.unwrap().unwrap();
  assert_eq!(heads.draft, Some(second.container_id));
  assert_eq!(heads.published, None);
}

#[tokio::test]
async fn publish_moves_both_pointers() {
  let f = fixture().await;
  f.store.save_draft(draft(&f, "one")).await.unwrap();
  let published = f.store.publish(f.node, "en".into(), f.branch).await.unwrap();
  assert_eq!(published.version, VersionNumber::new(1, 0));

  let heads = f.store.get_heads(f.node, "en".into(), f.branch).await.unwrap().unwrap();
  assert!(heads.shared());

  let again = f.store.publish(f.node, "en".into(), f.branch).await.unwrap();
  assert_eq!(again.container_id, published.container_id);

  let edited = f.store.save_draft(draft(&f, "edited")).await.unwrap();
  assert_eq!(edited.version, VersionNumber::new(1, 1));
}

#[tokio::test]
async fn take_offline_clears_published() {
  let f = fixture().await;
  f.store.save_draft(draft(&f, "one")).await.unwrap();
  f.store.publish(f.node, "en".into(), f.branch).await.unwrap();
  f.store.take_offline(f.node, "en".into(), f.branch).await.unwrap();

  let heads = f.store.get_heads(f.node, "en".into(), f.branch).await.unwrap().unwrap();
  assert!(heads.draft.is_some());
  assert!(heads.published.is_none());

  let err = f.store.take_offline(f.node, "de".into(), f.branch).await.unwrap_err();
  assert!(matches!(err, Error::NoDraft { .. }));
}

#[tokio::test]
async fn publish_without_draft_fails() {
  let f = fixture().await;
  let err = f.store.publish(f.node, "en".into(), f.branch).await.unwrap_err();
  assert!(matches!(err, Error::NoDraft { .. }));
}

// ─── Migration support ───────────────────────────────────────────────────────

#[tokio::test]
async fn targets_by_schema_version() {
  let f = fixture().await;
  f.store.save_draft(draft(&f, "en")).await.unwrap();
  let mut de = draft(&f, "de");
  de.language = "de".into();
  f.store.save_draft(de).await.unwrap();

  let targets = f
    .store
    .migration_targets(f.branch, SchemaKind::Schema, f.version)
    .await
    .unwrap();
  let languages: Vec<_> = targets.iter().map(|t| t.language.as_str()).collect();
  assert_eq!(languages, ["de", "en"]);

  let none = f
    .store
    .migration_targets(f.branch, SchemaKind::Schema, Uuid::new_v4())
    .await
    .unwrap();
  assert!(none.is_empty());
}

#[tokio::test]
async fn targets_by_microschema_version() {
  let f = fixture().await;
  let micro = f
    .store
    .create_schema_container(SchemaKind::Microschema, article(1))
    .await
    .unwrap();
  let reference = micro.version_ref(micro.latest_version());

  let mut d = draft(&f, "with micronode");
  d.fields.insert(
    "blocks".into(),
    FieldValue::List(ListValue::Micronode(vec![Micronode {
      uuid:        Uuid::new_v4(),
      microschema: reference,
      fields:      title("inner"),
    }])),
  );
  f.store.save_draft(d).await.unwrap();

  let targets = f
    .store
    .migration_targets(f.branch, SchemaKind::Microschema, reference.version)
    .await
    .unwrap();
  assert_eq!(targets.len(), 1);
  assert_eq!(targets[0].node_id, f.node);
}

#[tokio::test]
async fn commit_migration_is_guarded_by_heads() {
  let f = fixture().await;
  let current = f.store.save_draft(draft(&f, "one")).await.unwrap();
  let next = current.successor(
    current.version.next_draft(),
    current.schema_version,
    title("migrated"),
  );

  let stale = MigrationCommit {
    node_id:            f.node,
    language:           "en".into(),
    branch_id:          f.branch,
    expected_draft:     Some(Uuid::new_v4()),
    expected_published: None,
    containers:         vec![next.clone()],
    draft_head:         Some(next.container_id),
    published_head:     None,
  };
  let err = f.store.commit_migration(stale.clone()).await.unwrap_err();
  assert_eq!(err.failure_kind(), FailureKind::Conflict);
  assert!(f.store.get_container(next.container_id).await.unwrap().is_none());

  let fresh = MigrationCommit { expected_draft: Some(current.container_id), ..stale };
  f.store.commit_migration(fresh).await.unwrap();

  let heads = f.store.get_heads(f.node, "en".into(), f.branch).await.unwrap().unwrap();
  assert_eq!(heads.draft, Some(next.container_id));
  let stored = f.store.get_container(next.container_id).await.unwrap().unwrap();
  assert_eq!(stored.fields, title("migrated"));
  assert_eq!(stored.previous, Some(current.container_id));
}

#[tokio::test]
async fn field_types_round_trip_through_storage() {
  let f = fixture().await;
  let mut d = draft(&f, "t");
  d.fields.insert("n".into(), FieldValue::Number(2.5));
  d.fields.insert(
    "when".into(),
    FieldValue::Date("2021-03-04T05:06:07Z".parse().unwrap()),
  );
  d.fields.insert(
    "tags".into(),
    FieldValue::List(ListValue::String(vec!["a".into(), "b".into()])),
  );
  let saved = f.store.save_draft(d).await.unwrap();

  let fetched = f.store.get_container(saved.container_id).await.unwrap().unwrap();
  assert_eq!(fetched.fields, saved.fields);
  assert_eq!(
    fetched.fields["tags"].field_type(),
    FieldType::List(ListItemType::String)
  );
}

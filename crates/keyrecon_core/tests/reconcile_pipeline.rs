mod common;

use common::{fixed_clock, ProbeStore, NOW_MS};
use keyrecon_core::db::open_db_in_memory;
use keyrecon_core::{
    build_index, AttrValue, CancellationToken, DefaultValue, DomainRecord, EngineError,
    KindConfig, LinkSpec, ParentLinker, Predicate, RecordError, RecordOutcome, RecordStore,
    ReconcileService, SqliteRecordStore, WriteMode,
};
use std::collections::HashSet;
use uuid::Uuid;

const MILLIS_PER_DAY: i64 = 86_400_000;

fn accounts() -> KindConfig {
    KindConfig::new("account", "name")
}

fn account(name: &str) -> DomainRecord {
    DomainRecord::new("account").attr("name", name)
}

fn contacts() -> KindConfig {
    KindConfig::new("contact", "email")
}

fn contact(email: &str, last_name: &str) -> DomainRecord {
    DomainRecord::new("contact")
        .attr("email", email)
        .attr("last_name", last_name)
}

fn contact_link() -> LinkSpec {
    LinkSpec::new(accounts(), "last_name", "account_id")
}

fn seed<S: RecordStore>(store: &S, kind: &str, records: Vec<DomainRecord>) -> Vec<Uuid> {
    store
        .write_batch(kind, &records, WriteMode::Insert, &CancellationToken::new())
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect()
}

fn count_all<S: RecordStore>(store: &S, kind: &str) -> usize {
    store
        .find(kind, &Predicate::All, &CancellationToken::new())
        .unwrap()
        .len()
}

#[test]
fn second_identical_upsert_updates_in_place() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let service = ReconcileService::with_clock(&store, fixed_clock);
    let cancel = CancellationToken::new();
    let batch = || vec![account("Acme"), account("Globex"), account("Initech")];

    let first = service.upsert_by_key(&accounts(), batch(), &cancel).unwrap();
    assert_eq!(first.created(), 3);

    let second = service.upsert_by_key(&accounts(), batch(), &cancel).unwrap();
    assert_eq!(second.created(), 0);
    assert_eq!(second.updated(), 3);
    assert_eq!(first.ids(), second.ids());
    assert_eq!(service.list_records("account", &cancel).unwrap().len(), 3);
}

#[test]
fn preview_partitions_every_candidate_exactly_once() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    seed(&store, "account", vec![account("Acme"), account("Initech")]);
    let service = ReconcileService::with_clock(&store, fixed_clock);

    let candidates = vec![
        account("Acme"),
        account("Globex"),
        account("Initech"),
        account("Umbrella"),
        DomainRecord::new("account"),
    ];
    let batch = service
        .preview(&accounts(), candidates, &CancellationToken::new())
        .unwrap();

    assert_eq!(batch.to_update.len(), 2);
    assert_eq!(batch.to_create.len(), 2);
    assert_eq!(batch.failures.len(), 1);
    assert_eq!(batch.covered_positions(), 5);

    let mut positions: Vec<usize> = batch
        .entries()
        .flat_map(|(_, entry)| entry.positions.clone())
        .chain(batch.failures.iter().map(|failure| failure.position))
        .collect();
    positions.sort_unstable();
    assert_eq!(positions, vec![0, 1, 2, 3, 4]);
    assert!(batch.to_update.iter().all(|entry| entry.record.id.is_some()));
    assert!(batch.to_create.iter().all(|entry| entry.record.id.is_none()));
}

#[test]
fn preview_does_not_write() {
    let conn = open_db_in_memory().unwrap();
    let probe = ProbeStore::new(SqliteRecordStore::try_new(&conn).unwrap());
    let service = ReconcileService::with_clock(&probe, fixed_clock);

    service
        .preview(&accounts(), vec![account("Acme")], &CancellationToken::new())
        .unwrap();
    assert_eq!(probe.finds(), 1);
    assert_eq!(probe.writes(), 0);
}

#[test]
fn distinct_parent_keys_create_one_parent_each() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let link = contact_link();
    let cancel = CancellationToken::new();
    let children = vec![
        contact("john@doe.test", "Doe"),
        contact("jane@jane.test", "Jane"),
        contact("jill@doe.test", "Doe"),
    ];

    let linker = ParentLinker::new(&store, &link, NOW_MS, &cancel);
    let outcome = linker.link_by_reference(children).unwrap();

    assert_eq!(outcome.parents.created.len(), 2);
    assert!(outcome.parents.reused.is_empty());
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.linked.len(), 3);

    let parent_ids: HashSet<Uuid> = outcome.parents.created.iter().map(|(_, id)| *id).collect();
    assert!(outcome
        .linked
        .iter()
        .all(|child| parent_ids.contains(&child.parent_id)));
    assert_eq!(outcome.linked[0].parent_id, outcome.linked[2].parent_id);
    assert_ne!(outcome.linked[0].parent_id, outcome.linked[1].parent_id);
    assert_eq!(
        outcome.linked[1].record.get("account_id"),
        Some(&AttrValue::from(outcome.linked[1].parent_id))
    );
    assert_eq!(count_all(&store, "account"), 2);
}

#[test]
fn existing_parent_is_reused() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let existing = seed(&store, "account", vec![account("Doe")])[0];
    let service = ReconcileService::with_clock(&store, fixed_clock);

    let report = service
        .upsert_with_parents(
            &contacts(),
            &contact_link(),
            vec![contact("john@doe.test", "Doe")],
            &CancellationToken::new(),
        )
        .unwrap();

    assert!(report.parents.created.is_empty());
    assert_eq!(report.parents.reused, vec![("Doe".to_string(), existing)]);
    assert_eq!(count_all(&store, "account"), 1);

    let child_id = report.children.ids()[0].unwrap();
    let child = store.get("contact", child_id).unwrap().unwrap();
    assert_eq!(child.get("account_id"), Some(&AttrValue::from(existing)));
}

#[test]
fn upsert_with_parents_reports_every_child_in_input_order() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    seed(
        &store,
        "contact",
        vec![contact("jane@jane.test", "Jane").attr("phone", "111")],
    );
    let service = ReconcileService::with_clock(&store, fixed_clock);

    let report = service
        .upsert_with_parents(
            &contacts(),
            &contact_link(),
            vec![
                DomainRecord::new("contact").attr("email", "nobody@test"),
                contact("john@doe.test", "Doe"),
                contact("jane@jane.test", "Jane").attr("phone", "222"),
            ],
            &CancellationToken::new(),
        )
        .unwrap();

    let children = &report.children;
    assert_eq!(children.records.len(), 3);
    let positions: Vec<usize> = children.records.iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    assert_eq!(
        children.records[0].outcome,
        RecordOutcome::Failed(RecordError::MissingKey {
            kind: "contact".to_string(),
            attribute: "last_name".to_string(),
        })
    );
    assert!(matches!(
        children.records[1].outcome,
        RecordOutcome::Created(_)
    ));
    assert!(matches!(
        children.records[2].outcome,
        RecordOutcome::Updated(_)
    ));
    assert_eq!(report.parents.created.len(), 2);
}

#[test]
fn rejected_parent_leaves_its_children_unresolved() {
    let conn = open_db_in_memory().unwrap();
    let probe = ProbeStore::rejecting(SqliteRecordStore::try_new(&conn).unwrap(), "name", "Jane");
    let service = ReconcileService::with_clock(&probe, fixed_clock);

    let report = service
        .upsert_with_parents(
            &contacts(),
            &contact_link(),
            vec![
                contact("john@doe.test", "Doe"),
                contact("jane@jane.test", "Jane"),
            ],
            &CancellationToken::new(),
        )
        .unwrap();

    assert!(report.children.records[0].outcome.is_success());
    assert_eq!(
        report.children.records[1].outcome,
        RecordOutcome::Failed(RecordError::UnresolvedLink {
            parent_kind: "account".to_string(),
            parent_key: "Jane".to_string(),
        })
    );
    assert_eq!(
        report.parents.rejected,
        vec![("Jane".to_string(), "rejected by probe".to_string())]
    );
    assert_eq!(count_all(&probe, "contact"), 1);
}

#[test]
fn one_rejected_record_does_not_fail_the_batch() {
    let conn = open_db_in_memory().unwrap();
    let probe = ProbeStore::rejecting(SqliteRecordStore::try_new(&conn).unwrap(), "name", "Bad");
    let service = ReconcileService::with_clock(&probe, fixed_clock);

    let candidates = vec![
        account("Acme"),
        account("Globex"),
        account("Bad"),
        account("Initech"),
        account("Umbrella"),
    ];
    let report = service
        .upsert_by_key(&accounts(), candidates, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.records.len(), 5);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        report.records[2].outcome,
        RecordOutcome::Failed(RecordError::StoreRejection { .. })
    ));
    let ids: HashSet<Uuid> = report.ids().into_iter().flatten().collect();
    assert_eq!(ids.len(), 4);
    assert_eq!(probe.writes(), 1);
}

#[test]
fn index_lookup_is_one_find_regardless_of_batch_size() {
    let conn = open_db_in_memory().unwrap();
    let cancel = CancellationToken::new();

    let small = ProbeStore::new(SqliteRecordStore::try_new(&conn).unwrap());
    build_index(&small, &accounts(), &["Acme".to_string()], &cancel).unwrap();
    assert_eq!(small.finds(), 1);

    let large = ProbeStore::new(SqliteRecordStore::try_new(&conn).unwrap());
    let keys: Vec<String> = (0..1000).map(|n| format!("account-{n}")).collect();
    build_index(&large, &accounts(), &keys, &cancel).unwrap();
    assert_eq!(large.finds(), 1);

    let empty = ProbeStore::new(SqliteRecordStore::try_new(&conn).unwrap());
    build_index(&empty, &accounts(), &[], &cancel).unwrap();
    assert_eq!(empty.finds(), 0);
}

#[test]
fn updates_keep_ids_and_creates_get_fresh_ones() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let existing = seed(&store, "account", vec![account("Acme"), account("Globex")]);
    let service = ReconcileService::with_clock(&store, fixed_clock);

    let report = service
        .upsert_by_key(
            &accounts(),
            vec![account("Globex"), account("Initech"), account("Acme")],
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(report.records[0].outcome, RecordOutcome::Updated(existing[1]));
    assert_eq!(report.records[2].outcome, RecordOutcome::Updated(existing[0]));
    let created = report.records[1].outcome.id().unwrap();
    assert!(!existing.contains(&created));
}

#[test]
fn only_mutable_attributes_change_on_update() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let id = seed(
        &store,
        "account",
        vec![account("Acme").attr("industry", "Retail").attr("phone", "111")],
    )[0];
    let service = ReconcileService::with_clock(&store, fixed_clock);
    let config = accounts().with_mutable(["phone"]);

    service
        .upsert_by_key(
            &config,
            vec![account("Acme")
                .attr("industry", "Mining")
                .attr("phone", "222")],
            &CancellationToken::new(),
        )
        .unwrap();

    let stored = store.get("account", id).unwrap().unwrap();
    assert_eq!(stored.text("industry"), Some("Retail"));
    assert_eq!(stored.text("phone"), Some("222"));
}

#[test]
fn defaults_apply_to_created_records_only() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let existing = seed(&store, "account", vec![account("Acme")])[0];
    let service = ReconcileService::with_clock(&store, fixed_clock);
    let config = accounts()
        .with_default("stage", DefaultValue::Fixed(AttrValue::from("Prospecting")))
        .with_default("close_date", DefaultValue::DaysFromNow(30));

    let report = service
        .upsert_by_key(
            &config,
            vec![account("Acme"), account("Globex")],
            &CancellationToken::new(),
        )
        .unwrap();

    let untouched = store.get("account", existing).unwrap().unwrap();
    assert_eq!(untouched.get("stage"), None);

    let created = store
        .get("account", report.records[1].outcome.id().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(created.text("stage"), Some("Prospecting"));
    assert_eq!(
        created.get("close_date"),
        Some(&AttrValue::Integer(NOW_MS + 30 * MILLIS_PER_DAY))
    );
}

#[test]
fn repeated_keys_in_one_batch_share_one_record() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let service = ReconcileService::with_clock(&store, fixed_clock);

    let report = service
        .upsert_by_key(
            &accounts(),
            vec![
                account("Acme").attr("phone", "111"),
                account("Globex"),
                account("Acme").attr("phone", "222"),
            ],
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(report.created(), 3);
    assert_eq!(report.ids()[0], report.ids()[2]);
    let stored = store.get("account", report.ids()[0].unwrap()).unwrap().unwrap();
    assert_eq!(stored.text("phone"), Some("222"));
    assert_eq!(count_all(&store, "account"), 2);
}

#[test]
fn insert_all_creates_without_matching() {
    let conn = open_db_in_memory().unwrap();
    let probe = ProbeStore::new(SqliteRecordStore::try_new(&conn).unwrap());
    seed(&probe, "account", vec![account("Acme")]);
    let service = ReconcileService::with_clock(&probe, fixed_clock);

    let report = service
        .insert_all("account", vec![account("Acme")], &CancellationToken::new())
        .unwrap();

    assert_eq!(report.created(), 1);
    assert_eq!(probe.finds(), 0);
    assert_eq!(count_all(&probe, "account"), 2);
}

#[test]
fn delete_records_reports_each_id() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let ids = seed(&store, "account", vec![account("Acme"), account("Globex")]);
    let service = ReconcileService::with_clock(&store, fixed_clock);
    let cancel = CancellationToken::new();

    let report = service
        .delete_records("account", &[ids[0], Uuid::new_v4()], &cancel)
        .unwrap();

    assert_eq!(report.records[0].outcome, RecordOutcome::Deleted(ids[0]));
    assert!(!report.records[1].outcome.is_success());
    assert!(service.get_record("account", ids[0], &cancel).unwrap().is_none());
    assert!(service.get_record("account", ids[1], &cancel).unwrap().is_some());
}

#[test]
fn unreachable_store_aborts_the_call() {
    let conn = open_db_in_memory().unwrap();
    let probe = ProbeStore::new(SqliteRecordStore::try_new(&conn).unwrap());
    probe.set_offline(true);
    let service = ReconcileService::with_clock(&probe, fixed_clock);

    let err = service
        .upsert_by_key(&accounts(), vec![account("Acme")], &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, EngineError::StoreUnavailable(_)));
}

#[test]
fn cancelled_token_aborts_before_any_store_call() {
    let conn = open_db_in_memory().unwrap();
    let probe = ProbeStore::new(SqliteRecordStore::try_new(&conn).unwrap());
    let service = ReconcileService::with_clock(&probe, fixed_clock);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = service
        .upsert_with_parents(
            &contacts(),
            &contact_link(),
            vec![contact("john@doe.test", "Doe")],
            &cancel,
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(probe.finds(), 0);
    assert_eq!(probe.writes(), 0);
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let service = ReconcileService::with_clock(&store, fixed_clock);

    let err = service
        .upsert_by_key(
            &KindConfig::new("account", "bad key"),
            vec![account("Acme")],
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
}

#[test]
fn matched_child_receives_parent_id_outside_its_mutable_attributes() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteRecordStore::try_new(&conn).unwrap();
    let child_id = seed(&store, "contact", vec![contact("john@doe.test", "Doe")])[0];
    let service = ReconcileService::with_clock(&store, fixed_clock);

    let report = service
        .upsert_with_parents(
            &contacts().with_mutable(["phone"]),
            &contact_link(),
            vec![contact("john@doe.test", "Doe")],
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(
        report.children.records[0].outcome,
        RecordOutcome::Updated(child_id)
    );
    let parent_id = report.parents.created[0].1;
    let stored = store.get("contact", child_id).unwrap().unwrap();
    assert_eq!(stored.get("account_id"), Some(&AttrValue::from(parent_id)));
}

#[test]
fn child_without_own_key_creates_no_parent() {
    let conn = open_db_in_memory().unwrap();
    let probe = ProbeStore::new(SqliteRecordStore::try_new(&conn).unwrap());
    let service = ReconcileService::with_clock(&probe, fixed_clock);

    let report = service
        .upsert_with_parents(
            &contacts(),
            &contact_link(),
            vec![
                DomainRecord::new("contact").attr("last_name", "Orphan"),
                contact("john@doe.test", "Doe"),
            ],
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(
        report.children.records[0].outcome,
        RecordOutcome::Failed(RecordError::MissingKey {
            kind: "contact".to_string(),
            attribute: "email".to_string(),
        })
    );
    assert!(report.children.records[1].outcome.is_success());
    let created: Vec<&str> = report
        .parents
        .created
        .iter()
        .map(|(key, _)| key.as_str())
        .collect();
    assert_eq!(created, vec!["Doe"]);
    assert_eq!(count_all(&probe, "account"), 1);
}

#[test]
fn foreign_key_that_overwrites_child_key_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let probe = ProbeStore::new(SqliteRecordStore::try_new(&conn).unwrap());
    let service = ReconcileService::with_clock(&probe, fixed_clock);

    let err = service
        .upsert_with_parents(
            &contacts(),
            &LinkSpec::new(accounts(), "last_name", "email"),
            vec![contact("john@doe.test", "Doe")],
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
    assert_eq!(probe.writes(), 0);
}

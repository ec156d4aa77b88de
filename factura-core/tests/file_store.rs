mod common;

use factura_core::audit::{AuditContext, AuditOutcome};
use factura_core::config::Config;
use factura_core::customer::CustomerService;
use factura_core::issuance::{IssuanceService, IssueRequest};
use factura_core::keys::KeyMaterialManager;
use factura_core::store::{JsonFileStore, SequenceStore, StoreError};
use factura_core::verify::{VerificationResult, VerificationService};
use factura_core::EngineContext;
use std::collections::BTreeSet;
use std::thread;

fn bootstrap(store: &JsonFileStore) -> EngineContext {
    let config: Config = common::config().with_master_key(common::master_key().to_base64());
    EngineContext::bootstrap(config, store).expect("bootstrap")
}

#[test]
fn invoices_survive_reopening_the_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("data").join("store.json");

    let (digest, public_pem) = {
        let store = JsonFileStore::open(&path).expect("open");
        let ctx = bootstrap(&store);
        let customer = common::add_customer(&ctx, &store, "0912345678");
        let record = IssuanceService::new(&ctx, &store)
            .issue(
                &IssueRequest::new(customer, common::widget_items()),
                &AuditContext::system(),
            )
            .expect("issue");
        (record.digest, ctx.keys().public_key_pem().expect("pem"))
    };

    let store = JsonFileStore::open(&path).expect("reopen");
    let keys = KeyMaterialManager::new(&store)
        .ensure_key_material()
        .expect("stored keys");
    assert_eq!(keys.public_key_pem().expect("pem"), public_pem);

    let result = VerificationService::new(&store, keys.public_key())
        .verify(&digest)
        .expect("verify");
    assert!(matches!(result, VerificationResult::Valid(_)));

    let ctx = bootstrap(&store);
    assert_eq!(store.last_sequence(ctx.config().series()).expect("last"), 1);
    let fields = CustomerService::new(&ctx, &store).fields(1).expect("decrypt");
    assert_eq!(fields.email, "ana@example.ec");

    let raw = std::fs::read_to_string(&path).expect("read");
    assert!(!raw.contains("ana@example.ec"));
    assert!(!raw.contains("Av. Quito 100"));
}

#[test]
fn handles_sharing_a_file_issue_contiguous_numbers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.json");
    let customer = {
        let store = JsonFileStore::open(&path).expect("open");
        let ctx = bootstrap(&store);
        common::add_customer(&ctx, &store, "0912345678")
    };

    let sequences: Vec<u64> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                scope.spawn(move || {
                    let store = JsonFileStore::open(&path).expect("open");
                    let ctx = bootstrap(&store);
                    let service = IssuanceService::new(&ctx, &store);
                    (0..8)
                        .map(|_| {
                            service
                                .issue(
                                    &IssueRequest::new(customer, common::widget_items()),
                                    &AuditContext::system(),
                                )
                                .expect("issue")
                                .number
                                .sequence()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().expect("worker"))
            .collect()
    });

    let unique: BTreeSet<u64> = sequences.iter().copied().collect();
    assert_eq!(unique, (1..=16).collect());

    let store = JsonFileStore::open(&path).expect("reopen");
    let ctx = bootstrap(&store);
    assert_eq!(store.last_sequence(ctx.config().series()).expect("last"), 16);
    let next = IssuanceService::new(&ctx, &store)
        .issue(&IssueRequest::new(customer, common::widget_items()), &AuditContext::system())
        .expect("issue after concurrent run");
    assert_eq!(next.number.sequence(), 17);
}

#[test]
fn numbering_resumes_past_invoices_the_counter_missed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.json");
    let store = JsonFileStore::open(&path).expect("open");
    let ctx = bootstrap(&store);
    let customer = common::add_customer(&ctx, &store, "0912345678");
    let service = IssuanceService::new(&ctx, &store);
    for _ in 0..2 {
        service
            .issue(&IssueRequest::new(customer, common::widget_items()), &AuditContext::system())
            .expect("issue");
    }

    // Roll the counter back as if a writer died before committing it.
    let raw = std::fs::read_to_string(&path).expect("read");
    let mut doc: serde_json::Value = serde_json::from_str(&raw).expect("json");
    doc["sequences"]["001-001"] = serde_json::json!(0);
    std::fs::write(&path, serde_json::to_string(&doc).expect("json")).expect("write");

    let record = service
        .issue(&IssueRequest::new(customer, common::widget_items()), &AuditContext::system())
        .expect("issue");
    assert_eq!(record.number.sequence(), 3);
    assert_eq!(store.last_sequence(ctx.config().series()).expect("last"), 3);
}

#[test]
fn audit_log_is_appended_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonFileStore::open(dir.path().join("store.json")).expect("open");
    let ctx = bootstrap(&store);
    let customer = common::add_customer(&ctx, &store, "0912345678");

    IssuanceService::new(&ctx, &store)
        .issue(&IssueRequest::new(customer + 1, common::widget_items()), &AuditContext::system())
        .expect_err("unknown customer");
    IssuanceService::new(&ctx, &store)
        .issue(&IssueRequest::new(customer, common::widget_items()), &AuditContext::system())
        .expect("issue");

    let outcomes: Vec<_> = store
        .audit_entries()
        .expect("entries")
        .iter()
        .map(|e| (e.entity_kind().to_string(), e.outcome()))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("customer".to_string(), AuditOutcome::Success),
            ("invoice".to_string(), AuditOutcome::Error),
            ("invoice".to_string(), AuditOutcome::Success),
        ]
    );
}

#[test]
fn corrupt_store_fails_to_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.json");
    std::fs::write(&path, "{ not json").expect("write");
    let err = JsonFileStore::open(&path).err().expect("corrupt file");
    assert!(matches!(err, StoreError::Malformed { .. }));
}

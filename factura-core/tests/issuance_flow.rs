mod common;

use factura_core::access_key::{check_digit, AccessKey};
use factura_core::audit::{AuditAction, AuditContext, AuditOutcome};
use factura_core::authority::AuthorizationStatus;
use factura_core::invoice::digest_hex;
use factura_core::invoice::sign::{verify_signed_body, SignedBodyCheck};
use factura_core::issuance::{IssuanceService, IssueRequest};
use factura_core::numbering::Series;
use factura_core::store::{InvoiceStore, MemoryStore, SequenceStore};
use factura_core::verify::{VerificationResult, VerificationService};
use rust_decimal::Decimal;

#[test]
fn issued_invoice_verifies_by_digest() {
    let ctx = common::context();
    let store = MemoryStore::new();
    let customer = common::add_customer(&ctx, &store, "0912345678");

    let record = IssuanceService::new(&ctx, &store)
        .issue(
            &IssueRequest::new(customer, common::widget_items()),
            &AuditContext::new(Some(11), "192.168.1.20"),
        )
        .expect("issue");

    assert_eq!(record.number.to_string(), "001-001-000000001");
    assert_eq!(record.totals.subtotal(), Decimal::new(2500, 2));
    assert_eq!(record.totals.tax(), Decimal::new(300, 2));
    assert_eq!(record.totals.total(), Decimal::new(2800, 2));
    assert_eq!(record.digest, digest_hex(&record.canonical_body));
    assert_eq!(
        verify_signed_body(ctx.public_key(), &record.signed_body),
        SignedBodyCheck::Valid
    );

    let key = AccessKey::parse(record.access_key.as_str()).expect("stored key parses");
    assert_eq!(key.tax_id(), "1790012345001");
    assert_eq!(key.serial(), "000000001");
    assert_eq!(
        key.check_digit(),
        check_digit(key.body()).expect("check digit")
    );

    let result = VerificationService::from_context(&ctx, &store)
        .verify(&record.digest.to_uppercase())
        .expect("verify");
    let summary = result.summary().expect("valid result has a summary");
    assert_eq!(result.as_str(), "VALID");
    assert_eq!(summary.invoice_number, record.number);
    assert_eq!(summary.customer_display_name, "Ana Mora");
    assert_eq!(summary.total, Decimal::new(2800, 2));
    assert_eq!(summary.authorization_status, AuthorizationStatus::Authorized);

    let rendered = serde_json::to_string(summary).expect("summary json");
    assert!(!rendered.contains("ana@example.ec"));
    assert!(!rendered.contains("0999999999"));
}

#[test]
fn numbers_are_contiguous_per_series() {
    let ctx = common::context();
    let store = MemoryStore::new();
    let customer = common::add_customer(&ctx, &store, "0912345678");
    let service = IssuanceService::new(&ctx, &store);
    let branch = Series::new("002", "003").expect("series");

    for expected in 1..=3 {
        let record = service
            .issue(
                &IssueRequest::new(customer, common::widget_items()),
                &AuditContext::system(),
            )
            .expect("issue");
        assert_eq!(record.number.sequence(), expected);
    }

    let mut request = IssueRequest::new(customer, common::widget_items());
    request.series = Some(branch.clone());
    let record = service
        .issue(&request, &AuditContext::system())
        .expect("issue on branch");
    assert_eq!(record.number.to_string(), "002-003-000000001");
    assert!(record.access_key.as_str().contains("002003000000001"));

    assert_eq!(store.last_sequence(ctx.config().series()).expect("last"), 3);
    assert_eq!(store.last_sequence(&branch).expect("last"), 1);
}

#[test]
fn issuance_is_audited_with_actor() {
    let ctx = common::context();
    let store = MemoryStore::new();
    let customer = common::add_customer(&ctx, &store, "0912345678");

    let record = IssuanceService::new(&ctx, &store)
        .issue(
            &IssueRequest::new(customer, common::widget_items()),
            &AuditContext::new(Some(11), "192.168.1.20").with_user_agent("pos/2.1"),
        )
        .expect("issue");

    let entries = store.audit_entries().expect("entries");
    let last = entries.last().expect("issuance entry");
    assert_eq!(last.action(), AuditAction::Create);
    assert_eq!(last.outcome(), AuditOutcome::Success);
    assert_eq!(last.actor_id(), Some(11));
    assert_eq!(last.origin(), Some("192.168.1.20"));
    assert_eq!(last.user_agent(), Some("pos/2.1"));
    let number = record.number.to_string();
    assert_eq!(last.entity(), Some(number.as_str()));
}

#[test]
fn audit_outage_does_not_abort_issuance() {
    let ctx = common::context();
    let store = MemoryStore::new();
    let customer = common::add_customer(&ctx, &store, "0912345678");
    let before = store.audit_entries().expect("entries").len();

    store.fail_audit_writes(true);
    let record = IssuanceService::new(&ctx, &store)
        .issue(
            &IssueRequest::new(customer, common::widget_items()),
            &AuditContext::system(),
        )
        .expect("issue despite audit outage");
    store.fail_audit_writes(false);

    assert_eq!(store.audit_entries().expect("entries").len(), before);
    assert!(store
        .invoice_by_digest(&record.digest)
        .expect("lookup")
        .is_some());
    let result = VerificationService::from_context(&ctx, &store)
        .verify(&record.digest)
        .expect("verify");
    assert!(matches!(result, VerificationResult::Valid(_)));
}

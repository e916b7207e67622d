use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use httpmock::prelude::*;
use rust_decimal_macros::dec;
use uuid::Uuid;

use einvoice_engine::providers::efactura::{
    EFacturaClient, EFacturaStatusChecker, EFacturaSubmissionHandler,
};
use einvoice_engine::{
    DocumentKind, Engine, EngineMessage, GovernorRateLimitGuard, InvoiceDocument, InvoiceLine,
    InvoiceRecord, InvoiceState, MemoryBus, MemoryObjectStore, MemoryStore, MessageBus,
    MonetaryTotal, NamedLimit, ObjectStore, Party, PostalAddress, ProviderId, ProviderRegistry,
    RateLimitGuard, StaticCredentials, SubmissionStatus, TaxCategory, TaxTotal,
};

fn invoice() -> InvoiceRecord {
    let lines = vec![InvoiceLine::compute(
        "1",
        "Software subscription",
        dec!(2),
        "C62",
        dec!(10.00),
        TaxCategory::StandardRate,
        dec!(21),
    )];
    let tax_total = TaxTotal::from_lines(&lines);
    let monetary_total = MonetaryTotal::from_lines(&lines, &tax_total);

    let party = |name: &str| Party {
        registration_name: name.into(),
        company_id: Some("J40/99/2021".into()),
        vat_id: Some("RO98765432".into()),
        address: PostalAddress {
            street: "Calea Victoriei 10".into(),
            city: "Bucuresti".into(),
            postal_zone: Some("030167".into()),
            county: None,
            country_code: "RO".into(),
        },
        contact: None,
    };

    InvoiceRecord {
        id: Uuid::new_v4(),
        organization_id: "RO98765432".into(),
        number: "INV-42".into(),
        state: InvoiceState::Issued,
        document: InvoiceDocument {
            kind: DocumentKind::Invoice,
            number: "INV-42".into(),
            issue_date: NaiveDate::from_ymd_opt(2026, 5, 14).unwrap(),
            due_date: Some(NaiveDate::from_ymd_opt(2026, 6, 13).unwrap()),
            currency: "RON".into(),
            note: None,
            buyer_reference: None,
            order_reference: None,
            contract_reference: None,
            payment_terms: None,
            seller: party("Furnizor SRL"),
            buyer: party("Client SRL"),
            payment_means: None,
            tax_total,
            monetary_total,
            lines,
        },
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    storage: Arc<MemoryObjectStore>,
    bus: Arc<MemoryBus>,
    engine: Engine,
}

fn harness(server: &MockServer, limiter: Arc<dyn RateLimitGuard>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let storage = Arc::new(MemoryObjectStore::new());
    let bus = Arc::new(MemoryBus::new());

    let credentials = Arc::new(StaticCredentials::new().with(
        "*",
        ProviderId::EFactura,
        HashMap::from([("token".to_string(), "tok".to_string())]),
    ));

    let client = Arc::new(EFacturaClient::new(server.base_url(), limiter));
    let mut registry = ProviderRegistry::new();
    registry.register(
        ProviderId::EFactura,
        Arc::new(EFacturaSubmissionHandler::new(
            client.clone(),
            storage.clone(),
            credentials.clone(),
        )),
        Arc::new(EFacturaStatusChecker::new(client, store.clone(), credentials)),
    );

    let engine = Engine::new(
        store.clone(),
        store.clone(),
        Arc::new(registry),
        bus.clone(),
    );

    Harness {
        store,
        storage,
        bus,
        engine,
    }
}

/// Deliver every due message until the queue drains or `max_rounds` passes.
async fn pump(harness: &Harness, max_rounds: usize) {
    for _ in 0..max_rounds {
        let due = harness.bus.drain_due();
        if due.is_empty() {
            return;
        }
        for message in due {
            harness.engine.handle_message(message).await.unwrap();
        }
    }
}

#[tokio::test]
async fn issued_invoice_travels_to_validated() {
    let server = MockServer::start();
    let upload = server.mock(|when, then| {
        when.method(POST).path("/upload").query_param("cif", "RO98765432");
        then.status(200)
            .body(r#"<header ExecutionStatus="0" index_incarcare="7001"/>"#);
    });
    let status = server.mock(|when, then| {
        when.method(GET)
            .path("/stareMesaj")
            .query_param("id_incarcare", "7001");
        then.status(200)
            .body(r#"<header stare="ok" id_descarcare="8001"/>"#);
    });

    let h = harness(&server, Arc::new(einvoice_engine::UnlimitedGuard));
    let invoice = invoice();
    h.store.add_invoice(invoice.clone());

    h.bus
        .dispatch(EngineMessage::SubmitEInvoice {
            invoice_id: invoice.id,
            provider: ProviderId::EFactura,
        })
        .await
        .unwrap();
    pump(&h, 5).await;

    upload.assert();
    status.assert();

    let submissions = h.store.submissions_for(invoice.id);
    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert_eq!(submission.status, SubmissionStatus::Validated);
    assert_eq!(submission.external_id.as_deref(), Some("7001"));
    assert_eq!(
        submission.metadata.get("download_id"),
        Some(&serde_json::json!("8001"))
    );

    // The generated XML is durably stored and parseable.
    let xml = h
        .storage
        .get(submission.xml_path.as_deref().unwrap())
        .await
        .unwrap();
    let document = einvoice_engine::xml::deserialize(&xml).unwrap();
    assert_eq!(document, invoice.document);
}

#[tokio::test]
async fn authority_rejection_is_terminal_and_keeps_the_message() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/upload");
        then.status(200)
            .body(r#"<header ExecutionStatus="0" index_incarcare="7002"/>"#);
    });
    server.mock(|when, then| {
        when.method(GET).path("/stareMesaj");
        then.status(200)
            .body(r#"<header stare="nok" errorMessage="BR-CO-14 broken"/>"#);
    });

    let h = harness(&server, Arc::new(einvoice_engine::UnlimitedGuard));
    let invoice = invoice();
    h.store.add_invoice(invoice.clone());

    h.engine
        .handle_message(EngineMessage::SubmitEInvoice {
            invoice_id: invoice.id,
            provider: ProviderId::EFactura,
        })
        .await
        .unwrap();
    pump(&h, 5).await;

    let submission = &h.store.submissions_for(invoice.id)[0];
    assert_eq!(submission.status, SubmissionStatus::Rejected);
    assert_eq!(submission.error_message.as_deref(), Some("BR-CO-14 broken"));

    // A duplicate poll delivery afterwards changes nothing.
    h.engine
        .handle_message(EngineMessage::CheckEInvoiceStatus {
            submission_id: submission.id,
            attempt: 1,
        })
        .await
        .unwrap();
    let again = h.store.submission(submission.id).unwrap();
    assert_eq!(again.status, SubmissionStatus::Rejected);
    assert_eq!(again.updated_at, submission.updated_at);
}

#[tokio::test]
async fn exhausted_budget_defers_the_next_poll_until_retry_after() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/upload");
        then.status(200)
            .body(r#"<header ExecutionStatus="0" index_incarcare="7003"/>"#);
    });
    server.mock(|when, then| {
        when.method(GET).path("/stareMesaj");
        then.status(200).body(r#"<header stare="ok"/>"#);
    });

    // One call per minute: the upload spends the whole budget.
    let mut limits = HashMap::new();
    limits.insert(
        ProviderId::EFactura,
        vec![NamedLimit::new("per-minute", 1, Duration::from_secs(60))],
    );
    let h = harness(
        &server,
        Arc::new(GovernorRateLimitGuard::new(&limits).unwrap()),
    );
    let invoice = invoice();
    h.store.add_invoice(invoice.clone());

    h.engine
        .handle_message(EngineMessage::SubmitEInvoice {
            invoice_id: invoice.id,
            provider: ProviderId::EFactura,
        })
        .await
        .unwrap();

    // The first poll hits the exhausted budget and is deferred.
    for message in h.bus.drain_due() {
        h.engine.handle_message(message).await.unwrap();
    }

    let submission = &h.store.submissions_for(invoice.id)[0];
    assert_eq!(submission.status, SubmissionStatus::Accepted);

    let deferred_by = h.bus.next_due_in().expect("a deferred poll is queued");
    assert!(deferred_by >= Duration::from_secs(1));

    // Nothing runs before the retry-after elapses on the simulated clock.
    assert!(h.bus.drain_due().is_empty());
    h.bus.advance(deferred_by - Duration::from_secs(1));
    assert!(h.bus.drain_due().is_empty());

    h.bus.advance(Duration::from_secs(1));
    let due = h.bus.drain_due();
    assert_eq!(due.len(), 1);
    assert!(matches!(
        due[0],
        EngineMessage::CheckEInvoiceStatus { attempt: 0, .. }
    ));
}

#[tokio::test]
async fn draft_invoice_is_refused_before_any_network_call() {
    let server = MockServer::start();
    let upload = server.mock(|when, then| {
        when.method(POST).path("/upload");
        then.status(200).body(r#"<header ExecutionStatus="0"/>"#);
    });

    let h = harness(&server, Arc::new(einvoice_engine::UnlimitedGuard));
    let mut invoice = invoice();
    invoice.state = InvoiceState::Draft;
    h.store.add_invoice(invoice.clone());

    h.engine
        .handle_message(EngineMessage::SubmitEInvoice {
            invoice_id: invoice.id,
            provider: ProviderId::EFactura,
        })
        .await
        .unwrap();

    upload.assert_hits(0);
    let submission = &h.store.submissions_for(invoice.id)[0];
    assert_eq!(submission.status, SubmissionStatus::Error);
    assert!(submission
        .error_message
        .as_deref()
        .unwrap()
        .contains("not in a submittable state"));
}

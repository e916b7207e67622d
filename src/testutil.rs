//! Shared fixtures for in-crate unit tests.

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::models::*;

pub(crate) fn sample_address() -> PostalAddress {
    PostalAddress {
        street: "Str. Exemplu 1".into(),
        city: "Bucuresti".into(),
        postal_zone: Some("010101".into()),
        county: Some("Sector 1".into()),
        country_code: "RO".into(),
    }
}

pub(crate) fn sample_party(name: &str) -> Party {
    Party {
        registration_name: name.into(),
        company_id: Some("J40/123/2020".into()),
        vat_id: Some("RO12345678".into()),
        address: sample_address(),
        contact: Some(Contact {
            name: Some("Ion Popescu".into()),
            phone: Some("+40700000000".into()),
            email: Some("facturi@example.ro".into()),
        }),
    }
}

pub(crate) fn sample_document() -> InvoiceDocument {
    let lines = vec![InvoiceLine::compute(
        "1",
        "Consulting",
        dec!(2),
        "HUR",
        dec!(10.00),
        TaxCategory::StandardRate,
        dec!(21),
    )];
    let tax_total = TaxTotal::from_lines(&lines);
    let monetary_total = MonetaryTotal::from_lines(&lines, &tax_total);
    InvoiceDocument {
        kind: DocumentKind::Invoice,
        number: "INV-2026-001".into(),
        issue_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        due_date: Some(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap()),
        currency: "RON".into(),
        note: None,
        buyer_reference: None,
        order_reference: Some("PO-77".into()),
        contract_reference: None,
        payment_terms: Some("30 days net".into()),
        seller: sample_party("Vanzator SRL"),
        buyer: sample_party("Cumparator SA"),
        payment_means: Some(PaymentMeans {
            code: "30".into(),
            account: Some(PayeeFinancialAccount {
                iban: "RO49AAAA1B31007593840000".into(),
                account_name: Some("Vanzator SRL".into()),
                bank_branch: Some("BTRLRO22".into()),
            }),
        }),
        tax_total,
        monetary_total,
        lines,
    }
}

pub(crate) fn sample_invoice() -> InvoiceRecord {
    InvoiceRecord {
        id: Uuid::new_v4(),
        organization_id: "RO12345678".into(),
        number: "INV-2026-001".into(),
        state: InvoiceState::Issued,
        document: sample_document(),
    }
}

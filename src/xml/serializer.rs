use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use rust_decimal::Decimal;

use crate::core::EngineResult;
use crate::models::{format_amount, DocumentKind, InvoiceDocument, InvoiceLine, Party};

use super::schema::{self as s, ElementDef};

/// Serialize a document to namespaced UBL XML (UTF-8, no BOM).
///
/// Validates first and refuses to emit malformed XML. Optional fields that
/// are unset are omitted entirely, never written as empty elements.
pub fn serialize(document: &InvoiceDocument) -> EngineResult<Vec<u8>> {
    document.validate()?;

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let (root_name, root_ns) = match document.kind {
        DocumentKind::Invoice => ("Invoice", s::NS_INVOICE),
        DocumentKind::CreditNote => ("CreditNote", s::NS_CREDIT_NOTE),
    };
    let mut root = BytesStart::new(root_name);
    root.push_attribute(("xmlns", root_ns));
    root.push_attribute(("xmlns:cac", s::NS_CAC));
    root.push_attribute(("xmlns:cbc", s::NS_CBC));
    writer.write_event(Event::Start(root))?;

    let currency = document.currency.as_str();

    write_text(&mut writer, s::UBL_VERSION_ID, s::UBL_VERSION)?;
    write_text(&mut writer, s::CUSTOMIZATION, s::CUSTOMIZATION_ID)?;
    write_text(&mut writer, s::ID, &document.number)?;
    write_text(
        &mut writer,
        s::ISSUE_DATE,
        &document.issue_date.format("%Y-%m-%d").to_string(),
    )?;
    // The CreditNote schema has no DueDate element.
    if document.kind == DocumentKind::Invoice {
        if let Some(due) = document.due_date {
            write_text(&mut writer, s::DUE_DATE, &due.format("%Y-%m-%d").to_string())?;
        }
    }
    let type_code_def = match document.kind {
        DocumentKind::Invoice => s::INVOICE_TYPE_CODE,
        DocumentKind::CreditNote => s::CREDIT_NOTE_TYPE_CODE,
    };
    write_text(&mut writer, type_code_def, document.kind.type_code())?;
    if let Some(note) = &document.note {
        write_text(&mut writer, s::NOTE, note)?;
    }
    write_text(&mut writer, s::DOCUMENT_CURRENCY_CODE, currency)?;
    if let Some(buyer_ref) = &document.buyer_reference {
        write_text(&mut writer, s::BUYER_REFERENCE, buyer_ref)?;
    }

    if let Some(order_ref) = &document.order_reference {
        open(&mut writer, s::ORDER_REFERENCE)?;
        write_text(&mut writer, s::ID, order_ref)?;
        close(&mut writer, s::ORDER_REFERENCE)?;
    }
    if let Some(contract_ref) = &document.contract_reference {
        open(&mut writer, s::CONTRACT_DOCUMENT_REFERENCE)?;
        write_text(&mut writer, s::ID, contract_ref)?;
        close(&mut writer, s::CONTRACT_DOCUMENT_REFERENCE)?;
    }

    write_party(&mut writer, s::ACCOUNTING_SUPPLIER_PARTY, &document.seller)?;
    write_party(&mut writer, s::ACCOUNTING_CUSTOMER_PARTY, &document.buyer)?;

    if let Some(means) = &document.payment_means {
        open(&mut writer, s::PAYMENT_MEANS)?;
        write_text(&mut writer, s::PAYMENT_MEANS_CODE, &means.code)?;
        if let Some(account) = &means.account {
            open(&mut writer, s::PAYEE_FINANCIAL_ACCOUNT)?;
            write_text(&mut writer, s::ID, &account.iban)?;
            if let Some(name) = &account.account_name {
                write_text(&mut writer, s::ACCOUNT_NAME, name)?;
            }
            if let Some(branch) = &account.bank_branch {
                open(&mut writer, s::FINANCIAL_INSTITUTION_BRANCH)?;
                write_text(&mut writer, s::ID, branch)?;
                close(&mut writer, s::FINANCIAL_INSTITUTION_BRANCH)?;
            }
            close(&mut writer, s::PAYEE_FINANCIAL_ACCOUNT)?;
        }
        close(&mut writer, s::PAYMENT_MEANS)?;
    }

    if let Some(terms) = &document.payment_terms {
        open(&mut writer, s::PAYMENT_TERMS)?;
        write_text(&mut writer, s::NOTE, terms)?;
        close(&mut writer, s::PAYMENT_TERMS)?;
    }

    open(&mut writer, s::TAX_TOTAL)?;
    write_amount(&mut writer, s::TAX_AMOUNT, document.tax_total.tax_amount, currency)?;
    for subtotal in &document.tax_total.subtotals {
        open(&mut writer, s::TAX_SUBTOTAL)?;
        write_amount(&mut writer, s::TAXABLE_AMOUNT, subtotal.taxable_amount, currency)?;
        write_amount(&mut writer, s::TAX_AMOUNT, subtotal.tax_amount, currency)?;
        open(&mut writer, s::TAX_CATEGORY)?;
        write_text(&mut writer, s::ID, subtotal.category.code())?;
        write_text(&mut writer, s::PERCENT, &format_amount(subtotal.rate))?;
        write_tax_scheme(&mut writer)?;
        close(&mut writer, s::TAX_CATEGORY)?;
        close(&mut writer, s::TAX_SUBTOTAL)?;
    }
    close(&mut writer, s::TAX_TOTAL)?;

    let totals = &document.monetary_total;
    open(&mut writer, s::LEGAL_MONETARY_TOTAL)?;
    write_amount(&mut writer, s::LINE_EXTENSION_AMOUNT, totals.line_extension_amount, currency)?;
    write_amount(&mut writer, s::TAX_EXCLUSIVE_AMOUNT, totals.tax_exclusive_amount, currency)?;
    write_amount(&mut writer, s::TAX_INCLUSIVE_AMOUNT, totals.tax_inclusive_amount, currency)?;
    write_amount(&mut writer, s::PAYABLE_AMOUNT, totals.payable_amount, currency)?;
    close(&mut writer, s::LEGAL_MONETARY_TOTAL)?;

    for line in &document.lines {
        write_line(&mut writer, document.kind, line, currency)?;
    }

    writer.write_event(Event::End(BytesEnd::new(root_name)))?;
    Ok(writer.into_inner())
}

fn write_party<W: std::io::Write>(
    writer: &mut Writer<W>,
    wrapper: ElementDef,
    party: &Party,
) -> EngineResult<()> {
    open(writer, wrapper)?;
    open(writer, s::PARTY)?;

    open(writer, s::POSTAL_ADDRESS)?;
    write_text(writer, s::STREET_NAME, &party.address.street)?;
    write_text(writer, s::CITY_NAME, &party.address.city)?;
    if let Some(zone) = &party.address.postal_zone {
        write_text(writer, s::POSTAL_ZONE, zone)?;
    }
    if let Some(county) = &party.address.county {
        write_text(writer, s::COUNTRY_SUBENTITY, county)?;
    }
    open(writer, s::COUNTRY)?;
    write_text(writer, s::IDENTIFICATION_CODE, &party.address.country_code)?;
    close(writer, s::COUNTRY)?;
    close(writer, s::POSTAL_ADDRESS)?;

    if let Some(vat_id) = &party.vat_id {
        open(writer, s::PARTY_TAX_SCHEME)?;
        write_text(writer, s::COMPANY_ID, vat_id)?;
        write_tax_scheme(writer)?;
        close(writer, s::PARTY_TAX_SCHEME)?;
    }

    open(writer, s::PARTY_LEGAL_ENTITY)?;
    write_text(writer, s::REGISTRATION_NAME, &party.registration_name)?;
    if let Some(company_id) = &party.company_id {
        write_text(writer, s::COMPANY_ID, company_id)?;
    }
    close(writer, s::PARTY_LEGAL_ENTITY)?;

    if let Some(contact) = &party.contact {
        open(writer, s::CONTACT)?;
        if let Some(name) = &contact.name {
            write_text(writer, s::CONTACT_NAME, name)?;
        }
        if let Some(phone) = &contact.phone {
            write_text(writer, s::TELEPHONE, phone)?;
        }
        if let Some(email) = &contact.email {
            write_text(writer, s::ELECTRONIC_MAIL, email)?;
        }
        close(writer, s::CONTACT)?;
    }

    close(writer, s::PARTY)?;
    close(writer, wrapper)?;
    Ok(())
}

fn write_line<W: std::io::Write>(
    writer: &mut Writer<W>,
    kind: DocumentKind,
    line: &InvoiceLine,
    currency: &str,
) -> EngineResult<()> {
    let (line_def, quantity_def) = match kind {
        DocumentKind::Invoice => (s::INVOICE_LINE, s::INVOICED_QUANTITY),
        DocumentKind::CreditNote => (s::CREDIT_NOTE_LINE, s::CREDITED_QUANTITY),
    };

    open(writer, line_def)?;
    write_text(writer, s::ID, &line.id)?;

    let qname = quantity_def.qname();
    let mut quantity = BytesStart::new(qname.as_str());
    quantity.push_attribute((s::ATTR_UNIT_CODE, line.unit_code.as_str()));
    writer.write_event(Event::Start(quantity))?;
    writer.write_event(Event::Text(BytesText::new(&format_amount(line.quantity))))?;
    writer.write_event(Event::End(BytesEnd::new(qname.as_str())))?;

    write_amount(writer, s::LINE_EXTENSION_AMOUNT, line.line_total, currency)?;

    open(writer, s::ITEM)?;
    if let Some(description) = &line.description {
        write_text(writer, s::DESCRIPTION, description)?;
    }
    write_text(writer, s::ITEM_NAME, &line.item_name)?;
    open(writer, s::CLASSIFIED_TAX_CATEGORY)?;
    write_text(writer, s::ID, line.tax_category.code())?;
    write_text(writer, s::PERCENT, &format_amount(line.tax_rate))?;
    write_tax_scheme(writer)?;
    close(writer, s::CLASSIFIED_TAX_CATEGORY)?;
    close(writer, s::ITEM)?;

    open(writer, s::PRICE)?;
    write_amount(writer, s::PRICE_AMOUNT, line.unit_price, currency)?;
    close(writer, s::PRICE)?;

    close(writer, line_def)?;
    Ok(())
}

fn write_tax_scheme<W: std::io::Write>(writer: &mut Writer<W>) -> EngineResult<()> {
    open(writer, s::TAX_SCHEME)?;
    write_text(writer, s::ID, s::TAX_SCHEME_VAT)?;
    close(writer, s::TAX_SCHEME)?;
    Ok(())
}

fn open<W: std::io::Write>(writer: &mut Writer<W>, def: ElementDef) -> EngineResult<()> {
    writer.write_event(Event::Start(BytesStart::new(def.qname())))?;
    Ok(())
}

fn close<W: std::io::Write>(writer: &mut Writer<W>, def: ElementDef) -> EngineResult<()> {
    writer.write_event(Event::End(BytesEnd::new(def.qname())))?;
    Ok(())
}

fn write_text<W: std::io::Write>(
    writer: &mut Writer<W>,
    def: ElementDef,
    value: &str,
) -> EngineResult<()> {
    let qname = def.qname();
    writer.write_event(Event::Start(BytesStart::new(qname.as_str())))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(qname.as_str())))?;
    Ok(())
}

/// Monetary element: fixed 2-decimal text plus the `currencyID` attribute.
fn write_amount<W: std::io::Write>(
    writer: &mut Writer<W>,
    def: ElementDef,
    value: Decimal,
    currency: &str,
) -> EngineResult<()> {
    let qname = def.qname();
    let mut start = BytesStart::new(qname.as_str());
    start.push_attribute((s::ATTR_CURRENCY_ID, currency));
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(&format_amount(value))))?;
    writer.write_event(Event::End(BytesEnd::new(qname.as_str())))?;
    Ok(())
}

use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;
use rust_decimal::Decimal;

use crate::core::{EngineError, EngineResult};
use crate::models::{
    money, Contact, DocumentKind, InvoiceDocument, InvoiceLine, MonetaryTotal, Party,
    PayeeFinancialAccount, PaymentMeans, PostalAddress, TaxCategory, TaxSubtotal, TaxTotal,
};

use super::schema::{self as s, ElementDef};

/// Parse namespaced UBL XML back into the document model.
///
/// Inverse of [`super::serialize`]: every element the serializer emits is
/// read back, absent optionals stay `None` (never a zero value), and line
/// VAT, a derived amount with no element of its own, is recomputed from
/// the line net and rate.
pub fn deserialize(bytes: &[u8]) -> EngineResult<InvoiceDocument> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| EngineError::Transport(format!("document is not UTF-8: {e}")))?;
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let kind = loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"Invoice" => break DocumentKind::Invoice,
                b"CreditNote" => break DocumentKind::CreditNote,
                other => {
                    return Err(EngineError::Transport(format!(
                        "unexpected root element {}",
                        String::from_utf8_lossy(other)
                    )))
                }
            },
            Event::Decl(_) | Event::Comment(_) | Event::Text(_) => continue,
            Event::Eof => return Err(EngineError::Transport("empty document".into())),
            _ => continue,
        }
    };

    read_document(&mut reader, kind)
}

#[derive(Default)]
struct DocumentBuilder {
    number: Option<String>,
    issue_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    currency: Option<String>,
    note: Option<String>,
    buyer_reference: Option<String>,
    order_reference: Option<String>,
    contract_reference: Option<String>,
    payment_terms: Option<String>,
    seller: Option<Party>,
    buyer: Option<Party>,
    payment_means: Option<PaymentMeans>,
    tax_total: Option<TaxTotal>,
    monetary_total: Option<MonetaryTotal>,
    lines: Vec<InvoiceLine>,
}

fn read_document(reader: &mut Reader<&[u8]>, kind: DocumentKind) -> EngineResult<InvoiceDocument> {
    let mut b = DocumentBuilder::default();
    let line_def = match kind {
        DocumentKind::Invoice => s::INVOICE_LINE,
        DocumentKind::CreditNote => s::CREDIT_NOTE_LINE,
    };

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::ID.matches(raw) {
                    b.number = Some(read_leaf(reader)?);
                } else if s::ISSUE_DATE.matches(raw) {
                    b.issue_date = Some(read_date(reader)?);
                } else if s::DUE_DATE.matches(raw) {
                    b.due_date = Some(read_date(reader)?);
                } else if s::NOTE.matches(raw) {
                    b.note = Some(read_leaf(reader)?);
                } else if s::DOCUMENT_CURRENCY_CODE.matches(raw) {
                    b.currency = Some(read_leaf(reader)?);
                } else if s::BUYER_REFERENCE.matches(raw) {
                    b.buyer_reference = Some(read_leaf(reader)?);
                } else if s::ORDER_REFERENCE.matches(raw) {
                    b.order_reference = Some(read_wrapped_id(reader, s::ORDER_REFERENCE)?);
                } else if s::CONTRACT_DOCUMENT_REFERENCE.matches(raw) {
                    b.contract_reference =
                        Some(read_wrapped_id(reader, s::CONTRACT_DOCUMENT_REFERENCE)?);
                } else if s::ACCOUNTING_SUPPLIER_PARTY.matches(raw) {
                    b.seller = Some(read_party(reader, s::ACCOUNTING_SUPPLIER_PARTY)?);
                } else if s::ACCOUNTING_CUSTOMER_PARTY.matches(raw) {
                    b.buyer = Some(read_party(reader, s::ACCOUNTING_CUSTOMER_PARTY)?);
                } else if s::PAYMENT_MEANS.matches(raw) {
                    b.payment_means = Some(read_payment_means(reader)?);
                } else if s::PAYMENT_TERMS.matches(raw) {
                    b.payment_terms = read_payment_terms(reader)?;
                } else if s::TAX_TOTAL.matches(raw) {
                    b.tax_total = Some(read_tax_total(reader)?);
                } else if s::LEGAL_MONETARY_TOTAL.matches(raw) {
                    b.monetary_total = Some(read_monetary_total(reader)?);
                } else if line_def.matches(raw) {
                    b.lines.push(read_line(reader, line_def)?);
                } else {
                    // UBLVersionID, CustomizationID, type code, and any
                    // optional element the model does not carry.
                    skip_element(reader, raw)?;
                }
            }
            Event::End(_) => break,
            Event::Eof => {
                return Err(EngineError::Transport("unexpected end of document".into()))
            }
            _ => continue,
        }
    }

    Ok(InvoiceDocument {
        kind,
        number: require(b.number, "cbc:ID")?,
        issue_date: require(b.issue_date, "cbc:IssueDate")?,
        due_date: b.due_date,
        currency: require(b.currency, "cbc:DocumentCurrencyCode")?,
        note: b.note,
        buyer_reference: b.buyer_reference,
        order_reference: b.order_reference,
        contract_reference: b.contract_reference,
        payment_terms: b.payment_terms,
        seller: require(b.seller, "cac:AccountingSupplierParty")?,
        buyer: require(b.buyer, "cac:AccountingCustomerParty")?,
        payment_means: b.payment_means,
        tax_total: require(b.tax_total, "cac:TaxTotal")?,
        monetary_total: require(b.monetary_total, "cac:LegalMonetaryTotal")?,
        lines: b.lines,
    })
}

fn read_party(reader: &mut Reader<&[u8]>, wrapper: ElementDef) -> EngineResult<Party> {
    let mut registration_name = None;
    let mut company_id = None;
    let mut vat_id = None;
    let mut address = None;
    let mut contact = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::PARTY.matches(raw) {
                    continue;
                } else if s::POSTAL_ADDRESS.matches(raw) {
                    address = Some(read_address(reader)?);
                } else if s::PARTY_TAX_SCHEME.matches(raw) {
                    vat_id = Some(read_party_tax_scheme(reader)?);
                } else if s::PARTY_LEGAL_ENTITY.matches(raw) {
                    let (name, id) = read_legal_entity(reader)?;
                    registration_name = Some(name);
                    company_id = id;
                } else if s::CONTACT.matches(raw) {
                    contact = Some(read_contact(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if wrapper.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(wrapper)),
            _ => continue,
        }
    }

    Ok(Party {
        registration_name: require(registration_name, "cbc:RegistrationName")?,
        company_id,
        vat_id,
        address: require(address, "cac:PostalAddress")?,
        contact,
    })
}

fn read_address(reader: &mut Reader<&[u8]>) -> EngineResult<PostalAddress> {
    let mut street = None;
    let mut city = None;
    let mut postal_zone = None;
    let mut county = None;
    let mut country_code = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::STREET_NAME.matches(raw) {
                    street = Some(read_leaf(reader)?);
                } else if s::CITY_NAME.matches(raw) {
                    city = Some(read_leaf(reader)?);
                } else if s::POSTAL_ZONE.matches(raw) {
                    postal_zone = Some(read_leaf(reader)?);
                } else if s::COUNTRY_SUBENTITY.matches(raw) {
                    county = Some(read_leaf(reader)?);
                } else if s::COUNTRY.matches(raw) {
                    continue;
                } else if s::IDENTIFICATION_CODE.matches(raw) {
                    country_code = Some(read_leaf(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::POSTAL_ADDRESS.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::POSTAL_ADDRESS)),
            _ => continue,
        }
    }

    Ok(PostalAddress {
        street: require(street, "cbc:StreetName")?,
        city: require(city, "cbc:CityName")?,
        postal_zone,
        county,
        country_code: require(country_code, "cbc:IdentificationCode")?,
    })
}

/// `cac:PartyTaxScheme`: returns the VAT company identifier.
fn read_party_tax_scheme(reader: &mut Reader<&[u8]>) -> EngineResult<String> {
    let mut company_id = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::COMPANY_ID.matches(raw) {
                    company_id = Some(read_leaf(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::PARTY_TAX_SCHEME.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::PARTY_TAX_SCHEME)),
            _ => continue,
        }
    }
    require(company_id, "cbc:CompanyID")
}

fn read_legal_entity(reader: &mut Reader<&[u8]>) -> EngineResult<(String, Option<String>)> {
    let mut registration_name = None;
    let mut company_id = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::REGISTRATION_NAME.matches(raw) {
                    registration_name = Some(read_leaf(reader)?);
                } else if s::COMPANY_ID.matches(raw) {
                    company_id = Some(read_leaf(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::PARTY_LEGAL_ENTITY.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::PARTY_LEGAL_ENTITY)),
            _ => continue,
        }
    }
    Ok((require(registration_name, "cbc:RegistrationName")?, company_id))
}

fn read_contact(reader: &mut Reader<&[u8]>) -> EngineResult<Contact> {
    let mut contact = Contact {
        name: None,
        phone: None,
        email: None,
    };
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::CONTACT_NAME.matches(raw) {
                    contact.name = Some(read_leaf(reader)?);
                } else if s::TELEPHONE.matches(raw) {
                    contact.phone = Some(read_leaf(reader)?);
                } else if s::ELECTRONIC_MAIL.matches(raw) {
                    contact.email = Some(read_leaf(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::CONTACT.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::CONTACT)),
            _ => continue,
        }
    }
    Ok(contact)
}

fn read_payment_means(reader: &mut Reader<&[u8]>) -> EngineResult<PaymentMeans> {
    let mut code = None;
    let mut account = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::PAYMENT_MEANS_CODE.matches(raw) {
                    code = Some(read_leaf(reader)?);
                } else if s::PAYEE_FINANCIAL_ACCOUNT.matches(raw) {
                    account = Some(read_payee_account(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::PAYMENT_MEANS.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::PAYMENT_MEANS)),
            _ => continue,
        }
    }

    Ok(PaymentMeans {
        code: require(code, "cbc:PaymentMeansCode")?,
        account,
    })
}

fn read_payee_account(reader: &mut Reader<&[u8]>) -> EngineResult<PayeeFinancialAccount> {
    let mut iban = None;
    let mut account_name = None;
    let mut bank_branch = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::ID.matches(raw) {
                    iban = Some(read_leaf(reader)?);
                } else if s::ACCOUNT_NAME.matches(raw) {
                    account_name = Some(read_leaf(reader)?);
                } else if s::FINANCIAL_INSTITUTION_BRANCH.matches(raw) {
                    bank_branch = Some(read_wrapped_id(reader, s::FINANCIAL_INSTITUTION_BRANCH)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::PAYEE_FINANCIAL_ACCOUNT.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::PAYEE_FINANCIAL_ACCOUNT)),
            _ => continue,
        }
    }

    Ok(PayeeFinancialAccount {
        iban: require(iban, "cbc:ID")?,
        account_name,
        bank_branch,
    })
}

fn read_payment_terms(reader: &mut Reader<&[u8]>) -> EngineResult<Option<String>> {
    let mut note = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::NOTE.matches(raw) {
                    note = Some(read_leaf(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::PAYMENT_TERMS.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::PAYMENT_TERMS)),
            _ => continue,
        }
    }
    Ok(note)
}

fn read_tax_total(reader: &mut Reader<&[u8]>) -> EngineResult<TaxTotal> {
    let mut tax_amount = None;
    let mut subtotals = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::TAX_AMOUNT.matches(raw) {
                    tax_amount = Some(read_decimal(reader)?);
                } else if s::TAX_SUBTOTAL.matches(raw) {
                    subtotals.push(read_tax_subtotal(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::TAX_TOTAL.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::TAX_TOTAL)),
            _ => continue,
        }
    }

    Ok(TaxTotal {
        tax_amount: require(tax_amount, "cbc:TaxAmount")?,
        subtotals,
    })
}

fn read_tax_subtotal(reader: &mut Reader<&[u8]>) -> EngineResult<TaxSubtotal> {
    let mut taxable_amount = None;
    let mut tax_amount = None;
    let mut category = None;
    let mut rate = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::TAXABLE_AMOUNT.matches(raw) {
                    taxable_amount = Some(read_decimal(reader)?);
                } else if s::TAX_AMOUNT.matches(raw) {
                    tax_amount = Some(read_decimal(reader)?);
                } else if s::TAX_CATEGORY.matches(raw) {
                    let (cat, percent) = read_tax_category(reader, s::TAX_CATEGORY)?;
                    category = Some(cat);
                    rate = Some(percent);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::TAX_SUBTOTAL.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::TAX_SUBTOTAL)),
            _ => continue,
        }
    }

    Ok(TaxSubtotal {
        taxable_amount: require(taxable_amount, "cbc:TaxableAmount")?,
        tax_amount: require(tax_amount, "cbc:TaxAmount")?,
        category: require(category, "cac:TaxCategory")?,
        rate: require(rate, "cbc:Percent")?,
    })
}

/// `cac:TaxCategory` / `cac:ClassifiedTaxCategory`: category code + percent.
fn read_tax_category(
    reader: &mut Reader<&[u8]>,
    wrapper: ElementDef,
) -> EngineResult<(TaxCategory, Decimal)> {
    let mut category = None;
    let mut percent = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::ID.matches(raw) {
                    let code = read_leaf(reader)?;
                    category = Some(TaxCategory::from_code(&code).ok_or_else(|| {
                        EngineError::Validation(format!("unknown tax category code '{code}'"))
                    })?);
                } else if s::PERCENT.matches(raw) {
                    percent = Some(read_decimal(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if wrapper.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(wrapper)),
            _ => continue,
        }
    }

    Ok((
        require(category, "cbc:ID")?,
        require(percent, "cbc:Percent")?,
    ))
}

fn read_monetary_total(reader: &mut Reader<&[u8]>) -> EngineResult<MonetaryTotal> {
    let mut line_extension = None;
    let mut tax_exclusive = None;
    let mut tax_inclusive = None;
    let mut payable = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::LINE_EXTENSION_AMOUNT.matches(raw) {
                    line_extension = Some(read_decimal(reader)?);
                } else if s::TAX_EXCLUSIVE_AMOUNT.matches(raw) {
                    tax_exclusive = Some(read_decimal(reader)?);
                } else if s::TAX_INCLUSIVE_AMOUNT.matches(raw) {
                    tax_inclusive = Some(read_decimal(reader)?);
                } else if s::PAYABLE_AMOUNT.matches(raw) {
                    payable = Some(read_decimal(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::LEGAL_MONETARY_TOTAL.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::LEGAL_MONETARY_TOTAL)),
            _ => continue,
        }
    }

    Ok(MonetaryTotal {
        line_extension_amount: require(line_extension, "cbc:LineExtensionAmount")?,
        tax_exclusive_amount: require(tax_exclusive, "cbc:TaxExclusiveAmount")?,
        tax_inclusive_amount: require(tax_inclusive, "cbc:TaxInclusiveAmount")?,
        payable_amount: require(payable, "cbc:PayableAmount")?,
    })
}

fn read_line(reader: &mut Reader<&[u8]>, line_def: ElementDef) -> EngineResult<InvoiceLine> {
    let mut id = None;
    let mut quantity = None;
    let mut unit_code = None;
    let mut line_total = None;
    let mut item_name = None;
    let mut description = None;
    let mut tax = None;
    let mut unit_price = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref().to_vec();
                if s::ID.matches(&raw) {
                    id = Some(read_leaf(reader)?);
                } else if s::INVOICED_QUANTITY.matches(&raw) || s::CREDITED_QUANTITY.matches(&raw) {
                    for attr in e.attributes() {
                        let attr = attr
                            .map_err(|err| EngineError::Transport(format!("bad attribute: {err}")))?;
                        if attr.key.as_ref() == s::ATTR_UNIT_CODE.as_bytes() {
                            unit_code = Some(
                                attr.unescape_value()
                                    .map_err(|err| {
                                        EngineError::Transport(format!("bad attribute: {err}"))
                                    })?
                                    .into_owned(),
                            );
                        }
                    }
                    quantity = Some(read_decimal(reader)?);
                } else if s::LINE_EXTENSION_AMOUNT.matches(&raw) {
                    line_total = Some(read_decimal(reader)?);
                } else if s::ITEM.matches(&raw) {
                    let item = read_item(reader)?;
                    description = item.0;
                    item_name = Some(item.1);
                    tax = Some(item.2);
                } else if s::PRICE.matches(&raw) {
                    unit_price = Some(read_price(reader)?);
                } else {
                    skip_element(reader, &raw)?;
                }
            }
            Event::End(e) if line_def.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(line_def)),
            _ => continue,
        }
    }

    let (tax_category, tax_rate) = require(tax, "cac:ClassifiedTaxCategory")?;
    let line_total = require(line_total, "cbc:LineExtensionAmount")?;
    Ok(InvoiceLine {
        id: require(id, "cbc:ID")?,
        item_name: require(item_name, "cbc:Name")?,
        description,
        quantity: require(quantity, "cbc:InvoicedQuantity")?,
        unit_code: require(unit_code, "@unitCode")?,
        unit_price: require(unit_price, "cbc:PriceAmount")?,
        tax_category,
        tax_rate,
        line_total,
        // Derived: no UBL element of its own.
        tax_amount: money(line_total * tax_rate / Decimal::from(100)),
    })
}

/// `cac:Item`: (description, name, (category, rate)).
#[allow(clippy::type_complexity)]
fn read_item(
    reader: &mut Reader<&[u8]>,
) -> EngineResult<(Option<String>, String, (TaxCategory, Decimal))> {
    let mut description = None;
    let mut name_field = None;
    let mut tax = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::DESCRIPTION.matches(raw) {
                    description = Some(read_leaf(reader)?);
                } else if s::ITEM_NAME.matches(raw) {
                    name_field = Some(read_leaf(reader)?);
                } else if s::CLASSIFIED_TAX_CATEGORY.matches(raw) {
                    tax = Some(read_tax_category(reader, s::CLASSIFIED_TAX_CATEGORY)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::ITEM.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::ITEM)),
            _ => continue,
        }
    }

    Ok((
        description,
        require(name_field, "cbc:Name")?,
        require(tax, "cac:ClassifiedTaxCategory")?,
    ))
}

fn read_price(reader: &mut Reader<&[u8]>) -> EngineResult<Decimal> {
    let mut amount = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::PRICE_AMOUNT.matches(raw) {
                    amount = Some(read_decimal(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if s::PRICE.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(s::PRICE)),
            _ => continue,
        }
    }
    require(amount, "cbc:PriceAmount")
}

/// Wrapper element whose only payload is a `cbc:ID` child.
fn read_wrapped_id(reader: &mut Reader<&[u8]>, wrapper: ElementDef) -> EngineResult<String> {
    let mut id = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                let raw = name.as_ref();
                if s::ID.matches(raw) {
                    id = Some(read_leaf(reader)?);
                } else {
                    skip_element(reader, raw)?;
                }
            }
            Event::End(e) if wrapper.matches(e.name().as_ref()) => break,
            Event::End(_) => continue,
            Event::Eof => return Err(unexpected_eof(wrapper)),
            _ => continue,
        }
    }
    require(id, "cbc:ID")
}

/// Text content of the current leaf element, consuming its end tag.
fn read_leaf(reader: &mut Reader<&[u8]>) -> EngineResult<String> {
    let mut value = String::new();
    loop {
        match reader.read_event()? {
            Event::Text(t) => {
                value.push_str(
                    &t.unescape()
                        .map_err(|e| EngineError::Transport(format!("bad text: {e}")))?,
                );
            }
            Event::End(_) => return Ok(value),
            Event::Eof => {
                return Err(EngineError::Transport("unexpected end of document".into()))
            }
            _ => continue,
        }
    }
}

fn read_decimal(reader: &mut Reader<&[u8]>) -> EngineResult<Decimal> {
    let text = read_leaf(reader)?;
    text.parse::<Decimal>()
        .map_err(|e| EngineError::Validation(format!("invalid decimal '{text}': {e}")))
}

fn read_date(reader: &mut Reader<&[u8]>) -> EngineResult<NaiveDate> {
    let text = read_leaf(reader)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d")
        .map_err(|e| EngineError::Validation(format!("invalid date '{text}': {e}")))
}

/// Consume everything up to the end tag of the named element.
fn skip_element(reader: &mut Reader<&[u8]>, name: &[u8]) -> EngineResult<()> {
    let mut depth = 1u32;
    let name = name.to_vec();
    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == name.as_slice() => depth += 1,
            Event::Start(_) => {}
            Event::End(e) if e.name().as_ref() == name.as_slice() => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::End(_) => {}
            Event::Eof => {
                return Err(EngineError::Transport("unexpected end of document".into()))
            }
            _ => continue,
        }
    }
}

fn require<T>(value: Option<T>, element: &str) -> EngineResult<T> {
    value.ok_or_else(|| EngineError::Validation(format!("missing required element {element}")))
}

fn unexpected_eof(def: ElementDef) -> EngineError {
    EngineError::Transport(format!("unexpected end of document inside {}", def.qname()))
}

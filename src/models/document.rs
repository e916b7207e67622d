use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{EngineError, EngineResult};

/// Round to the fixed 2-decimal precision every monetary value carries.
pub fn money(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Format a monetary value exactly as it goes on the wire: always two
/// decimals, never scientific notation.
pub fn format_amount(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

/// Document kind: controls the UBL root element and the type-code element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    CreditNote,
}

impl DocumentKind {
    /// UNTDID 1001 type code: 380 commercial invoice, 381 credit note.
    pub fn type_code(&self) -> &'static str {
        match self {
            DocumentKind::Invoice => "380",
            DocumentKind::CreditNote => "381",
        }
    }
}

/// UNTDID 5305 tax category codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaxCategory {
    /// S: standard rate.
    StandardRate,
    /// Z: zero rated.
    ZeroRated,
    /// E: exempt from tax.
    Exempt,
    /// AE: reverse charge.
    ReverseCharge,
    /// O: not subject to VAT.
    NotSubjectToVat,
}

impl TaxCategory {
    pub fn code(&self) -> &'static str {
        match self {
            TaxCategory::StandardRate => "S",
            TaxCategory::ZeroRated => "Z",
            TaxCategory::Exempt => "E",
            TaxCategory::ReverseCharge => "AE",
            TaxCategory::NotSubjectToVat => "O",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "S" => Some(TaxCategory::StandardRate),
            "Z" => Some(TaxCategory::ZeroRated),
            "E" => Some(TaxCategory::Exempt),
            "AE" => Some(TaxCategory::ReverseCharge),
            "O" => Some(TaxCategory::NotSubjectToVat),
            _ => None,
        }
    }
}

/// BG-5/BG-8: postal address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: String,
    pub city: String,
    pub postal_zone: Option<String>,
    /// Country subdivision (county / Bundesland).
    pub county: Option<String>,
    /// ISO 3166-1 alpha-2.
    pub country_code: String,
}

/// BG-6/BG-9: contact point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// BG-4/BG-7: seller or buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    /// BT-27/BT-44: legal registration name.
    pub registration_name: String,
    /// Legal registration identifier (e.g. trade-registry number, CIF).
    pub company_id: Option<String>,
    /// VAT identifier under the VAT tax scheme (e.g. "RO12345678").
    pub vat_id: Option<String>,
    pub address: PostalAddress,
    pub contact: Option<Contact>,
}

/// BG-25: one invoice line. Net amount and VAT are computed, not supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// Line identifier; position in the document is part of the payload
    /// contract, so lines keep their original order.
    pub id: String,
    pub item_name: String,
    pub description: Option<String>,
    pub quantity: Decimal,
    /// UNECE Rec 20 unit (e.g. "C62" piece, "HUR" hour).
    pub unit_code: String,
    pub unit_price: Decimal,
    pub tax_category: TaxCategory,
    /// Percentage, e.g. 21 for 21%.
    pub tax_rate: Decimal,
    /// BT-131: line net amount = quantity × unit price, 2-decimal.
    pub line_total: Decimal,
    /// VAT on this line at `tax_rate`, 2-decimal.
    pub tax_amount: Decimal,
}

impl InvoiceLine {
    /// Build a line with VAT-exclusive pricing, computing the net and VAT
    /// amounts at fixed 2-decimal precision.
    pub fn compute(
        id: impl Into<String>,
        item_name: impl Into<String>,
        quantity: Decimal,
        unit_code: impl Into<String>,
        unit_price: Decimal,
        tax_category: TaxCategory,
        tax_rate: Decimal,
    ) -> Self {
        let line_total = money(quantity * unit_price);
        let tax_amount = money(line_total * tax_rate / Decimal::from(100));
        InvoiceLine {
            id: id.into(),
            item_name: item_name.into(),
            description: None,
            quantity,
            unit_code: unit_code.into(),
            unit_price,
            tax_category,
            tax_rate,
            line_total,
            tax_amount,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// BG-23: one subtotal per distinct (category, rate) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxSubtotal {
    pub taxable_amount: Decimal,
    pub tax_amount: Decimal,
    pub category: TaxCategory,
    pub rate: Decimal,
}

/// BG-22: aggregate VAT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxTotal {
    pub tax_amount: Decimal,
    pub subtotals: Vec<TaxSubtotal>,
}

impl TaxTotal {
    /// Aggregate lines into per-(category, rate) subtotals, preserving first
    /// appearance order.
    pub fn from_lines(lines: &[InvoiceLine]) -> Self {
        let mut subtotals: Vec<TaxSubtotal> = Vec::new();
        for line in lines {
            match subtotals
                .iter_mut()
                .find(|s| s.category == line.tax_category && s.rate == line.tax_rate)
            {
                Some(subtotal) => {
                    subtotal.taxable_amount = money(subtotal.taxable_amount + line.line_total);
                    subtotal.tax_amount = money(subtotal.tax_amount + line.tax_amount);
                }
                None => subtotals.push(TaxSubtotal {
                    taxable_amount: line.line_total,
                    tax_amount: line.tax_amount,
                    category: line.tax_category,
                    rate: line.tax_rate,
                }),
            }
        }
        let tax_amount = money(subtotals.iter().map(|s| s.tax_amount).sum());
        TaxTotal {
            tax_amount,
            subtotals,
        }
    }
}

/// BG-22: document totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonetaryTotal {
    /// Sum of line net amounts.
    pub line_extension_amount: Decimal,
    pub tax_exclusive_amount: Decimal,
    pub tax_inclusive_amount: Decimal,
    pub payable_amount: Decimal,
}

impl MonetaryTotal {
    pub fn from_lines(lines: &[InvoiceLine], tax_total: &TaxTotal) -> Self {
        let line_extension = money(lines.iter().map(|l| l.line_total).sum());
        let tax_inclusive = money(line_extension + tax_total.tax_amount);
        MonetaryTotal {
            line_extension_amount: line_extension,
            tax_exclusive_amount: line_extension,
            tax_inclusive_amount: tax_inclusive,
            payable_amount: tax_inclusive,
        }
    }
}

/// BG-17: payee account for credit-transfer payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayeeFinancialAccount {
    /// IBAN.
    pub iban: String,
    pub account_name: Option<String>,
    pub bank_branch: Option<String>,
}

/// BG-16: payment instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMeans {
    /// UNTDID 4461 means code, e.g. "30" credit transfer, "42" bank account.
    pub code: String,
    pub account: Option<PayeeFinancialAccount>,
}

/// In-memory e-invoice document, built at submission time and mapped 1:1
/// onto the namespaced UBL wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDocument {
    pub kind: DocumentKind,
    /// BT-1: document number.
    pub number: String,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    /// ISO 4217 currency, also the `currencyID` on every amount.
    pub currency: String,
    pub note: Option<String>,
    pub buyer_reference: Option<String>,
    pub order_reference: Option<String>,
    pub contract_reference: Option<String>,
    pub payment_terms: Option<String>,
    pub seller: Party,
    pub buyer: Party,
    pub payment_means: Option<PaymentMeans>,
    pub tax_total: TaxTotal,
    pub monetary_total: MonetaryTotal,
    pub lines: Vec<InvoiceLine>,
}

impl InvoiceDocument {
    /// Assert every required composite is present and the tax arithmetic
    /// holds. Runs before serialization so malformed XML is never emitted.
    pub fn validate(&self) -> EngineResult<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.number.trim().is_empty() {
            errors.push("document number is required".into());
        }
        if self.currency.len() != 3 {
            errors.push(format!("invalid currency code '{}'", self.currency));
        }
        if self.seller.registration_name.trim().is_empty() {
            errors.push("seller registration name is required".into());
        }
        if self.buyer.registration_name.trim().is_empty() {
            errors.push("buyer registration name is required".into());
        }
        if self.lines.is_empty() {
            errors.push("at least one invoice line is required".into());
        }

        // Per-category taxable base must equal the sum of line nets.
        for subtotal in &self.tax_total.subtotals {
            let base: Decimal = self
                .lines
                .iter()
                .filter(|l| l.tax_category == subtotal.category && l.tax_rate == subtotal.rate)
                .map(|l| l.line_total)
                .sum();
            if money(base) != money(subtotal.taxable_amount) {
                errors.push(format!(
                    "taxable base mismatch for category {} rate {}: lines sum to {}, subtotal says {}",
                    subtotal.category.code(),
                    subtotal.rate,
                    format_amount(base),
                    format_amount(subtotal.taxable_amount),
                ));
            }
        }

        let subtotal_sum: Decimal = self.tax_total.subtotals.iter().map(|s| s.tax_amount).sum();
        if money(subtotal_sum) != money(self.tax_total.tax_amount) {
            errors.push(format!(
                "tax total {} does not match subtotal sum {}",
                format_amount(self.tax_total.tax_amount),
                format_amount(subtotal_sum),
            ));
        }

        let line_sum: Decimal = self.lines.iter().map(|l| l.line_total).sum();
        if money(line_sum) != money(self.monetary_total.line_extension_amount) {
            errors.push(format!(
                "line extension amount {} does not match line sum {}",
                format_amount(self.monetary_total.line_extension_amount),
                format_amount(line_sum),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Validation(errors.join("; ")))
        }
    }
}

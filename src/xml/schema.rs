//! The UBL namespace table.
//!
//! Every element the serializer emits is declared here with its namespace
//! prefix. External validators check namespace-qualified names, so this
//! table, not the writer code, is the wire contract; serializer and
//! deserializer both consume it.

/// Root namespace for invoice documents.
pub const NS_INVOICE: &str = "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
/// Root namespace for credit notes.
pub const NS_CREDIT_NOTE: &str = "urn:oasis:names:specification:ubl:schema:xsd:CreditNote-2";
/// Aggregate components ("cac").
pub const NS_CAC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
/// Basic components ("cbc").
pub const NS_CBC: &str = "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";

pub const UBL_VERSION: &str = "2.1";
pub const CUSTOMIZATION_ID: &str = "urn:cen.eu:en16931:2017";
/// All parties are taxed under the VAT scheme.
pub const TAX_SCHEME_VAT: &str = "VAT";

/// Namespace prefix of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ns {
    Cbc,
    Cac,
}

impl Ns {
    pub fn prefix(&self) -> &'static str {
        match self {
            Ns::Cbc => "cbc",
            Ns::Cac => "cac",
        }
    }
}

/// One entry of the per-field element table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementDef {
    pub ns: Ns,
    pub local: &'static str,
}

impl ElementDef {
    pub const fn cbc(local: &'static str) -> Self {
        ElementDef { ns: Ns::Cbc, local }
    }

    pub const fn cac(local: &'static str) -> Self {
        ElementDef { ns: Ns::Cac, local }
    }

    /// Prefixed name as written on the wire, e.g. `cbc:IssueDate`.
    pub fn qname(&self) -> String {
        format!("{}:{}", self.ns.prefix(), self.local)
    }

    pub fn matches(&self, raw_name: &[u8]) -> bool {
        let prefix = self.ns.prefix().as_bytes();
        raw_name.len() == prefix.len() + 1 + self.local.len()
            && &raw_name[..prefix.len()] == prefix
            && raw_name[prefix.len()] == b':'
            && &raw_name[prefix.len() + 1..] == self.local.as_bytes()
    }
}

// Document header.
pub const UBL_VERSION_ID: ElementDef = ElementDef::cbc("UBLVersionID");
pub const CUSTOMIZATION: ElementDef = ElementDef::cbc("CustomizationID");
pub const ID: ElementDef = ElementDef::cbc("ID");
pub const ISSUE_DATE: ElementDef = ElementDef::cbc("IssueDate");
pub const DUE_DATE: ElementDef = ElementDef::cbc("DueDate");
pub const INVOICE_TYPE_CODE: ElementDef = ElementDef::cbc("InvoiceTypeCode");
pub const CREDIT_NOTE_TYPE_CODE: ElementDef = ElementDef::cbc("CreditNoteTypeCode");
pub const NOTE: ElementDef = ElementDef::cbc("Note");
pub const DOCUMENT_CURRENCY_CODE: ElementDef = ElementDef::cbc("DocumentCurrencyCode");
pub const BUYER_REFERENCE: ElementDef = ElementDef::cbc("BuyerReference");

// Document references.
pub const ORDER_REFERENCE: ElementDef = ElementDef::cac("OrderReference");
pub const CONTRACT_DOCUMENT_REFERENCE: ElementDef = ElementDef::cac("ContractDocumentReference");

// Parties.
pub const ACCOUNTING_SUPPLIER_PARTY: ElementDef = ElementDef::cac("AccountingSupplierParty");
pub const ACCOUNTING_CUSTOMER_PARTY: ElementDef = ElementDef::cac("AccountingCustomerParty");
pub const PARTY: ElementDef = ElementDef::cac("Party");
pub const POSTAL_ADDRESS: ElementDef = ElementDef::cac("PostalAddress");
pub const STREET_NAME: ElementDef = ElementDef::cbc("StreetName");
pub const CITY_NAME: ElementDef = ElementDef::cbc("CityName");
pub const POSTAL_ZONE: ElementDef = ElementDef::cbc("PostalZone");
pub const COUNTRY_SUBENTITY: ElementDef = ElementDef::cbc("CountrySubentity");
pub const COUNTRY: ElementDef = ElementDef::cac("Country");
pub const IDENTIFICATION_CODE: ElementDef = ElementDef::cbc("IdentificationCode");
pub const PARTY_TAX_SCHEME: ElementDef = ElementDef::cac("PartyTaxScheme");
pub const COMPANY_ID: ElementDef = ElementDef::cbc("CompanyID");
pub const TAX_SCHEME: ElementDef = ElementDef::cac("TaxScheme");
pub const PARTY_LEGAL_ENTITY: ElementDef = ElementDef::cac("PartyLegalEntity");
pub const REGISTRATION_NAME: ElementDef = ElementDef::cbc("RegistrationName");
pub const CONTACT: ElementDef = ElementDef::cac("Contact");
pub const CONTACT_NAME: ElementDef = ElementDef::cbc("Name");
pub const TELEPHONE: ElementDef = ElementDef::cbc("Telephone");
pub const ELECTRONIC_MAIL: ElementDef = ElementDef::cbc("ElectronicMail");

// Payment.
pub const PAYMENT_MEANS: ElementDef = ElementDef::cac("PaymentMeans");
pub const PAYMENT_MEANS_CODE: ElementDef = ElementDef::cbc("PaymentMeansCode");
pub const PAYEE_FINANCIAL_ACCOUNT: ElementDef = ElementDef::cac("PayeeFinancialAccount");
pub const ACCOUNT_NAME: ElementDef = ElementDef::cbc("Name");
pub const FINANCIAL_INSTITUTION_BRANCH: ElementDef = ElementDef::cac("FinancialInstitutionBranch");
pub const PAYMENT_TERMS: ElementDef = ElementDef::cac("PaymentTerms");

// Tax.
pub const TAX_TOTAL: ElementDef = ElementDef::cac("TaxTotal");
pub const TAX_AMOUNT: ElementDef = ElementDef::cbc("TaxAmount");
pub const TAX_SUBTOTAL: ElementDef = ElementDef::cac("TaxSubtotal");
pub const TAXABLE_AMOUNT: ElementDef = ElementDef::cbc("TaxableAmount");
pub const TAX_CATEGORY: ElementDef = ElementDef::cac("TaxCategory");
pub const PERCENT: ElementDef = ElementDef::cbc("Percent");

// Totals.
pub const LEGAL_MONETARY_TOTAL: ElementDef = ElementDef::cac("LegalMonetaryTotal");
pub const LINE_EXTENSION_AMOUNT: ElementDef = ElementDef::cbc("LineExtensionAmount");
pub const TAX_EXCLUSIVE_AMOUNT: ElementDef = ElementDef::cbc("TaxExclusiveAmount");
pub const TAX_INCLUSIVE_AMOUNT: ElementDef = ElementDef::cbc("TaxInclusiveAmount");
pub const PAYABLE_AMOUNT: ElementDef = ElementDef::cbc("PayableAmount");

// Lines.
pub const INVOICE_LINE: ElementDef = ElementDef::cac("InvoiceLine");
pub const CREDIT_NOTE_LINE: ElementDef = ElementDef::cac("CreditNoteLine");
pub const INVOICED_QUANTITY: ElementDef = ElementDef::cbc("InvoicedQuantity");
pub const CREDITED_QUANTITY: ElementDef = ElementDef::cbc("CreditedQuantity");
pub const ITEM: ElementDef = ElementDef::cac("Item");
pub const DESCRIPTION: ElementDef = ElementDef::cbc("Description");
pub const ITEM_NAME: ElementDef = ElementDef::cbc("Name");
pub const CLASSIFIED_TAX_CATEGORY: ElementDef = ElementDef::cac("ClassifiedTaxCategory");
pub const PRICE: ElementDef = ElementDef::cac("Price");
pub const PRICE_AMOUNT: ElementDef = ElementDef::cbc("PriceAmount");

// Attributes.
pub const ATTR_CURRENCY_ID: &str = "currencyID";
pub const ATTR_UNIT_CODE: &str = "unitCode";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qname_carries_the_declared_prefix() {
        assert_eq!(ISSUE_DATE.qname(), "cbc:IssueDate");
        assert_eq!(TAX_TOTAL.qname(), "cac:TaxTotal");
    }

    #[test]
    fn matches_compares_full_prefixed_name() {
        assert!(ID.matches(b"cbc:ID"));
        assert!(!ID.matches(b"cac:ID"));
        assert!(!ID.matches(b"cbc:IDx"));
    }
}

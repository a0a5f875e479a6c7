//! Built-in schemas for the commonly used ledger entities.

use unirest_core::ValueType::{self, Boolean, Date, DateTime, Decimal, Enum, Integer, String};

use crate::schema::{EntitySchema, SchemaRegistry};

const DEBTOR_CREDITOR: &[(&str, ValueType)] = &[
    ("Account", String),
    ("Name", String),
    ("Address1", String),
    ("Address2", String),
    ("ZipCode", String),
    ("City", String),
    ("Country", Enum),
    ("Currency", Enum),
    ("Group", String),
    ("Email", String),
    ("Phone", String),
    ("VatNumber", String),
    ("Payment", String),
    ("PriceList", String),
    ("LayoutGroup", String),
    ("Employee", String),
    ("EndDiscountPct", Decimal),
    ("Blocked", Boolean),
    ("Dim1", String),
    ("Dim2", String),
    ("Dim3", String),
    ("Dim4", String),
    ("Dim5", String),
];

const ORDER: &[(&str, ValueType)] = &[
    ("OrderNumber", Integer),
    ("Account", String),
    ("DCAccount", String),
    ("DeliveryName", String),
    ("DeliveryAddress1", String),
    ("DeliveryCity", String),
    ("Currency", Enum),
    ("EndDiscountPct", Decimal),
    ("Employee", String),
    ("YourRef", String),
    ("OurRef", String),
    ("Date", Date),
    ("DeliveryDate", Date),
    ("Total", Decimal),
    ("Created", DateTime),
    ("Dim1", String),
    ("Dim2", String),
];

const ORDER_LINE: &[(&str, ValueType)] = &[
    ("OrderNumber", Integer),
    ("LineNumber", Decimal),
    ("Item", String),
    ("Text", String),
    ("Qty", Decimal),
    ("Price", Decimal),
    ("DiscountPct", Decimal),
    ("Total", Decimal),
    ("Warehouse", String),
    ("Unit", Enum),
];

const TRANSACTION: &[(&str, ValueType)] = &[
    ("Account", String),
    ("Date", Date),
    ("Voucher", Integer),
    ("Invoice", Integer),
    ("Text", String),
    ("Amount", Decimal),
    ("AmountCur", Decimal),
    ("Currency", Enum),
];

const INV_ITEM: &[(&str, ValueType)] = &[
    ("Item", String),
    ("Name", String),
    ("Group", String),
    ("ItemType", Enum),
    ("SalesPrice1", Decimal),
    ("CostPrice", Decimal),
    ("Qty", Decimal),
    ("Blocked", Boolean),
    ("EAN", String),
];

const GL_ACCOUNT: &[(&str, ValueType)] = &[
    ("Account", String),
    ("Name", String),
    ("AccountType", Enum),
    ("Vat", String),
    ("Blocked", Boolean),
];

const INVOICE: &[(&str, ValueType)] = &[
    ("InvoiceNumber", Integer),
    ("OrderNumber", Integer),
    ("Account", String),
    ("Date", Date),
    ("Total", Decimal),
    ("Currency", Enum),
];

const JOURNAL: &[(&str, ValueType)] = &[("Journal", String), ("Name", String)];

const JOURNAL_LINE: &[(&str, ValueType)] = &[
    ("Journal", String),
    ("Date", Date),
    ("Item", String),
    ("Text", String),
    ("Qty", Decimal),
    ("Voucher", Integer),
    ("Amount", Decimal),
];

const CATALOGUE: &[(&str, &[(&str, ValueType)])] = &[
    ("Debtor", DEBTOR_CREDITOR),
    ("Creditor", DEBTOR_CREDITOR),
    ("DebtorOrder", ORDER),
    ("CreditorOrder", ORDER),
    ("DebtorOrderLine", ORDER_LINE),
    ("CreditorOrderLine", ORDER_LINE),
    ("DebtorTrans", TRANSACTION),
    ("CreditorTrans", TRANSACTION),
    ("GLTrans", TRANSACTION),
    ("DebtorInvoice", INVOICE),
    ("CreditorInvoice", INVOICE),
    ("InvItem", INV_ITEM),
    ("GLAccount", GL_ACCOUNT),
    ("InvJournal", JOURNAL),
    ("InvJournalLine", JOURNAL_LINE),
    ("GLDailyJournal", JOURNAL),
    ("GLDailyJournalLine", JOURNAL_LINE),
];

impl SchemaRegistry {
    /// Registry pre-populated with the built-in entity catalogue.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (name, props) in CATALOGUE {
            let mut builder = EntitySchema::builder(*name).property("RowId", Integer);
            for (prop, ty) in *props {
                builder = builder.property(prop, *ty);
            }
            registry.register(builder.build());
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unirest_core::FieldKind;

    #[test]
    fn builtin_catalogue_is_complete() {
        let registry = SchemaRegistry::builtin();
        assert_eq!(registry.len(), CATALOGUE.len());

        let order = registry.get("debtororder").unwrap();
        assert_eq!(order.name(), "DebtorOrder");
        assert_eq!(
            order.resolve("OrderNumber").unwrap().value_type,
            ValueType::Integer
        );
        assert_eq!(order.resolve("_RowId").unwrap().kind, FieldKind::Field);
    }
}

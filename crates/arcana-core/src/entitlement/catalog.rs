//! Product catalog.
//!
//! Subscriptions toggle the premium flag and never touch the balance;
//! consumables credit a fixed karma amount and never touch the flag.

/// How a purchased product maps onto local entitlements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    /// Recurring premium subscription.
    Subscription,
    /// One-shot karma pack crediting a fixed amount.
    Consumable { credit: i64 },
}

const SUBSCRIPTION_PRODUCT_IDS: [&str; 3] = [
    "com.arcana.premium.weekly",
    "com.arcana.premium.monthly",
    "com.arcana.premium.yearly",
];

const CONSUMABLE_PRODUCTS: [(&str, i64); 4] = [
    ("com.arcana.karma.50", 50),
    ("com.arcana.karma.100", 100),
    ("com.arcana.karma.250", 250),
    ("com.arcana.karma.500", 500),
];

impl ProductKind {
    /// Classifies a product id against the catalog.
    ///
    /// Returns `None` for ids we do not sell; the reconciler drops such
    /// events rather than guessing a credit amount.
    pub fn classify(product_id: &str) -> Option<Self> {
        if SUBSCRIPTION_PRODUCT_IDS.contains(&product_id) {
            return Some(Self::Subscription);
        }
        CONSUMABLE_PRODUCTS
            .iter()
            .find(|(id, _)| *id == product_id)
            .map(|(_, credit)| Self::Consumable { credit: *credit })
    }
}

/// Fixed credit amount for a consumable product id, if it is one.
pub fn consumable_credit_for(product_id: &str) -> Option<i64> {
    match ProductKind::classify(product_id)? {
        ProductKind::Consumable { credit } => Some(credit),
        ProductKind::Subscription => None,
    }
}

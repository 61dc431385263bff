// src/core/classify.rs
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Trade,
    Fee,
    Tax,
    Dividend,
    Coupon,
    Deposit,
    Withdrawal,
    Other,
}

/// Keyword rules in precedence order. First rule with a matching keyword wins.
const RULES: &[(&[&str], Category)] = &[
    (&["BUY", "SELL"], Category::Trade),
    (&["FEE", "COMMISSION", "SERVICE"], Category::Fee),
    (&["TAX"], Category::Tax),
    (&["DIVIDEND"], Category::Dividend),
    (&["COUPON"], Category::Coupon),
    (&["INPUT", "DEPOSIT"], Category::Deposit),
    (&["WITHDRAW", "OUTPUT"], Category::Withdrawal),
];

/// Maps a broker operation-type label onto a category.
/// Case-insensitive substring match; unknown labels are `Other`.
pub fn classify(type_label: &str) -> Category {
    let label = type_label.to_uppercase();
    RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| label.contains(k)))
        .map(|(_, category)| *category)
        .unwrap_or(Category::Other)
}

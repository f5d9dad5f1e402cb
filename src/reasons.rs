//! Explanation generation: converts per-row feature contributions into up to
//! three ranked, human-readable churn reasons.
//!
//! Candidate selection depends on the risk band; phrasing depends on each
//! feature's own contribution sign and business direction. The bias term is
//! never a candidate.

use crate::model::engine::RowContributions;
use crate::types::score::RiskBand;
use tracing::warn;

/// Number of reason slots on every scored record.
pub const REASON_COUNT: usize = 3;

/// Features where a high value indicates an engaged customer.
const HIGH_IS_GOOD: [&str; 32] = [
    "Orders_CY",
    "Orders_PY",
    "Orders_Lifetime",
    "Spend_CY",
    "Spend_PY",
    "Spend_Lifetime",
    "Units_CY",
    "Units_PY",
    "Units_Lifetime",
    "AOV_CY",
    "TenureDays",
    "Spend_Trend",
    "Orders_Trend",
    "Units_Trend",
    "Uniforms_Units_CY",
    "Uniforms_Spend_CY",
    "Uniforms_Orders_CY",
    "Sparring_Units_CY",
    "Sparring_Spend_CY",
    "Sparring_Orders_CY",
    "Belts_Units_CY",
    "Belts_Spend_CY",
    "Belts_Orders_CY",
    "Bags_Units_CY",
    "Bags_Spend_CY",
    "Bags_Orders_CY",
    "Customs_Units_CY",
    "Customs_Spend_CY",
    "Customs_Orders_CY",
    "CUBS_Categories_Active_CY",
    "CUBS_Categories_Active_PY",
    "CUBS_Categories_Ever",
];

/// Features where a high value indicates disengagement.
const HIGH_IS_BAD: [&str; 6] = [
    "DaysSinceLast",
    "Uniforms_DaysSinceLast",
    "Sparring_DaysSinceLast",
    "Belts_DaysSinceLast",
    "Bags_DaysSinceLast",
    "Customs_DaysSinceLast",
];

/// Base phrase for a feature, without polarity qualifier.
fn feature_phrase(name: &str) -> String {
    if let Some(segment) = name.strip_prefix("Segment_") {
        return format!("Customer segment is {segment}");
    }
    if let Some(cost_center) = name.strip_prefix("CostCenter_") {
        return format!("Cost center is {cost_center}");
    }

    let mapped = match name {
        "Orders_CY" => "order count (current year)",
        "Orders_PY" => "order count (prior year)",
        "Orders_Lifetime" => "lifetime order count",
        "Spend_CY" => "spend (current year)",
        "Spend_PY" => "spend (prior year)",
        "Spend_Lifetime" => "lifetime spend",
        "Units_CY" => "units purchased (current year)",
        "Units_PY" => "units purchased (prior year)",
        "Units_Lifetime" => "lifetime units",
        "AOV_CY" => "average order value",
        "DaysSinceLast" => "days since last order",
        "TenureDays" => "customer tenure (days)",
        "Spend_Trend" => "spend trend (current vs prior year)",
        "Orders_Trend" => "order trend (current vs prior year)",
        "Units_Trend" => "unit trend (current vs prior year)",
        "Uniforms_Units_CY" => "uniforms units (current year)",
        "Uniforms_Spend_CY" => "uniforms spend (current year)",
        "Uniforms_Orders_CY" => "uniforms orders (current year)",
        "Uniforms_Pct_of_Total_CY" => "uniforms % of total spend",
        "Uniforms_DaysSinceLast" => "days since last uniforms order",
        "Sparring_Units_CY" => "sparring units (current year)",
        "Sparring_Spend_CY" => "sparring spend (current year)",
        "Sparring_Orders_CY" => "sparring orders (current year)",
        "Sparring_Pct_of_Total_CY" => "sparring % of total spend",
        "Sparring_DaysSinceLast" => "days since last sparring order",
        "Belts_Units_CY" => "belts units (current year)",
        "Belts_Spend_CY" => "belts spend (current year)",
        "Belts_Orders_CY" => "belts orders (current year)",
        "Belts_Pct_of_Total_CY" => "belts % of total spend",
        "Belts_DaysSinceLast" => "days since last belts order",
        "Bags_Units_CY" => "bags units (current year)",
        "Bags_Spend_CY" => "bags spend (current year)",
        "Bags_Orders_CY" => "bags orders (current year)",
        "Bags_Pct_of_Total_CY" => "bags % of total spend",
        "Bags_DaysSinceLast" => "days since last bags order",
        "Customs_Units_CY" => "customs units (current year)",
        "Customs_Spend_CY" => "customs spend (current year)",
        "Customs_Orders_CY" => "customs orders (current year)",
        "Customs_Pct_of_Total_CY" => "customs % of total spend",
        "Customs_DaysSinceLast" => "days since last customs order",
        "CUBS_Categories_Active_CY" => "product categories active (current year)",
        "CUBS_Categories_Active_PY" => "product categories active (prior year)",
        "CUBS_Categories_Ever" => "product categories ever purchased",
        "CUBS_Categories_Trend" => "product category trend",
        _ => {
            warn!(feature = name, "No phrase mapping for feature; using templated fallback");
            return name.replace('_', " ");
        }
    };
    mapped.to_string()
}

/// Phrase one selected feature. The High/Low qualifier follows the sign of
/// this feature's own contribution (did it push risk up or down), combined
/// with the feature's business direction. Categorical indicators name the
/// category and need no qualifier.
fn reason_text(feature: &str, contribution: f64) -> String {
    let base = feature_phrase(feature);

    if feature.starts_with("Segment_") || feature.starts_with("CostCenter_") {
        return base;
    }

    let pushes_risk_up = contribution > 0.0;
    let high_is_good = HIGH_IS_GOOD.contains(&feature);
    let high_is_bad = HIGH_IS_BAD.contains(&feature);

    if pushes_risk_up {
        if high_is_good {
            format!("Low {base}")
        } else if high_is_bad {
            format!("High {base}")
        } else {
            format!("Unfavorable {base}")
        }
    } else if high_is_good {
        format!("High {base}")
    } else if high_is_bad {
        format!("Low {base}")
    } else {
        format!("Favorable {base}")
    }
}

/// Select and phrase the top reasons for one row. Returns exactly
/// [`REASON_COUNT`] slots, padding with empty strings when fewer candidates
/// exist. Zero contributions are never candidates; the bias term is excluded
/// by construction (it is not part of `contributions.values`).
pub fn top_reasons(
    columns: &[String],
    contributions: &RowContributions,
    probability: f64,
) -> [String; REASON_COUNT] {
    let band = RiskBand::from_probability(probability);

    let mut positive: Vec<(usize, f64)> = Vec::new();
    let mut negative: Vec<(usize, f64)> = Vec::new();
    for (idx, &value) in contributions.values.iter().enumerate() {
        if value > 0.0 {
            positive.push((idx, value));
        } else if value < 0.0 {
            negative.push((idx, value));
        }
    }
    // Descending for drivers, ascending for protectors. Ties keep column order.
    positive.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    negative.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let selected: Vec<(usize, f64)> = match band {
        RiskBand::High => positive.into_iter().take(REASON_COUNT).collect(),
        RiskBand::Low => negative.into_iter().take(REASON_COUNT).collect(),
        RiskBand::Medium => positive
            .into_iter()
            .take(2)
            .chain(negative.into_iter().take(1))
            .take(REASON_COUNT)
            .collect(),
    };

    let mut reasons = [const { String::new() }; REASON_COUNT];
    for (slot, (idx, value)) in selected.into_iter().enumerate() {
        reasons[slot] = reason_text(&columns[idx], value);
    }
    reasons
}

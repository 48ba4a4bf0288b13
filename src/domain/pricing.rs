//! Pricing business rules: per-service price adjustments, comparative quotes
//! and crew estimates.

use serde::Serialize;
use std::collections::HashMap;

use super::proposals::ServiceType;

/// Markup of the "psychological" price shown next to the real one.
pub const PSYCHOLOGICAL_MARKUP: f64 = 1.2;

/// How a service turns the spreadsheet's base price into the quoted price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceAdjustment {
    /// Quote the computed price as is.
    Base,
    /// Multiply the computed price by a fixed factor.
    Multiply(f64),
    /// Ignore the computed price and charge a flat rate per treated m².
    PerSquareMeter(f64),
}

impl PriceAdjustment {
    fn apply(&self, base_price: f64, area: f64) -> f64 {
        match self {
            Self::Base => base_price,
            Self::Multiply(factor) => base_price * factor,
            Self::PerSquareMeter(rate) => area * rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdjustedPrice {
    pub final_price: i64,
    pub psychological_price: i64,
}

/// Per-service pricing rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceRule {
    pub adjustment: PriceAdjustment,
    /// Whether quotes compare soil-treatment chemicals side by side.
    pub comparable: bool,
}

/// Lookup table of pricing rules, keyed by service type.
#[derive(Debug, Clone)]
pub struct PricingPolicy {
    rules: HashMap<ServiceType, ServiceRule>,
    psychological_markup: f64,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        let rule = |adjustment, comparable| ServiceRule { adjustment, comparable };
        let rules = HashMap::from([
            (ServiceType::Pipanasi, rule(PriceAdjustment::Multiply(1.3), true)),
            (ServiceType::Spraying, rule(PriceAdjustment::PerSquareMeter(12_250.0), true)),
            (ServiceType::RefillPipanasi, rule(PriceAdjustment::PerSquareMeter(33_600.0), true)),
            (ServiceType::InjectSpraying, rule(PriceAdjustment::Base, true)),
            (ServiceType::Baiting, rule(PriceAdjustment::Base, false)),
            (ServiceType::Trapping, rule(PriceAdjustment::Base, false)),
            (ServiceType::Exclusion, rule(PriceAdjustment::Base, false)),
        ]);
        Self {
            rules,
            psychological_markup: PSYCHOLOGICAL_MARKUP,
        }
    }
}

impl PricingPolicy {
    pub fn with_rule(mut self, service: ServiceType, rule: ServiceRule) -> Self {
        self.rules.insert(service, rule);
        self
    }

    pub fn rule(&self, service: ServiceType) -> ServiceRule {
        self.rules.get(&service).copied().unwrap_or(ServiceRule {
            adjustment: PriceAdjustment::Base,
            comparable: false,
        })
    }

    pub fn is_comparable(&self, service: ServiceType) -> bool {
        self.rule(service).comparable
    }

    pub fn comparable_services(&self) -> Vec<ServiceType> {
        ServiceType::ALL
            .into_iter()
            .filter(|s| self.is_comparable(*s))
            .collect()
    }

    /// Final and psychological price for a base price computed by the workbook.
    pub fn adjust(&self, service: ServiceType, base_price: f64, area: f64) -> AdjustedPrice {
        let final_price = self.rule(service).adjustment.apply(base_price, area).round() as i64;
        let psychological_price = (final_price as f64 * self.psychological_markup).round() as i64;
        AdjustedPrice {
            final_price,
            psychological_price,
        }
    }
}

/// One chemical's contribution to a comparative quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparativePrice {
    pub chemical: String,
    pub price: f64,
    pub formatted_price: String,
    pub quantity_liters: f64,
}

/// Result of pricing a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceQuote {
    Single { base_price: f64 },
    Comparative { prices: Vec<ComparativePrice> },
}

/// Working days and technicians needed for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrewEstimate {
    pub days: u32,
    pub workers: u32,
}

impl CrewEstimate {
    /// Step table keyed on treated area; baiting jobs use their own thresholds.
    pub fn for_service(service: ServiceType, area: f64) -> Self {
        if service.is_baiting() {
            return if area <= 999.0 {
                Self { days: 1, workers: 2 }
            } else {
                Self { days: 2, workers: 3 }
            };
        }

        let days = if area <= 200.0 {
            4
        } else if area <= 400.0 {
            7
        } else if area <= 500.0 {
            10
        } else {
            30
        };
        let workers = if area <= 300.0 {
            2
        } else if area <= 500.0 {
            3
        } else {
            5
        };
        Self { days, workers }
    }

    pub fn days_label(&self) -> String {
        format!("{} hari", self.days)
    }

    pub fn workers_label(&self) -> String {
        format!("{} orang", self.workers)
    }
}

/// Indonesian Rupiah with dot thousands separators, e.g. `Rp 1.225.000`.
pub fn format_rupiah(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("Rp -{}", grouped)
    } else {
        format!("Rp {}", grouped)
    }
}

use std::collections::{BTreeMap, BTreeSet};

/// Departments sharing a minimum percent discount.
#[derive(Debug, Clone)]
pub struct CategoryDiscount {
    pub name: &'static str,
    pub departments: BTreeSet<i64>,
    pub min_percent_discount: f64,
}

/// Departments whose markdown prices must end in one of `endings` (fractional dollars).
#[derive(Debug, Clone)]
pub struct CriticalPricePoints {
    pub name: &'static str,
    pub departments: BTreeSet<i64>,
    pub endings: Vec<f64>,
}

/// Business rules shared read-only by every pipeline stage.
#[derive(Debug, Clone)]
pub struct MarkdownConfig {
    pub max_forecast_weeks: i64,
    pub enable_historic_requests: bool,
    pub default_sell_through_threshold: f64,
    pub min_percent_discount: f64,
    pub min_dollar_discount: f64,
    pub buffer_percent_over_liquidation: f64,
    /// Minimum days between markdown start and out-of-stock date.
    pub min_markdown_gap_days: i64,
    /// Price grid step as a fraction of the current retail price.
    pub discount_spacing: f64,
    pub category_min_percent_discount: Vec<CategoryDiscount>,
    pub critical_price_points: Vec<CriticalPricePoints>,
    pub min_markdown_price: BTreeMap<i64, f64>,
}

const MAX_FORECAST_WEEKS_LIMIT: i64 = 52;

const APPAREL_DEPARTMENTS: [i64; 6] = [22, 23, 33, 34, 68, 95];
const HOME_SEASONAL_DEPARTMENTS: [i64; 19] = [
    7, 9, 10, 11, 12, 14, 15, 16, 17, 18, 21, 32, 36, 50, 51, 60, 89, 92, 97,
];
const TEO_DEPARTMENTS: [i64; 18] = [
    3, 5, 6, 20, 29, 31, 32, 61, 64, 69, 70, 71, 74, 80, 81, 83, 85, 86,
];
const ONE_DOLLAR_FLOOR_DEPARTMENTS: [i64; 13] = [1, 40, 41, 42, 43, 44, 46, 48, 49, 52, 57, 58, 78];

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            max_forecast_weeks: 8,
            enable_historic_requests: false,
            default_sell_through_threshold: 0.0,
            min_percent_discount: 10.0,
            min_dollar_discount: 1.0,
            buffer_percent_over_liquidation: 20.0,
            min_markdown_gap_days: 6,
            discount_spacing: 0.05,
            category_min_percent_discount: vec![
                CategoryDiscount {
                    name: "apparel",
                    departments: APPAREL_DEPARTMENTS.into_iter().collect(),
                    min_percent_discount: 20.0,
                },
                CategoryDiscount {
                    name: "home_seasonal",
                    departments: HOME_SEASONAL_DEPARTMENTS.into_iter().collect(),
                    min_percent_discount: 15.0,
                },
                CategoryDiscount {
                    name: "cat_3",
                    departments: [3].into_iter().collect(),
                    min_percent_discount: 15.0,
                },
            ],
            critical_price_points: vec![
                CriticalPricePoints {
                    name: "apparel",
                    departments: APPAREL_DEPARTMENTS.into_iter().collect(),
                    endings: vec![0.81],
                },
                CriticalPricePoints {
                    name: "teo",
                    departments: TEO_DEPARTMENTS.into_iter().collect(),
                    endings: vec![0.91],
                },
            ],
            min_markdown_price: ONE_DOLLAR_FLOOR_DEPARTMENTS
                .into_iter()
                .map(|d| (d, 1.0))
                .collect(),
        }
    }
}

impl MarkdownConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut out = Self::default();

        if let Some(n) = env_parse::<i64>("MARKDOWN_MAX_FORECAST_WEEKS") {
            out.max_forecast_weeks = n;
        }
        if let Some(b) = env_parse::<bool>("MARKDOWN_ENABLE_HISTORIC_REQUESTS") {
            out.enable_historic_requests = b;
        }
        if let Some(v) = env_parse::<f64>("MARKDOWN_DEFAULT_SELL_THROUGH_THRESHOLD") {
            out.default_sell_through_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("MARKDOWN_MIN_PERCENT_DISCOUNT") {
            out.min_percent_discount = v;
        }
        if let Some(v) = env_parse::<f64>("MARKDOWN_MIN_DOLLAR_DISCOUNT") {
            out.min_dollar_discount = v;
        }
        if let Some(v) = env_parse::<f64>("MARKDOWN_LIQUIDATION_BUFFER_PERCENT") {
            out.buffer_percent_over_liquidation = v;
        }
        if let Some(v) = env_parse::<f64>("MARKDOWN_DISCOUNT_SPACING") {
            out.discount_spacing = v;
        }

        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (1..=MAX_FORECAST_WEEKS_LIMIT).contains(&self.max_forecast_weeks),
            "max_forecast_weeks must be in [1, {MAX_FORECAST_WEEKS_LIMIT}] (got {})",
            self.max_forecast_weeks
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.default_sell_through_threshold),
            "default_sell_through_threshold must be between 0 and 1 (got {})",
            self.default_sell_through_threshold
        );
        anyhow::ensure!(
            (0.0..100.0).contains(&self.min_percent_discount),
            "min_percent_discount must be in [0, 100) (got {})",
            self.min_percent_discount
        );
        anyhow::ensure!(
            self.min_dollar_discount >= 0.0,
            "min_dollar_discount must be >= 0 (got {})",
            self.min_dollar_discount
        );
        anyhow::ensure!(
            self.buffer_percent_over_liquidation >= 0.0,
            "buffer_percent_over_liquidation must be >= 0 (got {})",
            self.buffer_percent_over_liquidation
        );
        anyhow::ensure!(
            self.discount_spacing > 0.0 && self.discount_spacing < 1.0,
            "discount_spacing must be in (0, 1) (got {})",
            self.discount_spacing
        );
        Ok(())
    }

    pub fn min_percent_discount_for(&self, department_nbr: i64) -> f64 {
        self.category_min_percent_discount
            .iter()
            .find(|c| c.departments.contains(&department_nbr))
            .map(|c| c.min_percent_discount)
            .unwrap_or(self.min_percent_discount)
    }

    pub fn critical_price_points_for(&self, department_nbr: i64) -> Option<&CriticalPricePoints> {
        self.critical_price_points
            .iter()
            .find(|c| c.departments.contains(&department_nbr))
    }

    pub fn min_markdown_price_for(&self, department_nbr: i64) -> f64 {
        self.min_markdown_price
            .get(&department_nbr)
            .copied()
            .unwrap_or(0.0)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

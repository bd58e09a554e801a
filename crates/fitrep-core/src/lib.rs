//! Core domain model for the club reporting service: ingested records,
//! report periods, report rows and service classification rules.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};

pub const CRATE_NAME: &str = "fitrep-core";

/// Spreadsheet export families, one table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Services,
    Sales,
    Packages,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Services, EntityKind::Sales, EntityKind::Packages];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Services => "services",
            EntityKind::Sales => "sales",
            EntityKind::Packages => "packages",
        }
    }

    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    /// File name prefix the export tool uses for this entity.
    pub fn file_prefix(&self) -> &'static str {
        match self {
            EntityKind::Services => "ftp.services",
            EntityKind::Sales => "ftp.sales",
            EntityKind::Packages => "ftp.packages",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "services" | "service" => Ok(EntityKind::Services),
            "sales" | "sale" => Ok(EntityKind::Sales),
            "packages" | "package" => Ok(EntityKind::Packages),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// One rendered service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    pub name: Option<String>,
    pub division: Option<String>,
    pub trainer: Option<String>,
    pub client: Option<String>,
    pub basis: Option<String>,
    pub comment: Option<String>,
    pub datetime: Option<NaiveDateTime>,
    pub price: Option<f64>,
}

/// One sale transaction. `final_price` of null or <= 0 is non-revenue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: String,
    pub datetime: Option<NaiveDateTime>,
    pub division: Option<String>,
    pub name: Option<String>,
    pub client: Option<String>,
    pub author: Option<String>,
    pub trainer: Option<String>,
    pub sale_type: Option<String>,
    pub order_count: Option<i64>,
    pub order_price: Option<f64>,
    pub refund_count: Option<i64>,
    pub refund_price: Option<f64>,
    pub final_price: Option<f64>,
}

/// A sold membership or package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub id: String,
    pub date_sale: Option<NaiveDateTime>,
    pub date_activation: Option<NaiveDateTime>,
    pub date_closing: Option<NaiveDateTime>,
    pub name: Option<String>,
    pub division: Option<String>,
    pub comment: Option<String>,
    pub client: Option<String>,
    pub client_birthday: Option<NaiveDateTime>,
    pub client_phone: Option<String>,
    pub trainer: Option<String>,
    pub price: Option<f64>,
    pub count: Option<i64>,
    pub date_prodl: Option<NaiveDateTime>,
    pub status: Option<String>,
}

/// Calendar month a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub year: i32,
    pub month: u32,
}

impl ReportPeriod {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self { year, month })
    }

    /// Half-open `[start, end)` range of the month.
    pub fn bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        let start = NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .unwrap_or(NaiveDate::MIN)
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default();
        let (next_year, next_month) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .unwrap_or(NaiveDate::MAX)
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default();
        (start, end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionParams {
    pub period: ReportPeriod,
    pub service_name: String,
    pub divisions: Vec<String>,
    pub conversation_days: i32,
    pub same_trainer_only: bool,
}

/// Period plus division filter; shared by the sales and services reports.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodDivisionsParams {
    pub period: ReportPeriod,
    pub divisions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SalesReportParams {
    pub period: ReportPeriod,
    pub divisions: Vec<String>,
    pub conversation_days: i32,
}

/// 64-bit counts go out as JSON strings so browser dashboards never lose precision.
pub fn count_as_text<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainerConversionRow {
    pub trainer: String,
    #[serde(serialize_with = "count_as_text")]
    pub sessions_count: i64,
    #[serde(serialize_with = "count_as_text")]
    pub first_sales_count: i64,
    pub total_first_sales_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainerSalesRow {
    pub trainer: String,
    #[serde(serialize_with = "count_as_text")]
    pub total_sales_count: i64,
    pub total_sales_amount: f64,
    #[serde(serialize_with = "count_as_text")]
    pub first_sales_count: i64,
    pub first_sales_amount: f64,
    #[serde(serialize_with = "count_as_text")]
    pub renewal_sales_count: i64,
    pub renewal_sales_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainerServicesRow {
    pub trainer: String,
    #[serde(serialize_with = "count_as_text")]
    pub pt_count: i64,
    pub pt_amount: f64,
    #[serde(serialize_with = "count_as_text")]
    pub mg_count: i64,
    pub mg_amount: f64,
    #[serde(serialize_with = "count_as_text")]
    pub free_group_count: i64,
    pub free_group_amount: f64,
    #[serde(serialize_with = "count_as_text")]
    pub gp_count: i64,
    pub gp_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesReportRow {
    pub trainer: String,
    #[serde(serialize_with = "count_as_text")]
    pub new_sales_count: i64,
    pub new_sales_summ: f64,
    #[serde(serialize_with = "count_as_text")]
    pub prodl_sales_count: i64,
    pub prodl_sales_summ: f64,
    #[serde(serialize_with = "count_as_text")]
    pub total_sales_count: i64,
    pub total_sales_summ: f64,
    #[serde(serialize_with = "count_as_text")]
    pub new_sales_after_tz_count: i64,
    pub new_sales_after_tz_summ: f64,
    #[serde(serialize_with = "count_as_text")]
    pub new_sales_after_gp_count: i64,
    pub new_sales_after_gp_summ: f64,
    #[serde(serialize_with = "count_as_text")]
    pub new_sales_after_aqua_count: i64,
    pub new_sales_after_aqua_summ: f64,
    #[serde(serialize_with = "count_as_text")]
    pub new_sales_after_ft_count: i64,
    pub new_sales_after_ft_summ: f64,
    #[serde(serialize_with = "count_as_text")]
    pub new_sales_without_ft_vpt_count: i64,
    pub new_sales_without_ft_vpt_summ: f64,
}

/// Inclusive calendar-day range for the analysis exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    /// Half-open `[from 00:00, day after to 00:00)` range.
    pub fn bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        let start = self.from.and_hms_opt(0, 0, 0).unwrap_or_default();
        let end = self
            .to
            .succ_opt()
            .unwrap_or(NaiveDate::MAX)
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default();
        (start, end)
    }
}

/// Trainer conversion computed for several months side by side.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyConversionParams {
    pub periods: Vec<ReportPeriod>,
    pub service_name: String,
    pub divisions: Vec<String>,
    pub conversation_days: i32,
    pub same_trainer_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthConversion {
    pub year: i32,
    pub month: u32,
    #[serde(serialize_with = "count_as_text")]
    pub sessions_count: i64,
    #[serde(serialize_with = "count_as_text")]
    pub first_sales_count: i64,
    pub first_sales_amount: f64,
}

impl MonthConversion {
    pub fn empty(period: ReportPeriod) -> Self {
        Self {
            year: period.year,
            month: period.month,
            sessions_count: 0,
            first_sales_count: 0,
            first_sales_amount: 0.0,
        }
    }
}

/// One trainer with a cell per requested month, in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyConversionRow {
    pub trainer: String,
    pub months: Vec<MonthConversion>,
}

/// A touch service followed by a revenue sale to the same client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TouchSaleRow {
    pub service_name: Option<String>,
    pub service_datetime: NaiveDateTime,
    pub service_trainer: Option<String>,
    pub service_client: String,
    /// Whole days between the service and the sale.
    pub sale_after_days: i64,
    pub sale_datetime: NaiveDateTime,
    pub sale_division: Option<String>,
    pub sale_name: Option<String>,
    pub sale_trainer: Option<String>,
    pub sale_final_price: f64,
}

/// A fitness test and, when there is one, a later VPT of the same client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestingFunnelRow {
    pub testing_name: Option<String>,
    pub testing_datetime: NaiveDateTime,
    pub testing_client: Option<String>,
    pub testing_trainer: Option<String>,
    /// Calendar days from the test to the VPT.
    pub days_between: Option<i64>,
    pub vpt_name: Option<String>,
    pub vpt_datetime: Option<NaiveDateTime>,
    pub vpt_trainer: Option<String>,
}

/// Name patterns (SQL `ILIKE` syntax) that classify services for the
/// services and sales reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRules {
    pub personal_training: Vec<String>,
    pub mini_group: Vec<String>,
    /// Upper-case names matching none of these count as free group sessions.
    pub free_group_exclusions: Vec<String>,
    pub currency_tagged: Vec<String>,
    pub touch_gym: Vec<String>,
    pub touch_group: Vec<String>,
    pub touch_aqua: Vec<String>,
    pub touch_testing: Vec<String>,
}

fn patterns(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ServiceRules {
    fn default() -> Self {
        Self {
            personal_training: patterns(&["%ПТ %", "%СПЛИТ %"]),
            mini_group: patterns(&["%МГ %"]),
            free_group_exclusions: patterns(&[
                "%МГ %",
                "%ПТ %",
                "%KIDS%",
                "%₽%",
                "%$%",
                "%СПЛИТ%",
                "%тестирование%",
                "%браслет%",
                "%соляри%",
                "%питания%",
                "%скриннинг%",
                "%доп.%",
                "%столик%",
                "%пробковый%",
                "%массаж%",
                "%липопластика%",
                "%подарочный%",
                "%сертификат%",
            ]),
            currency_tagged: patterns(&["% ₽"]),
            touch_gym: patterns(&["%в тренажерном%"]),
            touch_group: patterns(&["%в групповых%"]),
            touch_aqua: patterns(&["%в аква зоне%"]),
            touch_testing: patterns(&["%тестирован%"]),
        }
    }
}

impl ServiceRules {
    /// Introductory personal training touches: gym, group and aqua.
    pub fn vpt_patterns(&self) -> Vec<String> {
        [&self.touch_gym, &self.touch_group, &self.touch_aqua]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Every touch family, fitness testing included.
    pub fn touch_patterns(&self) -> Vec<String> {
        let mut all = self.touch_testing.clone();
        all.extend(self.vpt_patterns());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_bounds_roll_over_december() {
        let period = ReportPeriod::new(2024, 12).unwrap();
        let (start, end) = period.bounds();
        assert_eq!(start.to_string(), "2024-12-01 00:00:00");
        assert_eq!(end.to_string(), "2025-01-01 00:00:00");
    }

    #[test]
    fn period_rejects_invalid_month() {
        assert!(ReportPeriod::new(2024, 0).is_none());
        assert!(ReportPeriod::new(2024, 13).is_none());
    }

    #[test]
    fn counts_serialize_as_strings() {
        let row = TrainerConversionRow {
            trainer: "Иванов".into(),
            sessions_count: 4,
            first_sales_count: 1,
            total_first_sales_amount: 3000.0,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["sessions_count"], "4");
        assert_eq!(json["first_sales_count"], "1");
        assert_eq!(json["total_first_sales_amount"], 3000.0);
    }

    #[test]
    fn entity_kind_parses_loosely() {
        assert_eq!("Sales".parse::<EntityKind>().unwrap(), EntityKind::Sales);
        assert_eq!(" package ".parse::<EntityKind>().unwrap(), EntityKind::Packages);
        assert!("members".parse::<EntityKind>().is_err());
        assert_eq!(EntityKind::Services.file_prefix(), "ftp.services");
    }

    #[test]
    fn date_range_is_inclusive_of_last_day() {
        let from = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let (start, end) = DateRange::new(from, to).unwrap().bounds();
        assert_eq!(start.to_string(), "2024-10-01 00:00:00");
        assert_eq!(end.to_string(), "2025-01-01 00:00:00");
        assert!(DateRange::new(to, from).is_none());
    }

    #[test]
    fn touch_patterns_put_testing_first() {
        let rules = ServiceRules::default();
        assert_eq!(rules.vpt_patterns().len(), 3);
        let all = rules.touch_patterns();
        assert_eq!(all[0], "%тестирован%");
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn default_rules_exclude_markers_from_free_group() {
        let rules = ServiceRules::default();
        assert!(rules.free_group_exclusions.iter().any(|p| p == "%ПТ %"));
        assert!(rules.free_group_exclusions.iter().any(|p| p == "%₽%"));
        assert_eq!(rules.currency_tagged, vec!["% ₽".to_string()]);
    }
}

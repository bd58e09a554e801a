//! Aggregate report queries. Every query has static text; periods,
//! division lists and classification patterns are bound parameters.
//!
//! Shared rules:
//! - revenue sales only (`final_price > 0`), trainer must be non-empty;
//! - a pair's first sale is the earliest by `datetime`, ties broken by the
//!   lowest id (shorter digit string first, then lexical);
//! - attribution windows are inclusive on both ends;
//! - in the sales report a VPT touch (gym, group, aqua) takes precedence
//!   over a fitness test even when the test is more recent; recency only
//!   orders touches of the same family.

use std::collections::BTreeMap;

use fitrep_core::{
    ConversionParams, DateRange, MonthConversion, MonthlyConversionParams, MonthlyConversionRow,
    PeriodDivisionsParams, SalesReportParams, SalesReportRow, ServiceRules, TestingFunnelRow,
    TouchSaleRow, TrainerConversionRow, TrainerSalesRow, TrainerServicesRow,
};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;

use crate::{PgPool, StorageResult};

/// Revenue sales with `is_first` set on each (trainer, client) pair's first sale.
macro_rules! ranked_sales_cte {
    () => {
        r#"
        ranked AS (
            SELECT sa.id,
                   sa.trainer,
                   sa.client,
                   sa.datetime,
                   sa.division,
                   sa.final_price,
                   (sa.client IS NOT NULL AND ROW_NUMBER() OVER (
                        PARTITION BY sa.trainer, sa.client
                        ORDER BY sa.datetime, LENGTH(sa.id), sa.id
                   ) = 1) AS is_first
              FROM sales sa
             WHERE sa.final_price > 0
               AND sa.datetime IS NOT NULL
               AND sa.trainer IS NOT NULL
               AND sa.trainer <> ''
        )
        "#
    };
}

pub(crate) const TRAINER_CONVERSION_SQL: &str = r#"
    WITH period_services AS (
        SELECT s.trainer, s.client, s.datetime
          FROM services s
         WHERE s.datetime >= $1
           AND s.datetime < $2
           AND s.name = $3
           AND s.trainer IS NOT NULL
           AND s.trainer <> ''
    ),
    session_counts AS (
        SELECT trainer, COUNT(*) AS sessions_count
          FROM period_services
         GROUP BY trainer
    ),
    candidate_sales AS (
        SELECT DISTINCT ps.trainer, ps.client, sa.id, sa.datetime, sa.final_price
          FROM period_services ps
          JOIN sales sa
            ON sa.client = ps.client
           AND (NOT $6::boolean OR sa.trainer = ps.trainer)
           AND sa.division = ANY($4)
           AND sa.final_price > 0
           AND sa.datetime >= ps.datetime
           AND sa.datetime <= ps.datetime + make_interval(days => $5::int)
    ),
    first_sales AS (
        SELECT trainer,
               final_price,
               ROW_NUMBER() OVER (
                   PARTITION BY trainer, client
                   ORDER BY datetime, LENGTH(id), id
               ) AS rn
          FROM candidate_sales
    ),
    first_sales_summary AS (
        SELECT trainer,
               COUNT(*) AS first_sales_count,
               COALESCE(SUM(final_price), 0) AS total_first_sales_amount
          FROM first_sales
         WHERE rn = 1
         GROUP BY trainer
    )
    SELECT sc.trainer,
           sc.sessions_count,
           COALESCE(fs.first_sales_count, 0) AS first_sales_count,
           COALESCE(fs.total_first_sales_amount, 0)::float8 AS total_first_sales_amount
      FROM session_counts sc
      LEFT JOIN first_sales_summary fs ON fs.trainer = sc.trainer
     ORDER BY sc.trainer
"#;

pub(crate) const TRAINER_SALES_SQL: &str = concat!(
    "WITH ",
    ranked_sales_cte!(),
    r#"
    SELECT r.trainer,
           COUNT(*) AS total_sales_count,
           COALESCE(SUM(r.final_price), 0)::float8 AS total_sales_amount,
           COUNT(*) FILTER (WHERE r.is_first) AS first_sales_count,
           COALESCE(SUM(r.final_price) FILTER (WHERE r.is_first), 0)::float8 AS first_sales_amount,
           COUNT(*) FILTER (WHERE NOT r.is_first) AS renewal_sales_count,
           COALESCE(SUM(r.final_price) FILTER (WHERE NOT r.is_first), 0)::float8 AS renewal_sales_amount
      FROM ranked r
     WHERE r.datetime >= $1
       AND r.datetime < $2
       AND r.division = ANY($3)
     GROUP BY r.trainer
     ORDER BY r.trainer
    "#
);

pub(crate) const TRAINER_SERVICES_SQL: &str = r#"
    SELECT s.trainer,
           COUNT(*) FILTER (WHERE s.name ILIKE ANY($4)) AS pt_count,
           COALESCE(SUM(s.price) FILTER (WHERE s.name ILIKE ANY($4)), 0)::float8 AS pt_amount,
           COUNT(*) FILTER (WHERE s.name ILIKE ANY($5)) AS mg_count,
           COALESCE(SUM(s.price) FILTER (WHERE s.name ILIKE ANY($5)), 0)::float8 AS mg_amount,
           COUNT(*) FILTER (
               WHERE s.name = UPPER(s.name) AND NOT (s.name ILIKE ANY($6))
           ) AS free_group_count,
           COALESCE(SUM(s.price) FILTER (
               WHERE s.name = UPPER(s.name) AND NOT (s.name ILIKE ANY($6))
           ), 0)::float8 AS free_group_amount,
           COUNT(*) FILTER (WHERE s.name ILIKE ANY($7)) AS gp_count,
           COALESCE(SUM(s.price) FILTER (WHERE s.name ILIKE ANY($7)), 0)::float8 AS gp_amount
      FROM services s
     WHERE s.datetime >= $1
       AND s.datetime < $2
       AND s.division = ANY($3)
       AND s.trainer IS NOT NULL
       AND s.trainer <> ''
     GROUP BY s.trainer
     ORDER BY s.trainer
"#;

pub(crate) const SALES_REPORT_SQL: &str = concat!(
    "WITH ",
    ranked_sales_cte!(),
    r#",
    period_sales AS (
        SELECT *
          FROM ranked
         WHERE datetime >= $1
           AND datetime < $2
           AND division = ANY($3)
    ),
    touches AS (
        SELECT s.client,
               s.datetime,
               CASE
                   WHEN s.name ILIKE ANY($5) THEN 'tz'
                   WHEN s.name ILIKE ANY($6) THEN 'gp'
                   WHEN s.name ILIKE ANY($7) THEN 'aqua'
                   WHEN s.name ILIKE ANY($8) THEN 'ft'
               END AS touch
          FROM services s
         WHERE s.client IS NOT NULL
           AND s.datetime IS NOT NULL
    ),
    attributed AS (
        SELECT ps.id,
               (SELECT t.touch
                  FROM touches t
                 WHERE t.touch IS NOT NULL
                   AND t.client = ps.client
                   AND ps.datetime >= t.datetime
                   AND ps.datetime <= t.datetime + make_interval(days => $4::int)
                 ORDER BY (t.touch = 'ft'), t.datetime DESC
                 LIMIT 1) AS touch
          FROM period_sales ps
         WHERE ps.is_first
    )
    SELECT ps.trainer,
           COUNT(*) FILTER (WHERE ps.is_first) AS new_sales_count,
           COALESCE(SUM(ps.final_price) FILTER (WHERE ps.is_first), 0)::float8 AS new_sales_summ,
           COUNT(*) FILTER (WHERE NOT ps.is_first) AS prodl_sales_count,
           COALESCE(SUM(ps.final_price) FILTER (WHERE NOT ps.is_first), 0)::float8 AS prodl_sales_summ,
           COUNT(*) AS total_sales_count,
           COALESCE(SUM(ps.final_price), 0)::float8 AS total_sales_summ,
           COUNT(*) FILTER (WHERE a.touch = 'tz') AS new_sales_after_tz_count,
           COALESCE(SUM(ps.final_price) FILTER (WHERE a.touch = 'tz'), 0)::float8 AS new_sales_after_tz_summ,
           COUNT(*) FILTER (WHERE a.touch = 'gp') AS new_sales_after_gp_count,
           COALESCE(SUM(ps.final_price) FILTER (WHERE a.touch = 'gp'), 0)::float8 AS new_sales_after_gp_summ,
           COUNT(*) FILTER (WHERE a.touch = 'aqua') AS new_sales_after_aqua_count,
           COALESCE(SUM(ps.final_price) FILTER (WHERE a.touch = 'aqua'), 0)::float8 AS new_sales_after_aqua_summ,
           COUNT(*) FILTER (WHERE a.touch = 'ft') AS new_sales_after_ft_count,
           COALESCE(SUM(ps.final_price) FILTER (WHERE a.touch = 'ft'), 0)::float8 AS new_sales_after_ft_summ,
           COUNT(*) FILTER (WHERE ps.is_first AND a.touch IS NULL) AS new_sales_without_ft_vpt_count,
           COALESCE(SUM(ps.final_price) FILTER (WHERE ps.is_first AND a.touch IS NULL), 0)::float8
               AS new_sales_without_ft_vpt_summ
      FROM period_sales ps
      LEFT JOIN attributed a ON a.id = ps.id
     GROUP BY ps.trainer
     ORDER BY ps.trainer
    "#
);

pub async fn trainer_conversion(
    pool: &PgPool,
    params: &ConversionParams,
) -> StorageResult<Vec<TrainerConversionRow>> {
    let (start, end) = params.period.bounds();
    debug!(?params, "running trainer conversion report");
    let rows = sqlx::query(TRAINER_CONVERSION_SQL)
        .bind(start)
        .bind(end)
        .bind(&params.service_name)
        .bind(&params.divisions)
        .bind(params.conversation_days)
        .bind(params.same_trainer_only)
        .fetch_all(pool)
        .await?;
    rows.iter().map(conversion_row).collect()
}

pub async fn trainer_sales(
    pool: &PgPool,
    params: &PeriodDivisionsParams,
) -> StorageResult<Vec<TrainerSalesRow>> {
    let (start, end) = params.period.bounds();
    debug!(?params, "running trainer sales report");
    let rows = sqlx::query(TRAINER_SALES_SQL)
        .bind(start)
        .bind(end)
        .bind(&params.divisions)
        .fetch_all(pool)
        .await?;
    rows.iter().map(sales_row).collect()
}

pub async fn trainer_services(
    pool: &PgPool,
    params: &PeriodDivisionsParams,
    rules: &ServiceRules,
) -> StorageResult<Vec<TrainerServicesRow>> {
    let (start, end) = params.period.bounds();
    debug!(?params, "running trainer services report");
    let rows = sqlx::query(TRAINER_SERVICES_SQL)
        .bind(start)
        .bind(end)
        .bind(&params.divisions)
        .bind(&rules.personal_training)
        .bind(&rules.mini_group)
        .bind(&rules.free_group_exclusions)
        .bind(&rules.currency_tagged)
        .fetch_all(pool)
        .await?;
    rows.iter().map(services_row).collect()
}

pub async fn sales_report(
    pool: &PgPool,
    params: &SalesReportParams,
    rules: &ServiceRules,
) -> StorageResult<Vec<SalesReportRow>> {
    let (start, end) = params.period.bounds();
    debug!(?params, "running sales report");
    let rows = sqlx::query(SALES_REPORT_SQL)
        .bind(start)
        .bind(end)
        .bind(&params.divisions)
        .bind(params.conversation_days)
        .bind(&rules.touch_gym)
        .bind(&rules.touch_group)
        .bind(&rules.touch_aqua)
        .bind(&rules.touch_testing)
        .fetch_all(pool)
        .await?;
    rows.iter().map(sales_report_row).collect()
}

/// Touch services in the range joined to every later revenue sale of the
/// same client, whatever the division or trainer.
pub(crate) const TOUCH_SALES_SQL: &str = r#"
    SELECT sv.name AS service_name,
           sv.datetime AS service_datetime,
           sv.trainer AS service_trainer,
           sv.client AS service_client,
           EXTRACT(DAY FROM sa.datetime - sv.datetime)::bigint AS sale_after_days,
           sa.datetime AS sale_datetime,
           sa.division AS sale_division,
           sa.name AS sale_name,
           sa.trainer AS sale_trainer,
           sa.final_price AS sale_final_price
      FROM services sv
      JOIN sales sa
        ON sa.client = sv.client
       AND sa.datetime >= sv.datetime
     WHERE sv.datetime >= $1
       AND sv.datetime < $2
       AND sv.name ILIKE ANY($3)
       AND sv.client <> ''
       AND sa.final_price > 0
     ORDER BY sv.datetime, sale_after_days, sa.datetime, LENGTH(sa.id), sa.id
"#;

/// Fitness tests in the range, each paired with every later VPT of the
/// client; tests with no VPT appear once with the VPT columns null.
pub(crate) const TESTING_FUNNEL_SQL: &str = r#"
    SELECT t.name AS testing_name,
           t.datetime AS testing_datetime,
           t.client AS testing_client,
           t.trainer AS testing_trainer,
           (v.datetime::date - t.datetime::date)::bigint AS days_between,
           v.name AS vpt_name,
           v.datetime AS vpt_datetime,
           v.trainer AS vpt_trainer
      FROM services t
      LEFT JOIN services v
        ON v.client = t.client
       AND v.datetime > t.datetime
       AND v.name ILIKE ANY($4)
     WHERE t.datetime >= $1
       AND t.datetime < $2
       AND t.name ILIKE ANY($3)
     ORDER BY t.datetime, LENGTH(t.id), t.id, v.datetime, LENGTH(v.id), v.id
"#;

/// Runs [`trainer_conversion`] once per requested month and pivots the
/// results so each trainer carries one zero-filled cell per month.
pub async fn conversion_by_month(
    pool: &PgPool,
    params: &MonthlyConversionParams,
) -> StorageResult<Vec<MonthlyConversionRow>> {
    let blank: Vec<MonthConversion> = params
        .periods
        .iter()
        .map(|p| MonthConversion::empty(*p))
        .collect();
    let mut by_trainer: BTreeMap<String, Vec<MonthConversion>> = BTreeMap::new();

    for (idx, period) in params.periods.iter().enumerate() {
        let month = ConversionParams {
            period: *period,
            service_name: params.service_name.clone(),
            divisions: params.divisions.clone(),
            conversation_days: params.conversation_days,
            same_trainer_only: params.same_trainer_only,
        };
        for row in trainer_conversion(pool, &month).await? {
            let cells = by_trainer
                .entry(row.trainer)
                .or_insert_with(|| blank.clone());
            cells[idx] = MonthConversion {
                year: period.year,
                month: period.month,
                sessions_count: row.sessions_count,
                first_sales_count: row.first_sales_count,
                first_sales_amount: row.total_first_sales_amount,
            };
        }
    }

    Ok(by_trainer
        .into_iter()
        .map(|(trainer, months)| MonthlyConversionRow { trainer, months })
        .collect())
}

pub async fn touch_sales(
    pool: &PgPool,
    range: &DateRange,
    rules: &ServiceRules,
) -> StorageResult<Vec<TouchSaleRow>> {
    let (start, end) = range.bounds();
    debug!(?range, "running touch to sale detail");
    let rows = sqlx::query(TOUCH_SALES_SQL)
        .bind(start)
        .bind(end)
        .bind(rules.touch_patterns())
        .fetch_all(pool)
        .await?;
    rows.iter().map(touch_sale_row).collect()
}

pub async fn testing_funnel(
    pool: &PgPool,
    range: &DateRange,
    rules: &ServiceRules,
) -> StorageResult<Vec<TestingFunnelRow>> {
    let (start, end) = range.bounds();
    debug!(?range, "running testing to VPT funnel");
    let rows = sqlx::query(TESTING_FUNNEL_SQL)
        .bind(start)
        .bind(end)
        .bind(&rules.touch_testing)
        .bind(rules.vpt_patterns())
        .fetch_all(pool)
        .await?;
    rows.iter().map(testing_funnel_row).collect()
}

fn conversion_row(row: &PgRow) -> StorageResult<TrainerConversionRow> {
    Ok(TrainerConversionRow {
        trainer: row.try_get("trainer")?,
        sessions_count: row.try_get("sessions_count")?,
        first_sales_count: row.try_get("first_sales_count")?,
        total_first_sales_amount: row.try_get("total_first_sales_amount")?,
    })
}

fn sales_row(row: &PgRow) -> StorageResult<TrainerSalesRow> {
    Ok(TrainerSalesRow {
        trainer: row.try_get("trainer")?,
        total_sales_count: row.try_get("total_sales_count")?,
        total_sales_amount: row.try_get("total_sales_amount")?,
        first_sales_count: row.try_get("first_sales_count")?,
        first_sales_amount: row.try_get("first_sales_amount")?,
        renewal_sales_count: row.try_get("renewal_sales_count")?,
        renewal_sales_amount: row.try_get("renewal_sales_amount")?,
    })
}

fn services_row(row: &PgRow) -> StorageResult<TrainerServicesRow> {
    Ok(TrainerServicesRow {
        trainer: row.try_get("trainer")?,
        pt_count: row.try_get("pt_count")?,
        pt_amount: row.try_get("pt_amount")?,
        mg_count: row.try_get("mg_count")?,
        mg_amount: row.try_get("mg_amount")?,
        free_group_count: row.try_get("free_group_count")?,
        free_group_amount: row.try_get("free_group_amount")?,
        gp_count: row.try_get("gp_count")?,
        gp_amount: row.try_get("gp_amount")?,
    })
}

fn sales_report_row(row: &PgRow) -> StorageResult<SalesReportRow> {
    Ok(SalesReportRow {
        trainer: row.try_get("trainer")?,
        new_sales_count: row.try_get("new_sales_count")?,
        new_sales_summ: row.try_get("new_sales_summ")?,
        prodl_sales_count: row.try_get("prodl_sales_count")?,
        prodl_sales_summ: row.try_get("prodl_sales_summ")?,
        total_sales_count: row.try_get("total_sales_count")?,
        total_sales_summ: row.try_get("total_sales_summ")?,
        new_sales_after_tz_count: row.try_get("new_sales_after_tz_count")?,
        new_sales_after_tz_summ: row.try_get("new_sales_after_tz_summ")?,
        new_sales_after_gp_count: row.try_get("new_sales_after_gp_count")?,
        new_sales_after_gp_summ: row.try_get("new_sales_after_gp_summ")?,
        new_sales_after_aqua_count: row.try_get("new_sales_after_aqua_count")?,
        new_sales_after_aqua_summ: row.try_get("new_sales_after_aqua_summ")?,
        new_sales_after_ft_count: row.try_get("new_sales_after_ft_count")?,
        new_sales_after_ft_summ: row.try_get("new_sales_after_ft_summ")?,
        new_sales_without_ft_vpt_count: row.try_get("new_sales_without_ft_vpt_count")?,
        new_sales_without_ft_vpt_summ: row.try_get("new_sales_without_ft_vpt_summ")?,
    })
}

fn touch_sale_row(row: &PgRow) -> StorageResult<TouchSaleRow> {
    Ok(TouchSaleRow {
        service_name: row.try_get("service_name")?,
        service_datetime: row.try_get("service_datetime")?,
        service_trainer: row.try_get("service_trainer")?,
        service_client: row.try_get("service_client")?,
        sale_after_days: row.try_get("sale_after_days")?,
        sale_datetime: row.try_get("sale_datetime")?,
        sale_division: row.try_get("sale_division")?,
        sale_name: row.try_get("sale_name")?,
        sale_trainer: row.try_get("sale_trainer")?,
        sale_final_price: row.try_get("sale_final_price")?,
    })
}

fn testing_funnel_row(row: &PgRow) -> StorageResult<TestingFunnelRow> {
    Ok(TestingFunnelRow {
        testing_name: row.try_get("testing_name")?,
        testing_datetime: row.try_get("testing_datetime")?,
        testing_client: row.try_get("testing_client")?,
        testing_trainer: row.try_get("testing_trainer")?,
        days_between: row.try_get("days_between")?,
        vpt_name: row.try_get("vpt_name")?,
        vpt_datetime: row.try_get("vpt_datetime")?,
        vpt_trainer: row.try_get("vpt_trainer")?,
    })
}

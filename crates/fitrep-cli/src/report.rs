//! `report` subcommands: analysis exports run straight against the store.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Subcommand, ValueEnum};
use fitrep_adapters::{write_xlsx, ExportTable};
use fitrep_core::{DateRange, MonthlyConversionParams, ReportPeriod, ServiceRules};
use fitrep_storage::{reports, PgPool};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Subcommand)]
pub enum ReportCommand {
    /// Trainer conversion for several months of one year, one column group per month.
    ConversionMonths {
        #[arg(long)]
        year: i32,
        #[arg(long, value_delimiter = ',', required = true)]
        months: Vec<u32>,
        #[arg(long)]
        service_name: String,
        #[arg(long, value_delimiter = ',', required = true)]
        divisions: Vec<String>,
        #[arg(long, default_value_t = 60)]
        days: i32,
        /// Count sales by any trainer, not only the one who ran the service.
        #[arg(long)]
        any_trainer: bool,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Every revenue sale that followed a testing or VPT service.
    TouchSales {
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Fitness tests and the VPT sessions the client took afterwards.
    TestingFunnel {
        #[command(flatten)]
        range: RangeArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Debug, Args)]
pub struct RangeArgs {
    /// First service day, inclusive (YYYY-MM-DD).
    #[arg(long)]
    from: NaiveDate,
    /// Last service day, inclusive (YYYY-MM-DD).
    #[arg(long)]
    to: NaiveDate,
}

impl RangeArgs {
    fn date_range(&self) -> Result<DateRange> {
        match DateRange::new(self.from, self.to) {
            Some(range) => Ok(range),
            None => bail!("--from {} is after --to {}", self.from, self.to),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Xlsx,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
    /// Output file. JSON goes to stdout when omitted; xlsx gets a dated name.
    #[arg(long)]
    out: Option<PathBuf>,
}

pub async fn run(command: ReportCommand, pool: &PgPool, rules: &ServiceRules) -> Result<()> {
    match command {
        ReportCommand::ConversionMonths {
            year,
            months,
            service_name,
            divisions,
            days,
            any_trainer,
            output,
        } => {
            let params = monthly_params(year, &months, service_name, divisions, days, any_trainer)?;
            let rows = reports::conversion_by_month(pool, &params).await?;
            info!(trainers = rows.len(), "conversion by month ready");
            emit(&output, &format!("conversion {year}.xlsx"), &rows, || {
                ExportTable::monthly_conversion("Conversion", &rows)
            })
        }
        ReportCommand::TouchSales { range, output } => {
            let dates = range.date_range()?;
            let rows = reports::touch_sales(pool, &dates, rules).await?;
            info!(rows = rows.len(), "touch to sale detail ready");
            let name = format!("services_sales_conversion {} - {}.xlsx", dates.from, dates.to);
            emit(&output, &name, &rows, || ExportTable::from_rows("ServicesSales", &rows))
        }
        ReportCommand::TestingFunnel { range, output } => {
            let dates = range.date_range()?;
            let rows = reports::testing_funnel(pool, &dates, rules).await?;
            info!(rows = rows.len(), "testing funnel ready");
            let name = format!("services_report {} - {}.xlsx", dates.from, dates.to);
            emit(&output, &name, &rows, || ExportTable::from_rows("ServicesReport", &rows))
        }
    }
}

fn monthly_params(
    year: i32,
    months: &[u32],
    service_name: String,
    divisions: Vec<String>,
    days: i32,
    any_trainer: bool,
) -> Result<MonthlyConversionParams> {
    if service_name.trim().is_empty() || divisions.is_empty() || days <= 0 {
        bail!("service name, divisions and a positive --days are required");
    }
    let periods = months
        .iter()
        .map(|m| ReportPeriod::new(year, *m).with_context(|| format!("invalid month {m}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(MonthlyConversionParams {
        periods,
        service_name,
        divisions,
        conversation_days: days,
        same_trainer_only: !any_trainer,
    })
}

fn emit<T: Serialize>(
    output: &OutputArgs,
    default_xlsx: &str,
    rows: &T,
    table: impl FnOnce() -> ExportTable,
) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            let text = serde_json::to_string_pretty(rows)?;
            match &output.out {
                Some(path) => write_text(path, &text),
                None => {
                    println!("{text}");
                    Ok(())
                }
            }
        }
        OutputFormat::Xlsx => {
            let path = output
                .out
                .clone()
                .unwrap_or_else(|| PathBuf::from(default_xlsx));
            write_xlsx(&path, &table()).with_context(|| format!("writing {}", path.display()))?;
            println!("report saved to {}", path.display());
            Ok(())
        }
    }
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    println!("report saved to {}", path.display());
    Ok(())
}

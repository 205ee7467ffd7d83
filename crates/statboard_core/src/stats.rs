use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tracing::{debug, warn};

use crate::period::{TemporalPeriod, period_from_file_path, stem_tokens, year_range_in_path};
use crate::remote::RemoteTable;
use crate::resolver::list_table_files;

const COMPARISON_MARKER: &str = "comp";
const COMPARISON_HEADER: [&str; 5] = ["variable", "unit", "test", "control", "diff"];
const UNIT_COLUMN: &str = "unit";
const MIN_TABLE_COLUMNS: usize = 3;

const SINGLE_CASE_METRICS: &[(&str, Metric)] = &[
    ("mean", Metric::GlobalMean),
    ("standard dev.", Metric::Std),
    ("standard error", Metric::StdError),
    ("sample size", Metric::SampleSize),
];

const COMPARISON_METRICS: &[(&str, Metric)] = &[
    ("test", Metric::GlobalMean),
    ("diff", Metric::Bias),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    GlobalMean,
    Bias,
    Std,
    StdError,
    SampleSize,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GlobalMean => "global_mean",
            Self::Bias => "bias",
            Self::Std => "std",
            Self::StdError => "std_error",
            Self::SampleSize => "sample_size",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableSchema {
    SingleCase,
    Comparison,
}

impl TableSchema {
    fn metric_columns(self) -> &'static [(&'static str, Metric)] {
        match self {
            Self::SingleCase => SINGLE_CASE_METRICS,
            Self::Comparison => COMPARISON_METRICS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticRecord {
    pub variable_name: String,
    pub temporal_period: TemporalPeriod,
    pub metric: Metric,
    pub value: f64,
    pub unit: Option<String>,
}

/// Header plus data rows, shared by the CSV and HTML adapters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub source_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn from_csv_reader<R: Read>(source_name: &str, reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);
        let headers = from_csv_row(
            csv_reader
                .headers()
                .with_context(|| format!("failed to read header of {source_name}"))?,
        );
        let mut rows = Vec::new();
        for record in csv_reader.records() {
            match record {
                Ok(record) => rows.push(from_csv_row(&record)),
                Err(error) => debug!(source = source_name, error = %error, "skipping malformed csv row"),
            }
        }
        Ok(Self {
            source_name: source_name.to_string(),
            headers,
            rows,
        })
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_csv_reader(&name, file)
    }

    /// Rows are `<tr>` elements; the first non-empty row is the header.
    pub fn from_html_table(source_name: &str, table: ElementRef<'_>) -> Self {
        let row_selector = Selector::parse("tr").expect("valid row selector");
        let mut rows = table
            .select(&row_selector)
            .map(from_html_row)
            .filter(|cells| !cells.is_empty())
            .collect::<Vec<_>>();
        let mut headers = if rows.is_empty() {
            Vec::new()
        } else {
            rows.remove(0)
        };

        // A blank leading header cell is a serialized row index, not the variable column.
        if headers.len() > 1 && headers[0].is_empty() {
            headers.remove(0);
            for row in &mut rows {
                if !row.is_empty() {
                    row.remove(0);
                }
            }
        }

        Self {
            source_name: source_name.to_string(),
            headers,
            rows,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.headers.len() >= MIN_TABLE_COLUMNS && !self.rows.is_empty()
    }

    fn column(&self, label: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == label)
    }
}

pub fn from_csv_row(record: &csv::StringRecord) -> Vec<String> {
    record.iter().map(|cell| cell.trim().to_string()).collect()
}

pub fn from_html_row(row: ElementRef<'_>) -> Vec<String> {
    let cell_selector = Selector::parse("th, td").expect("valid cell selector");
    row.select(&cell_selector)
        .map(|cell| {
            cell.text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Every usable `<table>` in an HTML page.
pub fn html_tables(source_name: &str, html: &str) -> Vec<RawTable> {
    let document = Html::parse_document(html);
    let table_selector = Selector::parse("table").expect("valid table selector");
    document
        .select(&table_selector)
        .map(|table| RawTable::from_html_table(source_name, table))
        .filter(RawTable::is_usable)
        .collect()
}

pub fn classify_table(source_name: &str, headers: &[String]) -> TableSchema {
    let lowered = source_name.to_lowercase();
    let stem = lowered
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(&lowered);
    if stem_tokens(stem).contains(&COMPARISON_MARKER) {
        return TableSchema::Comparison;
    }

    let header_set = headers
        .iter()
        .map(|header| header.trim())
        .collect::<BTreeSet<_>>();
    let comparison_set = COMPARISON_HEADER.into_iter().collect::<BTreeSet<_>>();
    if headers.len() == COMPARISON_HEADER.len() && header_set == comparison_set {
        TableSchema::Comparison
    } else {
        TableSchema::SingleCase
    }
}

pub fn extract_table(
    table: &RawTable,
    period: TemporalPeriod,
    schema_hint: Option<TableSchema>,
) -> Vec<StatisticRecord> {
    let schema = schema_hint.unwrap_or_else(|| classify_table(&table.source_name, &table.headers));
    let metric_columns = schema
        .metric_columns()
        .iter()
        .filter_map(|(label, metric)| table.column(label).map(|index| (index, *metric)))
        .collect::<Vec<_>>();
    let unit_column = table.column(UNIT_COLUMN);

    let mut records = Vec::new();
    for row in &table.rows {
        let Some(variable) = row.first().map(|cell| cell.trim()).filter(|cell| !cell.is_empty())
        else {
            continue;
        };
        let unit = unit_column
            .and_then(|index| row.get(index))
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty())
            .map(ToString::to_string);

        for (index, metric) in &metric_columns {
            if let Some(value) = row.get(*index).and_then(|cell| parse_numeric(cell)) {
                records.push(StatisticRecord {
                    variable_name: variable.to_string(),
                    temporal_period: period,
                    metric: *metric,
                    value,
                    unit: unit.clone(),
                });
            }
        }
    }
    records
}

pub enum StatisticsSource<'a> {
    CsvFile(&'a Path),
    Directory(&'a Path),
    RemoteTables(&'a [RemoteTable]),
}

pub fn extract(
    source: StatisticsSource<'_>,
    schema_hint: Option<TableSchema>,
) -> Result<Vec<StatisticRecord>> {
    match source {
        StatisticsSource::CsvFile(path) => {
            let table = RawTable::from_csv_path(path)?;
            Ok(extract_table(&table, period_from_file_path(path), schema_hint))
        }
        StatisticsSource::Directory(dir) => {
            let mut records = Vec::new();
            for path in list_table_files(dir) {
                match RawTable::from_csv_path(&path) {
                    Ok(table) => records.extend(extract_table(
                        &table,
                        period_from_file_path(&path),
                        schema_hint,
                    )),
                    Err(error) => {
                        warn!(path = %path.display(), error = %format!("{error:#}"), "skipping unreadable table");
                    }
                }
            }
            Ok(aggregate(records))
        }
        StatisticsSource::RemoteTables(tables) => {
            let records = tables
                .iter()
                .flat_map(|remote| extract_table(&remote.table, remote.period, schema_hint))
                .collect();
            Ok(aggregate(records))
        }
    }
}

/// Group by period then variable; a later value for the same metric replaces an
/// earlier one.
pub fn aggregate(records: Vec<StatisticRecord>) -> Vec<StatisticRecord> {
    let mut grouped: BTreeMap<(TemporalPeriod, String), (BTreeMap<Metric, f64>, Option<String>)> =
        BTreeMap::new();
    for record in records {
        let entry = grouped
            .entry((record.temporal_period, record.variable_name))
            .or_default();
        entry.0.insert(record.metric, record.value);
        if record.unit.is_some() {
            entry.1 = record.unit;
        }
    }

    grouped
        .into_iter()
        .flat_map(|((period, variable), (metrics, unit))| {
            metrics.into_iter().map(move |(metric, value)| StatisticRecord {
                variable_name: variable.clone(),
                temporal_period: period,
                metric,
                value,
                unit: unit.clone(),
            })
        })
        .collect()
}

/// Year range of a diagnostics directory, from its own path or its first table file.
pub fn directory_year_range(dir: &Path) -> Option<TemporalPeriod> {
    year_range_in_path(dir).or_else(|| {
        list_table_files(dir)
            .first()
            .and_then(|path| year_range_in_path(path))
    })
}

fn parse_numeric(cell: &str) -> Option<f64> {
    let value = cell.trim().parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    const SINGLE_HEADER: &str =
        "variable,unit,mean,sample size,standard dev.,standard error,95% CI,trend,trend p-value";

    fn csv_table(name: &str, content: &str) -> RawTable {
        RawTable::from_csv_reader(name, content.as_bytes()).expect("csv table")
    }

    fn metric_value(records: &[StatisticRecord], variable: &str, metric: Metric) -> Option<f64> {
        records
            .iter()
            .find(|record| record.variable_name == variable && record.metric == metric)
            .map(|record| record.value)
    }

    #[test]
    fn single_case_row_yields_four_metrics() {
        let table = csv_table(
            "amwg_table_b.e30_alpha08b.csv",
            &format!("{SINGLE_HEADER}\nTS,K,288.5,30,1.2,0.3,0.1,,\n"),
        );
        let records = extract_table(&table, TemporalPeriod::ANNUAL, None);
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|record| record.variable_name == "TS"));
        assert!(records.iter().all(|record| record.unit.as_deref() == Some("K")));
        assert_eq!(metric_value(&records, "TS", Metric::GlobalMean), Some(288.5));
        assert_eq!(metric_value(&records, "TS", Metric::SampleSize), Some(30.0));
        assert_eq!(metric_value(&records, "TS", Metric::Std), Some(1.2));
        assert_eq!(metric_value(&records, "TS", Metric::StdError), Some(0.3));
    }

    #[test]
    fn comparison_row_yields_mean_and_bias() {
        let table = csv_table(
            "amwg_table_comp.csv",
            "variable,unit,test,control,diff\nPRECT,mm/day,2.1,1.9,0.2\n",
        );
        assert_eq!(
            classify_table(&table.source_name, &table.headers),
            TableSchema::Comparison
        );
        let records = extract_table(&table, TemporalPeriod::ANNUAL, None);
        assert_eq!(records.len(), 2);
        assert_eq!(metric_value(&records, "PRECT", Metric::GlobalMean), Some(2.1));
        assert_eq!(metric_value(&records, "PRECT", Metric::Bias), Some(0.2));
        assert_eq!(metric_value(&records, "PRECT", Metric::Std), None);
        assert_eq!(metric_value(&records, "PRECT", Metric::StdError), None);
        assert_eq!(metric_value(&records, "PRECT", Metric::SampleSize), None);
    }

    #[test]
    fn comparison_is_detected_from_exact_columns() {
        let headers = COMPARISON_HEADER.map(ToString::to_string).to_vec();
        assert_eq!(
            classify_table("amwg_table_case.csv", &headers),
            TableSchema::Comparison
        );
        let mut extended = headers.clone();
        extended.push("notes".to_string());
        assert_eq!(
            classify_table("amwg_table_case.csv", &extended),
            TableSchema::SingleCase
        );
        assert_eq!(
            classify_table("b.e30.BLTcompact.csv", &extended),
            TableSchema::SingleCase
        );
    }

    #[test]
    fn non_numeric_mean_only_drops_that_metric() {
        let table = csv_table(
            "amwg_table_case.csv",
            &format!("{SINGLE_HEADER}\nFLNT,W/m2,n/a,12,0.5,nan,,,\n"),
        );
        let records = extract_table(&table, TemporalPeriod::ANNUAL, None);
        assert_eq!(metric_value(&records, "FLNT", Metric::GlobalMean), None);
        assert_eq!(metric_value(&records, "FLNT", Metric::StdError), None);
        assert_eq!(metric_value(&records, "FLNT", Metric::SampleSize), Some(12.0));
        assert_eq!(metric_value(&records, "FLNT", Metric::Std), Some(0.5));
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn rows_without_variable_are_skipped() {
        let table = csv_table(
            "amwg_table_case.csv",
            &format!("{SINGLE_HEADER}\n,K,1.0,1,1,1,,,\n  ,K,2.0,1,1,1,,,\n"),
        );
        assert!(extract_table(&table, TemporalPeriod::ANNUAL, None).is_empty());
    }

    #[test]
    fn schema_hint_overrides_classification() {
        let table = csv_table(
            "amwg_table_case.csv",
            "variable,unit,test,control,diff,extra\nU,m/s,5.0,4.0,1.0,x\n",
        );
        assert!(extract_table(&table, TemporalPeriod::ANNUAL, None).is_empty());
        let records = extract_table(&table, TemporalPeriod::ANNUAL, Some(TableSchema::Comparison));
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn html_table_adapter_drops_index_column() {
        let html = r#"<html><body>
            <table><tr><th>a</th><th>b</th></tr><tr><td>1</td><td>2</td></tr></table>
            <table border="1">
              <thead><tr><th></th><th>variable</th><th>unit</th><th>test</th><th>control</th><th>diff</th></tr></thead>
              <tbody>
                <tr><th>0</th><td>PRECT</td><td>mm/day</td><td>2.1</td><td>1.9</td><td>0.2</td></tr>
                <tr><th>1</th><td>TS</td><td>K</td><td>288.0</td><td>287.5</td><td>0.5</td></tr>
              </tbody>
            </table>
            <table><tr><th>x</th><th>y</th><th>z</th></tr></table>
        </body></html>"#;
        let tables = html_tables("amwg_table_case.html", html);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].headers, COMPARISON_HEADER.map(ToString::to_string).to_vec());
        let records = extract_table(&tables[0], TemporalPeriod::Named("DJF"), None);
        assert_eq!(records.len(), 4);
        assert_eq!(metric_value(&records, "TS", Metric::Bias), Some(0.5));
        assert!(
            records
                .iter()
                .all(|record| record.temporal_period == TemporalPeriod::Named("DJF"))
        );
    }

    #[test]
    fn aggregate_is_last_write_wins_per_metric() {
        let first = StatisticRecord {
            variable_name: "TS".to_string(),
            temporal_period: TemporalPeriod::ANNUAL,
            metric: Metric::GlobalMean,
            value: 1.0,
            unit: Some("K".to_string()),
        };
        let second = StatisticRecord {
            value: 2.0,
            unit: None,
            ..first.clone()
        };
        let other = StatisticRecord {
            metric: Metric::Std,
            value: 0.1,
            ..first.clone()
        };
        let merged = aggregate(vec![first, other, second]);
        assert_eq!(merged.len(), 2);
        assert_eq!(metric_value(&merged, "TS", Metric::GlobalMean), Some(2.0));
        assert!(merged.iter().all(|record| record.unit.as_deref() == Some("K")));
    }

    #[test]
    fn directory_extraction_groups_by_period() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("case_yrs_2_21");
        fs::create_dir_all(dir.join("seasonal")).expect("create dirs");
        fs::write(
            dir.join("amwg_table_case.csv"),
            format!("{SINGLE_HEADER}\nTS,K,288.5,30,1.2,0.3,,,\n"),
        )
        .expect("write annual");
        fs::write(
            dir.join("seasonal/amwg_table_case_DJF.csv"),
            format!("{SINGLE_HEADER}\nTS,K,280.0,30,2.0,0.4,,,\n"),
        )
        .expect("write djf");
        fs::write(
            dir.join("amwg_table_comp.csv"),
            "variable,unit,test,control,diff\nTS,K,288.5,288.0,0.5\n",
        )
        .expect("write comp");

        let records = extract(StatisticsSource::Directory(&dir), None).expect("extract");
        let range = TemporalPeriod::YearRange { start: 2, end: 21 };
        let djf = TemporalPeriod::Named("DJF");
        assert_eq!(
            records
                .iter()
                .filter(|record| record.temporal_period == range)
                .count(),
            5
        );
        assert_eq!(
            records
                .iter()
                .filter(|record| record.temporal_period == djf)
                .count(),
            4
        );
        assert_eq!(directory_year_range(&dir), Some(range));
    }

    #[test]
    fn single_file_extraction_reports_io_errors() {
        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("missing.csv");
        assert!(extract(StatisticsSource::CsvFile(&missing), None).is_err());
    }
}

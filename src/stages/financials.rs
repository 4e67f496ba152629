//! Financial statements from the CSV table, and the indices derived from them.
//!
//! One row per company and fiscal year. Headers are matched against English
//! names or the Japanese originals. Empty, unparsable and zero cells count as
//! missing, so an index whose inputs are missing is `null`.
use super::round2;
use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const CODE_HEADERS: &[&str] = &["code", "company_code", "コード"];
const YEAR_HEADERS: &[&str] = &["YEAR", "year", "年度"];

/// Statement line items: canonical key, then accepted headers.
const LINE_ITEMS: &[(&str, &[&str])] = &[
    ("revenue", &["revenue", "net_sales", "売上高"]),
    ("cost_of_sales", &["cost_of_sales", "売上原価"]),
    ("gross_profit", &["gross_profit", "売上総利益"]),
    ("sga", &["sga", "selling_general_admin", "販売費及び一般管理費"]),
    ("personnel_cost", &["personnel_cost", "販売費及び一般管理費_人件費"]),
    ("depreciation", &["depreciation", "販売費及び一般管理費_減価償却費"]),
    ("operating_income", &["operating_income", "営業利益"]),
    ("ordinary_income", &["ordinary_income", "経常利益"]),
    ("net_income", &["net_income", "当期純利益"]),
    ("total_assets", &["total_assets", "総資産"]),
    ("current_assets", &["current_assets", "流動資産"]),
    ("current_liabilities", &["current_liabilities", "流動負債"]),
    ("net_assets", &["net_assets", "equity", "純資産"]),
    ("short_term_debt", &["short_term_debt", "流動負債_短期借入金"]),
    (
        "current_portion_long_term_debt",
        &["current_portion_long_term_debt", "流動負債_1年内返済予定長期借入金"],
    ),
    ("long_term_debt", &["long_term_debt", "固定負債_長期借入金"]),
    ("operating_cf", &["operating_cf", "営業活動によるキャッシュ・フロー"]),
    ("investing_cf", &["investing_cf", "投資活動によるキャッシュ・フロー"]),
];

const LOCATION_HEADERS: &[&str] = &["location", "headquarters", "本社所在地"];
const MARKET_HEADERS: &[&str] = &["market", "市場・商品区分"];
const INDUSTRY_HEADERS: &[&str] = &["industry", "業種分類"];
const EMPLOYEE_HEADERS: &[&str] = &["employees", "従業員数（連結）"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub code: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub employees: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialIndices {
    pub gross_margin: Option<f64>,
    pub cost_ratio: Option<f64>,
    pub sga_ratio: Option<f64>,
    pub operating_margin: Option<f64>,
    pub ordinary_margin: Option<f64>,
    pub net_margin: Option<f64>,
    pub ebitda: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub operating_income_growth: Option<f64>,
    pub personnel_cost_ratio: Option<f64>,
    pub value_added: Option<f64>,
    pub roa: Option<f64>,
    pub roe: Option<f64>,
    pub current_ratio: Option<f64>,
    pub equity_ratio: Option<f64>,
    pub de_ratio: Option<f64>,
    pub operating_cf_margin: Option<f64>,
    pub free_cash_flow: Option<f64>,
    pub operating_cf_to_ebitda: Option<f64>,
}

impl FinancialIndices {
    /// Non-null indices as `(name, value)` pairs in declaration order.
    pub fn present(&self) -> Vec<(&'static str, f64)> {
        let all = [
            ("gross_margin", self.gross_margin),
            ("cost_ratio", self.cost_ratio),
            ("sga_ratio", self.sga_ratio),
            ("operating_margin", self.operating_margin),
            ("ordinary_margin", self.ordinary_margin),
            ("net_margin", self.net_margin),
            ("ebitda", self.ebitda),
            ("revenue_growth", self.revenue_growth),
            ("operating_income_growth", self.operating_income_growth),
            ("personnel_cost_ratio", self.personnel_cost_ratio),
            ("value_added", self.value_added),
            ("roa", self.roa),
            ("roe", self.roe),
            ("current_ratio", self.current_ratio),
            ("equity_ratio", self.equity_ratio),
            ("de_ratio", self.de_ratio),
            ("operating_cf_margin", self.operating_cf_margin),
            ("free_cash_flow", self.free_cash_flow),
            ("operating_cf_to_ebitda", self.operating_cf_to_ebitda),
        ];
        all.into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FiscalYear {
    pub year: i64,
    /// Line items present in the table, keyed by canonical name.
    pub statement: BTreeMap<String, f64>,
    pub indices: FinancialIndices,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Financials {
    pub company: CompanyInfo,
    pub years: Vec<FiscalYear>,
}

impl Financials {
    pub fn latest(&self) -> Option<&FiscalYear> {
        self.years.last()
    }
}

fn parse_number(cell: &str) -> Option<f64> {
    let cleaned = cell.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn amount(cell: &str) -> Option<f64> {
    parse_number(cell).filter(|v| *v != 0.0)
}

fn column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|header| names.iter().any(|name| header.trim() == *name))
}

fn text_cell(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Load the rows for `company_code`. `None` when the table has no such company.
pub fn load_financials(path: &Path, company_code: &str) -> PipelineResult<Option<Financials>> {
    let invalid = |detail: String| PipelineError::InvalidInput(format!("{}: {detail}", path.display()));
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|err| invalid(err.to_string()))?;
    let headers = reader.headers().map_err(|err| invalid(err.to_string()))?.clone();
    let code_idx = column(&headers, CODE_HEADERS)
        .ok_or_else(|| invalid("no company code column".to_string()))?;
    let year_idx = column(&headers, YEAR_HEADERS)
        .ok_or_else(|| invalid("no fiscal year column".to_string()))?;
    let item_columns: Vec<(&str, usize)> = LINE_ITEMS
        .iter()
        .filter_map(|(key, names)| column(&headers, names).map(|idx| (*key, idx)))
        .collect();
    let location_idx = column(&headers, LOCATION_HEADERS);
    let market_idx = column(&headers, MARKET_HEADERS);
    let industry_idx = column(&headers, INDUSTRY_HEADERS);
    let employee_idx = column(&headers, EMPLOYEE_HEADERS);

    // Company attributes follow the latest fiscal year seen.
    let mut company: Option<(i64, CompanyInfo)> = None;
    let mut years = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| invalid(err.to_string()))?;
        if record.get(code_idx).map(str::trim) != Some(company_code) {
            continue;
        }
        let Some(year) = record.get(year_idx).and_then(parse_number) else {
            tracing::warn!(code = company_code, "skipping financial row without a fiscal year");
            continue;
        };
        let year = year as i64;
        if company.as_ref().is_none_or(|(seen, _)| year >= *seen) {
            company = Some((
                year,
                CompanyInfo {
                    code: company_code.to_string(),
                    location: text_cell(&record, location_idx),
                    market: text_cell(&record, market_idx),
                    industry: text_cell(&record, industry_idx),
                    employees: employee_idx.and_then(|i| record.get(i)).and_then(parse_number),
                },
            ));
        }
        let statement = item_columns
            .iter()
            .filter_map(|(key, idx)| {
                record
                    .get(*idx)
                    .and_then(amount)
                    .map(|value| (key.to_string(), value))
            })
            .collect();
        years.push(FiscalYear {
            year,
            statement,
            indices: FinancialIndices::default(),
        });
    }

    let Some((_, company)) = company else {
        return Ok(None);
    };
    years.sort_by_key(|year| year.year);
    let mut previous: Option<BTreeMap<String, f64>> = None;
    for year in &mut years {
        year.indices = compute_indices(&year.statement, previous.as_ref());
        previous = Some(year.statement.clone());
    }
    tracing::debug!(code = company_code, years = years.len(), "financial statements loaded");
    Ok(Some(Financials { company, years }))
}

fn ratio(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    match (num, den) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d),
        _ => None,
    }
}

fn pct(value: Option<f64>) -> Option<f64> {
    value.map(|v| round2(v * 100.0))
}

fn sum(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        None
    } else {
        Some(present.iter().sum())
    }
}

fn average(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match (current, previous) {
        (Some(c), Some(p)) => Some((c + p) / 2.0),
        (Some(c), None) => Some(c),
        (None, p) => p,
    }
}

fn growth(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match (current, previous) {
        (Some(c), Some(p)) if p != 0.0 => pct(Some((c - p) / p.abs())),
        _ => None,
    }
}

/// Indices for one year; `previous` feeds growth and averaged balances.
pub fn compute_indices(
    current: &BTreeMap<String, f64>,
    previous: Option<&BTreeMap<String, f64>>,
) -> FinancialIndices {
    let get = |key: &str| current.get(key).copied();
    let prev = |key: &str| previous.and_then(|p| p.get(key).copied());

    let revenue = get("revenue");
    let operating_income = get("operating_income");
    let ebitda = sum(&[operating_income, get("depreciation")]).filter(|_| operating_income.is_some());
    let debt = sum(&[
        get("short_term_debt"),
        get("current_portion_long_term_debt"),
        get("long_term_debt"),
    ]);
    let operating_cf = get("operating_cf");
    let avg_assets = average(get("total_assets"), prev("total_assets"));
    let avg_equity = average(get("net_assets"), prev("net_assets"));

    FinancialIndices {
        gross_margin: pct(ratio(get("gross_profit"), revenue)),
        cost_ratio: pct(ratio(get("cost_of_sales"), revenue)),
        sga_ratio: pct(ratio(get("sga"), revenue)),
        operating_margin: pct(ratio(operating_income, revenue)),
        ordinary_margin: pct(ratio(get("ordinary_income"), revenue)),
        net_margin: pct(ratio(get("net_income"), revenue)),
        ebitda,
        revenue_growth: growth(revenue, prev("revenue")),
        operating_income_growth: growth(operating_income, prev("operating_income")),
        personnel_cost_ratio: pct(ratio(get("personnel_cost"), revenue)),
        value_added: match (get("gross_profit"), get("personnel_cost")) {
            (Some(gross), Some(personnel)) => Some(gross - personnel),
            _ => None,
        },
        roa: pct(ratio(get("net_income"), avg_assets)),
        roe: pct(ratio(get("net_income"), avg_equity)),
        current_ratio: pct(ratio(get("current_assets"), get("current_liabilities"))),
        equity_ratio: pct(ratio(get("net_assets"), get("total_assets"))),
        de_ratio: ratio(debt, get("net_assets")).map(round2),
        operating_cf_margin: pct(ratio(operating_cf, revenue)),
        free_cash_flow: sum(&[operating_cf, get("investing_cf")]),
        operating_cf_to_ebitda: ratio(operating_cf, ebitda).map(round2),
    }
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Plain-text rendering of company info and per-year indices for prompts.
pub fn indices_text(financials: &Financials) -> String {
    let info = &financials.company;
    let mut lines = vec![format!(
        "Company: code {}, location {}, industry {}, employees {}",
        info.code,
        info.location.as_deref().unwrap_or("unknown"),
        info.industry.as_deref().unwrap_or("unknown"),
        info.employees.map(format_value).unwrap_or_else(|| "unknown".to_string()),
    )];
    for year in &financials.years {
        let present = year.indices.present();
        if present.is_empty() {
            lines.push(format!("FY{}: no indices available", year.year));
            continue;
        }
        let parts: Vec<String> = present
            .iter()
            .map(|(name, value)| format!("{name} {}", format_value(*value)))
            .collect();
        lines.push(format!("FY{}: {}", year.year, parts.join(", ")));
    }
    lines.join("\n")
}

/// Read financials back out of a tagged-report artifact.
pub fn from_artifact(value: &serde_json::Value) -> Option<Financials> {
    let financials = value.get("financials")?;
    if financials.is_null() {
        return None;
    }
    match serde_json::from_value(financials.clone()) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            tracing::warn!(error = %err, "ignoring unreadable financials block");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const TABLE: &str = "\
code,YEAR,location,industry,employees,revenue,cost_of_sales,gross_profit,sga,operating_income,net_income,total_assets,net_assets,operating_cf,investing_cf,long_term_debt
1234,2024,Mito,General construction,204,12000,10800,1200,834,366,120,9000,1400,-50,-100,
1234,2023,Mito,General construction,198,10000,9000,1000,700,300,100,8000,1200,200,-80,600
9999,2024,Osaka,Civil,50,500,400,100,50,50,10,300,100,10,,
";

    fn write_table(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("financials.csv");
        fs::write(&path, TABLE).expect("write csv");
        path
    }

    #[test]
    fn rows_filtered_by_code_and_sorted_by_year() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fin = load_financials(&write_table(dir.path()), "1234")
            .expect("load")
            .expect("company present");
        assert_eq!(fin.company.location.as_deref(), Some("Mito"));
        assert_eq!(fin.company.employees, Some(204.0));
        let years: Vec<i64> = fin.years.iter().map(|y| y.year).collect();
        assert_eq!(years, vec![2023, 2024]);
    }

    #[test]
    fn company_info_comes_from_the_latest_year() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("moved.csv");
        fs::write(
            &path,
            "code,YEAR,location,market,employees,revenue\n\
             5555,2024,Tsukuba,Prime,310,900\n\
             5555,2022,Mito,Standard,240,700\n\
             5555,2023,Hitachi,Standard,280,800\n",
        )
        .expect("write csv");
        let fin = load_financials(&path, "5555").expect("load").expect("company present");
        assert_eq!(fin.company.location.as_deref(), Some("Tsukuba"));
        assert_eq!(fin.company.market.as_deref(), Some("Prime"));
        assert_eq!(fin.company.employees, Some(310.0));
        assert_eq!(fin.latest().map(|y| y.year), Some(2024));
    }

    #[test]
    fn unknown_company_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_financials(&write_table(dir.path()), "0000").expect("load").is_none());
    }

    #[test]
    fn indices_use_prior_year() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fin = load_financials(&write_table(dir.path()), "1234")
            .expect("load")
            .expect("company present");
        let first = &fin.years[0].indices;
        assert_eq!(first.gross_margin, Some(10.0));
        assert_eq!(first.revenue_growth, None);
        assert_eq!(first.de_ratio, Some(0.5));

        let latest = &fin.latest().expect("latest").indices;
        assert_eq!(latest.revenue_growth, Some(20.0));
        assert_eq!(latest.operating_margin, Some(3.05));
        assert_eq!(latest.equity_ratio, Some(15.56));
        assert_eq!(latest.free_cash_flow, Some(-150.0));
        // ROE averages opening and closing equity
        assert_eq!(latest.roe, Some(9.23));
        // zero and empty cells are missing, not zero
        assert_eq!(latest.de_ratio, None);
    }

    #[test]
    fn japanese_headers_are_accepted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fs.csv");
        fs::write(&path, "コード,YEAR,本社所在地,売上高,営業利益\n1234,2024,茨城,1000,50\n").expect("write");
        let fin = load_financials(&path, "1234").expect("load").expect("present");
        assert_eq!(fin.company.location.as_deref(), Some("茨城"));
        assert_eq!(fin.years[0].indices.operating_margin, Some(5.0));
    }

    #[test]
    fn missing_code_column_is_invalid_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fs.csv");
        fs::write(&path, "name,YEAR\nacme,2024\n").expect("write");
        assert!(matches!(
            load_financials(&path, "1234"),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn indices_text_lists_present_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fin = load_financials(&write_table(dir.path()), "9999")
            .expect("load")
            .expect("present");
        let text = indices_text(&fin);
        assert!(text.starts_with("Company: code 9999, location Osaka"));
        assert!(text.contains("FY2024: gross_margin 20"));
        assert!(!text.contains("revenue_growth"));
    }
}

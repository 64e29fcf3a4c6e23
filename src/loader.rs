//! Parses snapshot files (`.parquet` or `.csv`) into validated records.
//!
//! Every column is read as text and converted here, so the same validation applies whether the
//! file came from the hub (typed parquet) or from the local CSV cache.

use std::path::Path;

use anyhow::{Context, anyhow, bail};
use duckdb::Connection;

use crate::record::{Record, parse_bool_flag};

pub const REQUIRED_COLUMNS: [&str; 12] = [
    "drug",
    "brand",
    "formulation",
    "indication",
    "treatment_phase",
    "hospital_type",
    "pbs_code",
    "streamlined_code",
    "authority_method",
    "online_application",
    "schedule_year",
    "schedule_month",
];

/// One row as read from the file, before validation.
#[derive(Debug, Default, Clone)]
pub struct RawRecord {
    pub drug: Option<String>,
    pub brand: Option<String>,
    pub formulation: Option<String>,
    pub indication: Option<String>,
    pub treatment_phase: Option<String>,
    pub hospital_type: Option<String>,
    pub pbs_code: Option<String>,
    pub streamlined_code: Option<String>,
    pub authority_method: Option<String>,
    pub online_application: Option<String>,
    pub schedule_year: Option<String>,
    pub schedule_month: Option<String>,
}

impl RawRecord {
    pub fn validate(self) -> anyhow::Result<Record> {
        fn required(v: Option<String>, name: &str) -> anyhow::Result<String> {
            v.filter(|s| !s.is_empty())
                .ok_or_else(|| anyhow!("missing value for `{name}`"))
        }

        let schedule_year = required(self.schedule_year, "schedule_year")?;
        let schedule_year: i32 = schedule_year
            .trim()
            .parse()
            .with_context(|| format!("invalid schedule_year `{schedule_year}`"))?;

        let online_application = match self.online_application.as_deref() {
            None | Some("") => false,
            Some(v) => parse_bool_flag(v)
                .ok_or_else(|| anyhow!("invalid online_application flag `{v}`"))?,
        };

        Ok(Record {
            drug: required(self.drug, "drug")?,
            brand: required(self.brand, "brand")?,
            formulation: required(self.formulation, "formulation")?,
            indication: required(self.indication, "indication")?,
            treatment_phase: required(self.treatment_phase, "treatment_phase")?,
            hospital_type: required(self.hospital_type, "hospital_type")?,
            pbs_code: required(self.pbs_code, "pbs_code")?,
            streamlined_code: self.streamlined_code.filter(|s| !s.trim().is_empty()),
            authority_method: self.authority_method.unwrap_or_default(),
            online_application,
            schedule_year,
            schedule_month: self.schedule_month.unwrap_or_default(),
        })
    }
}

pub fn sql_escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

pub fn source_expr(input_path: &Path) -> anyhow::Result<String> {
    let escaped = sql_escape_path(input_path);
    let extension = input_path
        .extension()
        .and_then(|x| x.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match extension.as_str() {
        "parquet" => Ok(format!("read_parquet('{escaped}')")),
        // all_varchar keeps codes such as `01234` from being sniffed as integers.
        "csv" => Ok(format!(
            "read_csv_auto('{escaped}', header=true, all_varchar=true)"
        )),
        _ => bail!(
            "Unsupported snapshot extension for {}. Use .csv or .parquet",
            input_path.display()
        ),
    }
}

/// Reads and validates every row of `path`. Any invalid row fails the whole load.
pub fn load_snapshot_file(path: &Path) -> anyhow::Result<Vec<Record>> {
    let conn = Connection::open_in_memory().context("open duckdb")?;
    let source = source_expr(path)?;

    let columns = describe_columns(&conn, &source)
        .with_context(|| format!("read columns of {}", path.display()))?;
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !columns.iter().any(|have| have == c))
        .collect();
    if !missing.is_empty() {
        bail!(
            "{} is missing required column(s): {}",
            path.display(),
            missing.join(", ")
        );
    }

    let select = REQUIRED_COLUMNS
        .iter()
        .map(|c| format!("CAST(\"{c}\" AS VARCHAR)"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {select} FROM {source}");

    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("prepare snapshot query for {}", path.display()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RawRecord {
                drug: row.get(0)?,
                brand: row.get(1)?,
                formulation: row.get(2)?,
                indication: row.get(3)?,
                treatment_phase: row.get(4)?,
                hospital_type: row.get(5)?,
                pbs_code: row.get(6)?,
                streamlined_code: row.get(7)?,
                authority_method: row.get(8)?,
                online_application: row.get(9)?,
                schedule_year: row.get(10)?,
                schedule_month: row.get(11)?,
            })
        })
        .with_context(|| format!("query {}", path.display()))?;

    let mut records = Vec::new();
    for (i, row) in rows.enumerate() {
        let raw = row.with_context(|| format!("read row {i} of {}", path.display()))?;
        let record = raw
            .validate()
            .with_context(|| format!("invalid row {i} in {}", path.display()))?;
        records.push(record);
    }

    tracing::debug!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

fn describe_columns(conn: &Connection, source: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("DESCRIBE SELECT * FROM {source}"))?;
    let rows = stmt.query_map([], |row| row.get::<usize, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn raw() -> RawRecord {
        RawRecord {
            drug: Some("adalimumab".into()),
            brand: Some("Humira".into()),
            formulation: Some("Injection 40 mg".into()),
            indication: Some("Rheumatoid arthritis".into()),
            treatment_phase: Some("Initial 1".into()),
            hospital_type: Some("Any".into()),
            pbs_code: Some("12345K".into()),
            streamlined_code: Some("  ".into()),
            authority_method: Some("Written".into()),
            online_application: Some("True".into()),
            schedule_year: Some(" 2024".into()),
            schedule_month: Some("AUGUST".into()),
        }
    }

    #[test]
    fn validate_normalises_optional_columns() {
        let r = raw().validate().unwrap();
        assert_eq!(r.streamlined_code, None);
        assert!(r.online_application);
        assert_eq!(r.schedule_year, 2024);
    }

    #[test]
    fn validate_rejects_missing_filter_value() {
        let mut bad = raw();
        bad.brand = None;
        let err = bad.validate().unwrap_err();
        assert!(err.to_string().contains("brand"), "{err}");

        let mut blank = raw();
        blank.indication = Some(String::new());
        assert!(blank.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_year_and_flag() {
        let mut bad_year = raw();
        bad_year.schedule_year = Some("twenty".into());
        assert!(bad_year.validate().is_err());

        let mut bad_flag = raw();
        bad_flag.online_application = Some("sometimes".into());
        assert!(bad_flag.validate().is_err());
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(source_expr(Path::new("records.xlsx")).is_err());
    }

    #[test]
    fn loads_csv_and_keeps_leading_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "{}", REQUIRED_COLUMNS.join(",")).unwrap();
        writeln!(
            f,
            "etanercept,Enbrel,Injection 50 mg,Rheumatoid arthritis,Continuing,Any,01234,9876,Streamlined,false,2024,JULY"
        )
        .unwrap();
        writeln!(
            f,
            "adalimumab,Humira,Injection 40 mg,Psoriatic arthritis,Initial 1,Public,5678X,,Written,true,2024,JULY"
        )
        .unwrap();
        drop(f);

        let records = load_snapshot_file(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pbs_code, "01234");
        assert_eq!(records[0].streamlined_code.as_deref(), Some("9876"));
        assert_eq!(records[1].streamlined_code, None);
        assert!(records[1].online_application);
        assert_eq!(records[1].hospital_type, "Public");
    }

    #[test]
    fn missing_column_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        std::fs::write(&path, "drug,brand\nA,X\n").unwrap();
        let err = load_snapshot_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("formulation"), "{err:#}");
    }
}

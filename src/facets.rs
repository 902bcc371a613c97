use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// MIP table of a record, ordered by selection priority. The vocabulary is
/// deliberately closed: a value outside it means the priority table needs to
/// be extended, so parsing fails rather than misordering silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableKind {
    Eday,
    Day,
    Oday,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Eday => write!(f, "Eday"),
            TableKind::Day => write!(f, "day"),
            TableKind::Oday => write!(f, "Oday"),
        }
    }
}

impl FromStr for TableKind {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Eday" => Ok(TableKind::Eday),
            "day" => Ok(TableKind::Day),
            "Oday" => Ok(TableKind::Oday),
            other => Err(FetchError::UnknownTableKind(other.to_string())),
        }
    }
}

/// Grid label of a record, ordered by selection priority: the native grid
/// first, then regridded variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GridLabel {
    Gn,
    Gr,
    Gr1,
    Gr2,
    Gr3,
    Gr4,
    Gr5,
    Gr6,
    Gr7,
    Gr8,
    Gr9,
}

impl fmt::Display for GridLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GridLabel::Gn => "gn",
            GridLabel::Gr => "gr",
            GridLabel::Gr1 => "gr1",
            GridLabel::Gr2 => "gr2",
            GridLabel::Gr3 => "gr3",
            GridLabel::Gr4 => "gr4",
            GridLabel::Gr5 => "gr5",
            GridLabel::Gr6 => "gr6",
            GridLabel::Gr7 => "gr7",
            GridLabel::Gr8 => "gr8",
            GridLabel::Gr9 => "gr9",
        };
        write!(f, "{label}")
    }
}

impl FromStr for GridLabel {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "gn" => Ok(GridLabel::Gn),
            "gr" => Ok(GridLabel::Gr),
            "gr1" => Ok(GridLabel::Gr1),
            "gr2" => Ok(GridLabel::Gr2),
            "gr3" => Ok(GridLabel::Gr3),
            "gr4" => Ok(GridLabel::Gr4),
            "gr5" => Ok(GridLabel::Gr5),
            "gr6" => Ok(GridLabel::Gr6),
            "gr7" => Ok(GridLabel::Gr7),
            "gr8" => Ok(GridLabel::Gr8),
            "gr9" => Ok(GridLabel::Gr9),
            other => Err(FetchError::UnknownGridLabel(other.to_string())),
        }
    }
}

/// Publication version of a dataset, a `vYYYYMMDD` stamp. Records carrying a
/// stamp that does not parse are skipped during grouping, so this parse
/// failure is recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionStamp {
    date: NaiveDate,
}

impl VersionStamp {
    pub fn parse(value: &str) -> Result<Self, FetchError> {
        let digits = value
            .strip_prefix('v')
            .ok_or_else(|| FetchError::InvalidVersionStamp(value.to_string()))?;
        let date = NaiveDate::parse_from_str(digits, "%Y%m%d")
            .map_err(|_| FetchError::InvalidVersionStamp(value.to_string()))?;
        Ok(Self { date })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.date.format("%Y%m%d"))
    }
}

impl FromStr for VersionStamp {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        VersionStamp::parse(value)
    }
}

static FILE_DATE_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_(\d{8})-(\d{8})(?:\.[A-Za-z0-9]+)*$").expect("valid date range pattern")
});

/// Extract the temporal coverage from a filename such as
/// `tos_Oday_AWI-CM-1-1-MR_historical_r1i1p1f1_gn_18500101-18501231.nc`.
pub fn file_date_range(file_name: &str) -> Result<(NaiveDate, NaiveDate), FetchError> {
    let captures = FILE_DATE_RANGE
        .captures(file_name)
        .ok_or_else(|| FetchError::InvalidFileDateRange(file_name.to_string()))?;
    let parse = |digits: &str| {
        NaiveDate::parse_from_str(digits, "%Y%m%d")
            .map_err(|_| FetchError::InvalidFileDateRange(file_name.to_string()))
    };
    Ok((parse(&captures[1])?, parse(&captures[2])?))
}

/// Filename with every extension removed, the canonical identity of a file
/// hit across mirrors.
pub fn file_stem(file_name: &str) -> &str {
    match file_name.find('.') {
        Some(idx) => &file_name[..idx],
        None => file_name,
    }
}

pub fn format_file_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Year-span overlap used by temporal filtering. The file's last year may sit
/// exactly on the span's lower bound and still count; its first year must be
/// strictly below the span's upper bound.
pub fn overlapping_years(
    file_start: i32,
    file_end: i32,
    span_start: i32,
    span_stop: i32,
) -> bool {
    file_start < span_stop && file_end >= span_start
}

/// One federation-wide search request. Empty lists leave the facet
/// unconstrained; values within one facet are ORed by the search endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FacetQuery {
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub experiments: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub tables: Vec<String>,
}

fn default_project() -> String {
    "CMIP6".to_string()
}

impl Default for FacetQuery {
    fn default() -> Self {
        Self {
            project: default_project(),
            models: Vec::new(),
            experiments: Vec::new(),
            members: Vec::new(),
            variables: Vec::new(),
            tables: Vec::new(),
        }
    }
}

impl FacetQuery {
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("project".to_string(), self.project.clone())];
        for (facet, values) in [
            ("source_id", &self.models),
            ("experiment_id", &self.experiments),
            ("member_id", &self.members),
            ("variable", &self.variables),
            ("table_id", &self.tables),
        ] {
            if !values.is_empty() {
                pairs.push((facet.to_string(), values.join(",")));
            }
        }
        pairs
    }
}

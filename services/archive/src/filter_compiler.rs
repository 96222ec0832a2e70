//! Search filter compilation.
//!
//! A sparse [`SearchFilters`] value is turned into a [`CompiledFilter`]: a
//! conjunction of conditions with positional `$n` placeholders and the
//! matching ordered parameter list. Each searchable field has exactly one
//! entry in [`FILTER_RULES`], which decides the columns it touches and how
//! it matches. The same compiled conditions can be rendered to SQL or
//! evaluated in memory against a [`StorageRow`].

use crate::metadata_store::Page;
use crate::recording::{Column, RowValue, StorageRow, ALL_COLUMNS, RECORDINGS_TABLE};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Deserialize;

/// Optional search criteria. Absent or empty fields do not constrain results.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    pub id: Option<String>,
    pub recording_id: Option<String>,
    pub attributes: Option<String>,
    /// Matched against both participant columns
    pub agent_name: Option<String>,
    /// Inclusive start day (`YYYY-MM-DD`)
    pub date_from: Option<String>,
    /// Inclusive end day (`YYYY-MM-DD`), through 23:59:59.999
    pub date_to: Option<String>,
    pub dnis: Option<String>,
    pub ani: Option<String>,
    pub workgroup: Option<String>,
    pub direction: Option<String>,
    pub media_type: Option<String>,
    pub recording_type: Option<String>,
    pub tags: Option<String>,
    pub min_duration: Option<String>,
    pub max_duration: Option<String>,
}

/// Searchable fields of [`SearchFilters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Id,
    RecordingId,
    Attributes,
    AgentName,
    DateFrom,
    DateTo,
    Dnis,
    Ani,
    Workgroup,
    Direction,
    MediaType,
    RecordingType,
    Tags,
    MinDuration,
    MaxDuration,
}

impl SearchFilters {
    /// The field's value, if it constrains the search
    pub fn value(&self, field: FilterField) -> Option<&str> {
        let value = match field {
            FilterField::Id => &self.id,
            FilterField::RecordingId => &self.recording_id,
            FilterField::Attributes => &self.attributes,
            FilterField::AgentName => &self.agent_name,
            FilterField::DateFrom => &self.date_from,
            FilterField::DateTo => &self.date_to,
            FilterField::Dnis => &self.dnis,
            FilterField::Ani => &self.ani,
            FilterField::Workgroup => &self.workgroup,
            FilterField::Direction => &self.direction,
            FilterField::MediaType => &self.media_type,
            FilterField::RecordingType => &self.recording_type,
            FilterField::Tags => &self.tags,
            FilterField::MinDuration => &self.min_duration,
            FilterField::MaxDuration => &self.max_duration,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// Trim every field, dropping whitespace-only values
    pub fn normalized(self) -> Self {
        fn trim(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            id: trim(self.id),
            recording_id: trim(self.recording_id),
            attributes: trim(self.attributes),
            agent_name: trim(self.agent_name),
            date_from: trim(self.date_from),
            date_to: trim(self.date_to),
            dnis: trim(self.dnis),
            ani: trim(self.ani),
            workgroup: trim(self.workgroup),
            direction: trim(self.direction),
            media_type: trim(self.media_type),
            recording_type: trim(self.recording_type),
            tags: trim(self.tags),
            min_duration: trim(self.min_duration),
            max_duration: trim(self.max_duration),
        }
    }

    /// True when no field constrains the search
    pub fn is_empty(&self) -> bool {
        FILTER_RULES.iter().all(|rule| self.value(rule.field).is_none())
    }
}

/// How a filter value is compared with its columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Column equals the value parsed as an integer
    IntegerEquals,
    /// Column contains the value, ignoring case
    ContainsIgnoreCase,
    /// Column equals the value exactly
    TextEquals,
    /// Column is at or after the start of the given day
    OnOrAfterDay,
    /// Column is at or before 23:59:59.999 on the given day
    OnOrBeforeEndOfDay,
    /// Column is at least the value parsed as an integer
    AtLeast,
    /// Column is at most the value parsed as an integer
    AtMost,
}

impl MatchKind {
    /// Parameter bound for a filter value
    fn parameter(self, value: &str) -> String {
        match self {
            MatchKind::ContainsIgnoreCase => format!("%{}%", escape_like(value)),
            _ => value.to_string(),
        }
    }

    fn clause(self, column: Column, placeholder: usize) -> String {
        let p = placeholder;
        match self {
            MatchKind::IntegerEquals => format!("{column} = ${p}::bigint"),
            MatchKind::ContainsIgnoreCase => format!("{column} ILIKE ${p}"),
            MatchKind::TextEquals => format!("{column} = ${p}"),
            MatchKind::OnOrAfterDay => {
                format!("{column} >= (${p}::date::timestamp AT TIME ZONE 'UTC')")
            }
            MatchKind::OnOrBeforeEndOfDay => {
                format!("{column} <= ((${p}::date + TIME '23:59:59.999') AT TIME ZONE 'UTC')")
            }
            MatchKind::AtLeast => format!("{column} >= ${p}::bigint"),
            MatchKind::AtMost => format!("{column} <= ${p}::bigint"),
        }
    }
}

/// One searchable field: the columns it applies to and its match rule.
/// With several columns the field matches if any column does.
#[derive(Debug)]
pub struct FilterRule {
    pub field: FilterField,
    pub kind: MatchKind,
    pub columns: &'static [Column],
}

pub static FILTER_RULES: [FilterRule; 15] = [
    FilterRule {
        field: FilterField::Id,
        kind: MatchKind::IntegerEquals,
        columns: &[Column::Id],
    },
    FilterRule {
        field: FilterField::RecordingId,
        kind: MatchKind::ContainsIgnoreCase,
        columns: &[Column::RecordingId],
    },
    FilterRule {
        field: FilterField::Attributes,
        kind: MatchKind::ContainsIgnoreCase,
        columns: &[Column::Attributes],
    },
    FilterRule {
        field: FilterField::AgentName,
        kind: MatchKind::ContainsIgnoreCase,
        columns: &[Column::FirstParticipant, Column::OtherParticipants],
    },
    FilterRule {
        field: FilterField::DateFrom,
        kind: MatchKind::OnOrAfterDay,
        columns: &[Column::RecordingDate],
    },
    FilterRule {
        field: FilterField::DateTo,
        kind: MatchKind::OnOrBeforeEndOfDay,
        columns: &[Column::RecordingDate],
    },
    FilterRule {
        field: FilterField::Dnis,
        kind: MatchKind::ContainsIgnoreCase,
        columns: &[Column::Dnis],
    },
    FilterRule {
        field: FilterField::Ani,
        kind: MatchKind::ContainsIgnoreCase,
        columns: &[Column::Ani],
    },
    FilterRule {
        field: FilterField::Workgroup,
        kind: MatchKind::TextEquals,
        columns: &[Column::Workgroup],
    },
    FilterRule {
        field: FilterField::Direction,
        kind: MatchKind::TextEquals,
        columns: &[Column::Direction],
    },
    FilterRule {
        field: FilterField::MediaType,
        kind: MatchKind::ContainsIgnoreCase,
        columns: &[Column::MediaType],
    },
    FilterRule {
        field: FilterField::RecordingType,
        kind: MatchKind::ContainsIgnoreCase,
        columns: &[Column::RecordingType],
    },
    FilterRule {
        field: FilterField::Tags,
        kind: MatchKind::ContainsIgnoreCase,
        columns: &[Column::Tags],
    },
    FilterRule {
        field: FilterField::MinDuration,
        kind: MatchKind::AtLeast,
        columns: &[Column::Duration],
    },
    FilterRule {
        field: FilterField::MaxDuration,
        kind: MatchKind::AtMost,
        columns: &[Column::Duration],
    },
];

/// An active filter field bound to its placeholder
#[derive(Debug, Clone)]
pub struct Condition {
    pub rule: &'static FilterRule,
    /// 1-based placeholder number
    pub placeholder: usize,
    /// The filter value as given
    pub value: String,
}

impl Condition {
    /// SQL for this condition
    pub fn sql(&self) -> String {
        let mut clauses: Vec<String> = self
            .rule
            .columns
            .iter()
            .map(|column| self.rule.kind.clause(*column, self.placeholder))
            .collect();

        if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            format!("({})", clauses.join(" OR "))
        }
    }

    fn operand(&self) -> Result<Operand> {
        let value = self.value.as_str();
        let operand = match self.rule.kind {
            MatchKind::IntegerEquals => Operand::IntegerEquals(parse_integer(value)?),
            MatchKind::AtLeast => Operand::AtLeast(parse_integer(value)?),
            MatchKind::AtMost => Operand::AtMost(parse_integer(value)?),
            MatchKind::ContainsIgnoreCase => Operand::Contains(value.to_lowercase()),
            MatchKind::TextEquals => Operand::Equals(value.to_string()),
            MatchKind::OnOrAfterDay => Operand::Since(start_of_day(parse_day(value)?)),
            MatchKind::OnOrBeforeEndOfDay => Operand::Until(end_of_day(parse_day(value)?)?),
        };
        Ok(operand)
    }
}

/// A filter compiled to positional conditions and parameters
#[derive(Debug, Clone, Default)]
pub struct CompiledFilter {
    conditions: Vec<Condition>,
    params: Vec<String>,
}

impl CompiledFilter {
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Bound parameters; `params()[n - 1]` belongs to placeholder `$n`
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// SQL predicate; `TRUE` when nothing is filtered
    pub fn predicate(&self) -> String {
        if self.conditions.is_empty() {
            return "TRUE".to_string();
        }

        self.conditions
            .iter()
            .map(Condition::sql)
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Evaluate the filter in memory with the same semantics as the SQL.
    ///
    /// Fails when a numeric or date value cannot be parsed. Dates are read
    /// only as `YYYY-MM-DD` or RFC 3339; PostgreSQL's `::date` cast also
    /// takes looser forms such as `Jan 15 2024` that are rejected here.
    pub fn matcher(&self) -> Result<RowMatcher> {
        let checks = self
            .conditions
            .iter()
            .map(|condition| Ok((condition.rule.columns, condition.operand()?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(RowMatcher { checks })
    }
}

/// Compile search filters into a parameterised predicate
pub fn compile(filters: &SearchFilters) -> CompiledFilter {
    let mut compiled = CompiledFilter::default();

    for rule in FILTER_RULES.iter() {
        if let Some(value) = filters.value(rule.field) {
            compiled.params.push(rule.kind.parameter(value));
            compiled.conditions.push(Condition {
                rule,
                placeholder: compiled.params.len(),
                value: value.to_string(),
            });
        }
    }

    compiled
}

/// Full select statement for a compiled filter, most recent first.
/// Paging placeholders follow the filter parameters.
pub fn select_sql(filter: &CompiledFilter, page: Option<Page>) -> String {
    let columns = ALL_COLUMNS
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "SELECT {columns} FROM {RECORDINGS_TABLE} WHERE {} ORDER BY {} DESC NULLS LAST, {} DESC",
        filter.predicate(),
        Column::RecordingDate,
        Column::Id,
    );

    if page.is_some() {
        let next = filter.params().len() + 1;
        sql.push_str(&format!(" LIMIT ${} OFFSET ${}", next, next + 1));
    }

    sql
}

#[derive(Debug, Clone)]
enum Operand {
    IntegerEquals(i64),
    AtLeast(i64),
    AtMost(i64),
    Contains(String),
    Equals(String),
    Since(DateTime<Utc>),
    Until(DateTime<Utc>),
}

impl Operand {
    fn accepts(&self, value: &RowValue) -> bool {
        // NULL never matches
        match (self, value) {
            (Operand::IntegerEquals(n), RowValue::Integer(Some(v))) => v == n,
            (Operand::AtLeast(n), RowValue::Integer(Some(v))) => v >= n,
            (Operand::AtMost(n), RowValue::Integer(Some(v))) => v <= n,
            (Operand::Contains(term), RowValue::Text(Some(v))) => v.to_lowercase().contains(term),
            (Operand::Equals(expected), RowValue::Text(Some(v))) => v == expected,
            (Operand::Since(start), RowValue::Timestamp(Some(ts))) => ts >= start,
            (Operand::Until(end), RowValue::Timestamp(Some(ts))) => ts <= end,
            _ => false,
        }
    }
}

/// In-memory evaluator for a [`CompiledFilter`]
#[derive(Debug, Clone)]
pub struct RowMatcher {
    checks: Vec<(&'static [Column], Operand)>,
}

impl RowMatcher {
    pub fn matches(&self, row: &StorageRow) -> bool {
        self.checks.iter().all(|(columns, operand)| {
            columns
                .iter()
                .any(|column| operand.accepts(&row.value(*column)))
        })
    }
}

/// Escape LIKE wildcards so the term matches literally
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_integer(value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| anyhow!("invalid input syntax for type bigint: \"{}\"", value))
}

fn parse_day(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .with_context(|| format!("invalid input syntax for type date: \"{}\"", value))
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

fn end_of_day(day: NaiveDate) -> Result<DateTime<Utc>> {
    let time = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .context("invalid end-of-day time")?;
    Ok(Utc.from_utc_datetime(&day.and_time(time)))
}

//! ADQL query construction for the archive TAP service.
//!
//! [`QueryBuilder`] assembles `select` statements from a table name, column
//! projection, filter constraints, an optional cone-search region, and an
//! optional row cap. Filter values are sanitized so string values are
//! single-quoted and numeric values pass through verbatim.

use chrono::NaiveDateTime;
use thiserror::Error;

/// Timestamp format accepted by time-interval constraints.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Filter keys from a retired query interface. Rejected with a pointer to
/// the cone-search parameters.
const LEGACY_COORD_KEYS: &[&str] = &["box", "coord1", "coord2"];

/// Errors raised while validating query arguments.
#[derive(Debug, Error)]
pub enum QueryBuildError {
    /// A retired coordinate filter key was supplied.
    #[error("'{key}' is no longer supported; use cone_ra, cone_dec and cone_radius instead")]
    LegacyCoordinateKey {
        /// The offending filter key.
        key: String,
    },

    /// Cone-search parameters were only partially supplied.
    #[error(
        "either all three of cone_ra, cone_dec, cone_radius are present or none of them \
         (got ra={ra:?}, dec={dec:?}, radius={radius:?})"
    )]
    IncompleteCone {
        /// Right ascension, degrees.
        ra: Option<f64>,
        /// Declination, degrees.
        dec: Option<f64>,
        /// Search radius, degrees.
        radius: Option<f64>,
    },

    /// A time bound did not parse.
    #[error("invalid timestamp '{value}': expected the format YYYY-MM-DD hh:mm:ss")]
    InvalidTimestamp {
        /// The rejected input.
        value: String,
    },

    /// The interval bounds are reversed or equal.
    #[error("start_time must be earlier than end_time (got start={start}, end={end})")]
    EmptyInterval {
        /// Interval start.
        start: String,
        /// Interval end.
        end: String,
    },
}

/// Quotes a filter value for interpolation into an ADQL predicate.
///
/// Values that parse as numbers are passed through verbatim; everything else
/// is single-quoted with embedded quotes doubled.
#[must_use]
pub fn sanitize_value(value: &str) -> String {
    if value.parse::<f64>().is_ok() {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}

/// Splits a comma-separated column list into trimmed names.
#[must_use]
pub fn split_column_list(columns: &str) -> Vec<String> {
    if columns.is_empty() {
        return Vec::new();
    }
    columns.split(',').map(|c| c.trim().to_string()).collect()
}

/// Builder for ADQL `select` statements.
///
/// # Example
///
/// ```
/// use esoarc_core::adql::QueryBuilder;
///
/// let query = QueryBuilder::new("ivoa.ObsCore")
///     .columns(&["target_name".into(), "dp_id".into()])
///     .constraint("obs_collection in ('VVV')")
///     .top(10)
///     .build()
///     .unwrap();
/// assert_eq!(
///     query,
///     "select top 10 target_name, dp_id from ivoa.ObsCore where obs_collection in ('VVV')"
/// );
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: String,
    columns: Vec<String>,
    constraints: Vec<String>,
    cone: Option<(f64, f64, f64)>,
    start_time: Option<String>,
    end_time: Option<String>,
    order_by: Option<(String, bool)>,
    top: Option<i64>,
    count_only: bool,
    invalid_cone: Option<(Option<f64>, Option<f64>, Option<f64>)>,
}

impl QueryBuilder {
    /// Creates a builder targeting `table`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
            cone: None,
            start_time: None,
            end_time: None,
            order_by: None,
            top: None,
            count_only: false,
            invalid_cone: None,
        }
    }

    /// Sets the column projection. An empty slice selects `*`.
    #[must_use]
    pub fn columns(mut self, columns: &[String]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    /// Adds a raw `where` constraint (already sanitized).
    #[must_use]
    pub fn constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// Adds an equality constraint for a filter key, sanitizing the value.
    #[must_use]
    pub fn filter(mut self, key: &str, value: &str) -> Self {
        self.constraints
            .push(format!("{key} = {}", sanitize_value(value)));
        self
    }

    /// Constrains results to a cone on the sky. All three values must be
    /// present or the builder fails at [`build`](Self::build).
    #[must_use]
    pub fn cone(mut self, ra: Option<f64>, dec: Option<f64>, radius: Option<f64>) -> Self {
        match (ra, dec, radius) {
            (Some(ra), Some(dec), Some(radius)) => self.cone = Some((ra, dec, radius)),
            (None, None, None) => self.cone = None,
            // Partial input is remembered so build() can report it.
            _ => self.invalid_cone = Some((ra, dec, radius)),
        }
        self
    }

    /// Constrains the exposure interval. Bounds use `YYYY-MM-DD hh:mm:ss`.
    #[must_use]
    pub fn time_interval(mut self, start: Option<String>, end: Option<String>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Orders the result by `column`, descending when `desc` is set.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, desc: bool) -> Self {
        self.order_by = Some((column.into(), desc));
        self
    }

    /// Caps the number of returned rows. Negative values disable the cap.
    #[must_use]
    pub fn top(mut self, limit: i64) -> Self {
        self.top = (limit >= 0).then_some(limit);
        self
    }

    /// Replaces the projection with `count(*)`.
    #[must_use]
    pub fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }

    /// Assembles the final query string.
    ///
    /// # Errors
    ///
    /// Returns [`QueryBuildError`] for partial cone parameters, malformed
    /// time bounds, or a reversed interval.
    pub fn build(self) -> Result<String, QueryBuildError> {
        if let Some((ra, dec, radius)) = self.invalid_cone {
            return Err(QueryBuildError::IncompleteCone { ra, dec, radius });
        }
        validate_interval(self.start_time.as_deref(), self.end_time.as_deref())?;

        let mut constraints = self.constraints.clone();
        if let Some((ra, dec, radius)) = self.cone {
            constraints.push(format!(
                "intersects(s_region, circle('ICRS', {ra}, {dec}, {radius}))=1"
            ));
        }
        if let Some(start) = &self.start_time {
            constraints.push(format!("date_obs >= '{start}'"));
        }
        if let Some(end) = &self.end_time {
            constraints.push(format!("date_obs <= '{end}'"));
        }

        let columns = if self.count_only {
            "count(*)".to_string()
        } else if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };

        let mut query = match self.top {
            Some(limit) => format!("select top {limit} {columns} from {}", self.table),
            None => format!("select {columns} from {}", self.table),
        };
        if !constraints.is_empty() {
            query.push_str(" where ");
            query.push_str(&constraints.join(" and "));
        }
        if let Some((column, desc)) = self.order_by {
            let direction = if desc { "desc" } else { "asc" };
            query.push_str(&format!(" order by {column} {direction}"));
        }
        Ok(query)
    }
}

/// Rejects filter maps that still use the retired coordinate keys.
///
/// # Errors
///
/// Returns [`QueryBuildError::LegacyCoordinateKey`] naming the first
/// offending key.
pub fn reject_legacy_keys<'a, I>(keys: I) -> Result<(), QueryBuildError>
where
    I: IntoIterator<Item = &'a str>,
{
    for key in keys {
        if LEGACY_COORD_KEYS.contains(&key) {
            return Err(QueryBuildError::LegacyCoordinateKey {
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_interval(start: Option<&str>, end: Option<&str>) -> Result<(), QueryBuildError> {
    for bound in [start, end].into_iter().flatten() {
        if NaiveDateTime::parse_from_str(bound, TIMESTAMP_FORMAT).is_err() {
            return Err(QueryBuildError::InvalidTimestamp {
                value: bound.to_string(),
            });
        }
    }
    if let (Some(start), Some(end)) = (start, end)
        && start >= end
    {
        return Err(QueryBuildError::EmptyInterval {
            start: start.to_string(),
            end: end.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_value_quotes_strings() {
        assert_eq!(sanitize_value("SCIENCE"), "'SCIENCE'");
        assert_eq!(sanitize_value("O'Neill"), "'O''Neill'");
    }

    #[test]
    fn test_sanitize_value_passes_numbers_through() {
        assert_eq!(sanitize_value("42"), "42");
        assert_eq!(sanitize_value("-3.5"), "-3.5");
    }

    #[test]
    fn test_split_column_list_trims_names() {
        assert_eq!(
            split_column_list("object, ra ,dec"),
            vec!["object", "ra", "dec"]
        );
        assert!(split_column_list("").is_empty());
    }

    #[test]
    fn test_build_defaults_to_star_projection() {
        let query = QueryBuilder::new("dbo.raw").build().unwrap();
        assert_eq!(query, "select * from dbo.raw");
    }

    #[test]
    fn test_build_with_top_and_constraints() {
        let query = QueryBuilder::new("dbo.raw")
            .filter("instrument", "NACO")
            .filter("exptime", "30")
            .top(100)
            .build()
            .unwrap();
        assert_eq!(
            query,
            "select top 100 * from dbo.raw where instrument = 'NACO' and exptime = 30"
        );
    }

    #[test]
    fn test_negative_top_disables_cap() {
        let query = QueryBuilder::new("dbo.raw").top(-1).build().unwrap();
        assert!(!query.contains("top"));
    }

    #[test]
    fn test_cone_constraint_rendered() {
        let query = QueryBuilder::new("ivoa.ObsCore")
            .cone(Some(150.0), Some(2.2), Some(0.1))
            .build()
            .unwrap();
        assert!(query.contains("intersects(s_region, circle('ICRS', 150, 2.2, 0.1))=1"));
    }

    #[test]
    fn test_partial_cone_rejected() {
        let result = QueryBuilder::new("ivoa.ObsCore")
            .cone(Some(150.0), None, Some(0.1))
            .build();
        assert!(matches!(result, Err(QueryBuildError::IncompleteCone { .. })));
    }

    #[test]
    fn test_count_only_projection() {
        let query = QueryBuilder::new("dbo.raw").count_only().build().unwrap();
        assert_eq!(query, "select count(*) from dbo.raw");
    }

    #[test]
    fn test_order_by_direction() {
        let query = QueryBuilder::new("dbo.raw")
            .order_by("date_obs", true)
            .build()
            .unwrap();
        assert!(query.ends_with("order by date_obs desc"));
    }

    #[test]
    fn test_time_interval_constraints() {
        let query = QueryBuilder::new("dbo.raw")
            .time_interval(
                Some("2020-01-01 00:00:00".to_string()),
                Some("2020-06-01 00:00:00".to_string()),
            )
            .build()
            .unwrap();
        assert!(query.contains("date_obs >= '2020-01-01 00:00:00'"));
        assert!(query.contains("date_obs <= '2020-06-01 00:00:00'"));
    }

    #[test]
    fn test_invalid_timestamp_rejected() {
        let result = QueryBuilder::new("dbo.raw")
            .time_interval(Some("2020-01-01".to_string()), None)
            .build();
        assert!(matches!(
            result,
            Err(QueryBuildError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_reversed_interval_rejected() {
        let result = QueryBuilder::new("dbo.raw")
            .time_interval(
                Some("2021-01-01 00:00:00".to_string()),
                Some("2020-01-01 00:00:00".to_string()),
            )
            .build();
        assert!(matches!(result, Err(QueryBuildError::EmptyInterval { .. })));
    }

    #[test]
    fn test_reject_legacy_keys() {
        let keys = ["instrument", "box"];
        let result = reject_legacy_keys(keys);
        assert!(matches!(
            result,
            Err(QueryBuildError::LegacyCoordinateKey { key }) if key == "box"
        ));
        assert!(reject_legacy_keys(["instrument"]).is_ok());
    }
}

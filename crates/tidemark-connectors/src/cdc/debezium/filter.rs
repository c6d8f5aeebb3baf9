//! Schema routing: origin detection, pass/stop filters and prefix rules.

use regex::Regex;

use tidemark_core::{Error, Result};

/// Compiled routing rules of one source.
#[derive(Debug, Clone, Default)]
pub struct SchemaRouting {
    origins: Vec<String>,
    pass: Vec<Regex>,
    stop: Vec<Regex>,
    trim_prefix: Option<String>,
    add_prefix: Option<String>,
}

/// Where an upstream schema lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Target schema name.
    pub schema: String,
    /// Origin tag, empty when none matched.
    pub origin: String,
}

impl SchemaRouting {
    /// Compiles routing rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a filter is not a valid regular expression.
    pub fn new(
        origins: &[String],
        pass: &[String],
        stop: &[String],
        trim_prefix: Option<&str>,
        add_prefix: Option<&str>,
    ) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p)
                        .map_err(|e| Error::Config(format!("invalid schema filter '{p}': {e}")))
                })
                .collect()
        };
        let mut origins = origins.to_vec();
        // Longest first so `a_b` wins over `a` for schema `a_b_x`.
        origins.sort_by_key(|o| std::cmp::Reverse(o.len()));
        Ok(Self {
            origins,
            pass: compile(pass)?,
            stop: compile(stop)?,
            trim_prefix: trim_prefix.filter(|p| !p.is_empty()).map(String::from),
            add_prefix: add_prefix.filter(|p| !p.is_empty()).map(String::from),
        })
    }

    /// Routes an upstream schema.
    ///
    /// A leading `<origin>_` becomes the origin tag. Filters then apply to
    /// the remaining name; finally the trim prefix is removed and the add
    /// prefix prepended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FilterReject`] if the schema is excluded.
    pub fn route(&self, upstream: &str) -> Result<Route> {
        let (origin, schema) = self
            .origins
            .iter()
            .find_map(|o| {
                upstream
                    .strip_prefix(o.as_str())
                    .and_then(|rest| rest.strip_prefix('_'))
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (o.clone(), rest))
            })
            .unwrap_or((String::new(), upstream));

        if !self.pass.is_empty() && !self.pass.iter().any(|r| r.is_match(schema)) {
            return Err(Error::FilterReject(format!(
                "schema '{schema}' matches no pass filter"
            )));
        }
        if let Some(r) = self.stop.iter().find(|r| r.is_match(schema)) {
            return Err(Error::FilterReject(format!(
                "schema '{schema}' matches stop filter '{}'",
                r.as_str()
            )));
        }

        let trimmed = self
            .trim_prefix
            .as_deref()
            .and_then(|p| schema.strip_prefix(p))
            .filter(|s| !s.is_empty())
            .unwrap_or(schema);
        let schema = match &self.add_prefix {
            Some(p) => format!("{p}{trimmed}"),
            None => trimmed.to_string(),
        };
        Ok(Route { schema, origin })
    }
}

//! Table identifiers and logical column types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sql::quote_ident;

/// Largest declared length `PostgreSQL` accepts for `varchar(n)`.
pub const PG_VARCHAR_LIMIT: i64 = 10_485_760;

/// Size recorded for `text` columns; renders back as `text`.
pub const UNBOUNDED_VARCHAR: i64 = PG_VARCHAR_LIMIT + 1;

/// Suffix of the history relation name.
pub const HISTORY_SUFFIX: &str = "__";

/// Prefix reserved for bookkeeping columns.
pub const RESERVED_PREFIX: &str = "__";

/// `(schema, table)` pair naming one logical table.
///
/// Each logical table is stored as a current relation `"schema"."table"`
/// and a history relation `"schema"."table__"` partitioned by year.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
}

impl TableId {
    /// Creates a table identifier.
    #[must_use]
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Quoted name of the current relation.
    #[must_use]
    pub fn current_sql(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Unquoted name of the history relation.
    #[must_use]
    pub fn history_name(&self) -> String {
        format!("{}{HISTORY_SUFFIX}", self.table)
    }

    /// Quoted name of the history relation.
    #[must_use]
    pub fn history_sql(&self) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.schema),
            quote_ident(&self.history_name())
        )
    }

    /// Unquoted name of the history partition holding `year`.
    #[must_use]
    pub fn partition_name(&self, year: i32) -> String {
        format!("{}{HISTORY_SUFFIX}{year}", self.table)
    }

    /// Quoted name of the history partition holding `year`.
    #[must_use]
    pub fn partition_sql(&self, year: i32) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.schema),
            quote_ident(&self.partition_name(year))
        )
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Logical data type of a user column.
///
/// The size that accompanies a type lives in [`ColumnType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    /// `boolean`
    Boolean,
    /// Signed integer; size 2, 4 or 8 bytes.
    Integer,
    /// IEEE float; size 4 or 8 bytes.
    Float,
    /// Arbitrary precision `numeric`.
    Numeric,
    /// Character data; size is the maximum length in characters.
    Varchar,
    /// `date`
    Date,
    /// `time without time zone`
    Time,
    /// `time with time zone`
    TimeTz,
    /// `timestamp without time zone`
    Timestamp,
    /// `timestamp with time zone`
    TimestampTz,
    /// `uuid`
    Uuid,
    /// `jsonb`
    Json,
}

impl DataType {
    /// Returns `true` for the integer and float families.
    #[must_use]
    pub fn is_sized_number(self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Numeric => "numeric",
            DataType::Varchar => "varchar",
            DataType::Date => "date",
            DataType::Time => "time",
            DataType::TimeTz => "timetz",
            DataType::Timestamp => "timestamp",
            DataType::TimestampTz => "timestamptz",
            DataType::Uuid => "uuid",
            DataType::Json => "json",
        };
        f.write_str(s)
    }
}

/// A data type together with its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnType {
    /// Logical type.
    pub data_type: DataType,
    /// Bytes for integers and floats, characters for varchar, otherwise 0.
    pub size: i64,
}

impl ColumnType {
    /// Creates a column type.
    #[must_use]
    pub const fn new(data_type: DataType, size: i64) -> Self {
        Self { data_type, size }
    }

    /// Creates a varchar type of `len` characters.
    #[must_use]
    pub const fn varchar(len: i64) -> Self {
        Self::new(DataType::Varchar, len)
    }

    /// Creates a type whose size is not meaningful.
    #[must_use]
    pub const fn unsized_type(data_type: DataType) -> Self {
        Self::new(data_type, 0)
    }

    /// Renders the `PostgreSQL` type used in DDL.
    #[must_use]
    pub fn sql_type(&self) -> String {
        match self.data_type {
            DataType::Boolean => "boolean".to_string(),
            DataType::Integer => match self.size {
                0..=2 => "smallint".to_string(),
                3..=4 => "integer".to_string(),
                _ => "bigint".to_string(),
            },
            DataType::Float => {
                if self.size <= 4 {
                    "real".to_string()
                } else {
                    "double precision".to_string()
                }
            }
            DataType::Numeric => "numeric".to_string(),
            DataType::Varchar => {
                if self.size > PG_VARCHAR_LIMIT {
                    "text".to_string()
                } else {
                    format!("varchar({})", self.size.max(1))
                }
            }
            DataType::Date => "date".to_string(),
            DataType::Time => "time without time zone".to_string(),
            DataType::TimeTz => "time with time zone".to_string(),
            DataType::Timestamp => "timestamp without time zone".to_string(),
            DataType::TimestampTz => "timestamp with time zone".to_string(),
            DataType::Uuid => "uuid".to_string(),
            DataType::Json => "jsonb".to_string(),
        }
    }

    /// Longest text form `PostgreSQL` produces for a value of this type.
    ///
    /// Numeric and json have no bound and report [`UNBOUNDED_VARCHAR`].
    #[must_use]
    pub fn text_width(&self) -> i64 {
        match self.data_type {
            DataType::Boolean => 5,
            DataType::Integer => match self.size {
                0..=2 => 6,
                3..=4 => 11,
                _ => 20,
            },
            DataType::Float => {
                if self.size <= 4 {
                    15
                } else {
                    24
                }
            }
            DataType::Varchar => self.size,
            DataType::Date => 13,
            DataType::Time => 15,
            DataType::TimeTz => 21,
            DataType::Timestamp => 32,
            DataType::TimestampTz => 41,
            DataType::Uuid => 36,
            DataType::Numeric | DataType::Json => UNBOUNDED_VARCHAR,
        }
    }

    /// Maps an `information_schema.columns` row back to a column type.
    ///
    /// Returns `None` for types this system never creates.
    #[must_use]
    pub fn from_information_schema(data_type: &str, char_max_len: Option<i64>) -> Option<Self> {
        let t = match data_type {
            "boolean" => Self::unsized_type(DataType::Boolean),
            "smallint" => Self::new(DataType::Integer, 2),
            "integer" => Self::new(DataType::Integer, 4),
            "bigint" => Self::new(DataType::Integer, 8),
            "real" => Self::new(DataType::Float, 4),
            "double precision" => Self::new(DataType::Float, 8),
            "numeric" => Self::unsized_type(DataType::Numeric),
            "character varying" => Self::varchar(char_max_len.unwrap_or(UNBOUNDED_VARCHAR)),
            "text" => Self::varchar(UNBOUNDED_VARCHAR),
            "date" => Self::unsized_type(DataType::Date),
            "time without time zone" => Self::unsized_type(DataType::Time),
            "time with time zone" => Self::unsized_type(DataType::TimeTz),
            "timestamp without time zone" => Self::unsized_type(DataType::Timestamp),
            "timestamp with time zone" => Self::unsized_type(DataType::TimestampTz),
            "uuid" => Self::unsized_type(DataType::Uuid),
            "json" | "jsonb" => Self::unsized_type(DataType::Json),
            _ => return None,
        };
        Some(t)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if matches!(self.data_type, DataType::Integer | DataType::Float | DataType::Varchar) {
            write!(f, "{}({})", self.data_type, self.size)
        } else {
            write!(f, "{}", self.data_type)
        }
    }
}

/// Returns `true` if `name` is reserved for bookkeeping columns.
#[must_use]
pub fn is_reserved_column(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_relation_names() {
        let t = TableId::new("src", "orders");
        assert_eq!(t.current_sql(), "\"src\".\"orders\"");
        assert_eq!(t.history_sql(), "\"src\".\"orders__\"");
        assert_eq!(t.partition_sql(2024), "\"src\".\"orders__2024\"");
        assert_eq!(t.to_string(), "src.orders");
    }

    #[test]
    fn test_sql_types() {
        assert_eq!(ColumnType::new(DataType::Integer, 2).sql_type(), "smallint");
        assert_eq!(ColumnType::new(DataType::Integer, 8).sql_type(), "bigint");
        assert_eq!(ColumnType::new(DataType::Float, 4).sql_type(), "real");
        assert_eq!(
            ColumnType::new(DataType::Float, 8).sql_type(),
            "double precision"
        );
        assert_eq!(ColumnType::varchar(0).sql_type(), "varchar(1)");
        assert_eq!(ColumnType::varchar(25).sql_type(), "varchar(25)");
        assert_eq!(ColumnType::varchar(UNBOUNDED_VARCHAR).sql_type(), "text");
    }

    #[test]
    fn test_information_schema_mapping() {
        for t in [
            ColumnType::new(DataType::Integer, 4),
            ColumnType::new(DataType::Float, 8),
            ColumnType::varchar(40),
            ColumnType::unsized_type(DataType::TimestampTz),
            ColumnType::unsized_type(DataType::Uuid),
            ColumnType::unsized_type(DataType::Json),
        ] {
            let len = (t.data_type == DataType::Varchar).then_some(t.size);
            let back = ColumnType::from_information_schema(&t.sql_type_name(), len);
            assert_eq!(back, Some(t), "{t}");
        }
        assert_eq!(ColumnType::from_information_schema("tsvector", None), None);
    }

    #[test]
    fn test_text_width_covers_rendered_values() {
        let uuid = ColumnType::unsized_type(DataType::Uuid);
        assert_eq!(uuid.text_width(), 36);
        assert_eq!(
            ColumnType::new(DataType::Integer, 8).text_width(),
            i64::try_from(i64::MIN.to_string().len()).unwrap()
        );
        assert_eq!(ColumnType::varchar(7).text_width(), 7);
        assert!(ColumnType::unsized_type(DataType::Json).text_width() > PG_VARCHAR_LIMIT);
    }

    #[test]
    fn test_reserved_columns() {
        assert!(is_reserved_column("__id"));
        assert!(!is_reserved_column("_id"));
    }

    impl ColumnType {
        fn sql_type_name(&self) -> String {
            match self.data_type {
                DataType::Varchar => "character varying".to_string(),
                _ => self.sql_type(),
            }
        }
    }
}

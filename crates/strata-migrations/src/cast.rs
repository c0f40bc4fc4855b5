use crate::snapshot::SqlType;
use strata_core::quote_ident;

/// How a column type change behaves on existing data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastSafety {
    /// Every stored value converts
    Safe,
    /// Some stored values may fail to convert, the migration warns
    Unsafe,
    /// No conversion exists, the migration aborts
    Impossible,
}

pub fn cast_safety(from: &SqlType, to: &SqlType) -> CastSafety {
    use SqlType::*;

    if from.same_storage(to) {
        return CastSafety::Safe;
    }
    match (from, to) {
        (Geometry { .. }, Geometry { .. }) => CastSafety::Unsafe,
        (_, Text) | (_, Jsonb) => CastSafety::Safe,
        (Text, _) | (Jsonb, _) => CastSafety::Unsafe,

        (Integer, BigInt | BigSerial | Double) | (BigInt | BigSerial, Double) => CastSafety::Safe,
        (BigInt | BigSerial, Integer) | (Double, Integer | BigInt) => CastSafety::Unsafe,
        (Boolean, Integer | BigInt) => CastSafety::Safe,
        (Integer | BigInt | Double, Boolean) => CastSafety::Unsafe,

        (Date, Timestamp) => CastSafety::Safe,
        (Timestamp, Date | Time) => CastSafety::Unsafe,

        _ => CastSafety::Impossible,
    }
}

/// `USING` expression converting `column` into `to`
pub fn cast_expr(column: &str, from: &SqlType, to: &SqlType) -> String {
    cast_value(&quote_ident(column), from, to)
}

/// Same as [`cast_expr`] for an already rendered SQL expression
pub fn cast_value(column: &str, from: &SqlType, to: &SqlType) -> String {
    match (from, to) {
        (_, SqlType::Jsonb) => format!("to_jsonb({})", column),
        (SqlType::Jsonb, _) => format!("CAST({} #>> '{{}}' AS {})", column, to.sql()),
        (SqlType::Boolean, SqlType::BigInt) => {
            format!("CAST(CAST({} AS integer) AS bigint)", column)
        }
        (SqlType::Double, SqlType::Integer | SqlType::BigInt) => {
            format!("CAST(round({}) AS {})", column, to.sql())
        }
        _ => format!("CAST({} AS {})", column, to.sql()),
    }
}

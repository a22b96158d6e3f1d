//! Declared column type -> logical property type.
//!
//! Precedence: exact type name, then a parameterised `name(size[,scale])`
//! form, then `any`. A `BINARY(16) NOT NULL` column is a uuid.

use crate::property::{PropertyType, MAX_DECIMAL_SCALE};

fn integer(min: i64, max: i64) -> PropertyType {
    PropertyType::Integer { min_value: Some(min), max_value: Some(max) }
}

fn exact(name: &str) -> Option<PropertyType> {
    Some(match name {
        "integer" | "int" | "bigint" | "int8" | "int64" => PropertyType::integer(),
        "smallint" | "int2" => integer(i16::MIN as i64, i16::MAX as i64),
        "tinyint" => integer(0, 255),
        "mediumint" => integer(-8_388_608, 8_388_607),
        "real" | "float" | "double" | "double precision" | "numeric" | "decimal" => PropertyType::float(),
        "text" | "clob" | "varchar" | "char" | "nvarchar" | "nchar" | "string" | "character" => {
            PropertyType::text()
        }
        "boolean" | "bool" | "bit" => PropertyType::Boolean,
        "date" | "datetime" | "timestamp" | "time" => PropertyType::DateTime,
        "blob" | "binary" | "varbinary" => PropertyType::Binary { max_length: None },
        "uuid" | "guid" | "uniqueidentifier" => PropertyType::Uuid,
        "json" | "jsonb" => PropertyType::Json,
        _ => return None,
    })
}

/// Split `name(size[,scale])`.
fn parameterised(declared: &str) -> Option<(String, u32, Option<u32>)> {
    let open = declared.find('(')?;
    let close = declared.rfind(')')?;
    if close < open || !declared[close + 1..].trim().is_empty() {
        return None;
    }
    let name = normalize(&declared[..open]);
    let mut args = declared[open + 1..close].split(',').map(str::trim);
    let size = args.next()?.parse().ok()?;
    let scale = match args.next() {
        Some(s) => Some(s.parse().ok()?),
        None => None,
    };
    if args.next().is_some() {
        return None;
    }
    Some((name, size, scale))
}

fn normalize(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Map a declared SQLite column type.
pub fn map_column_type(declared: &str, not_null: bool) -> PropertyType {
    if let Some(t) = exact(&normalize(declared)) {
        return t;
    }
    let Some((name, size, scale)) = parameterised(declared) else {
        return PropertyType::Any;
    };
    let size_usize = size as usize;
    match name.as_str() {
        "varchar" | "char" | "nvarchar" | "nchar" | "character" | "character varying" | "varying character"
        | "native character" | "text" => PropertyType::Text {
            min_length: None,
            max_length: Some(size_usize),
            regex: None,
        },
        "binary" | "varbinary" | "blob" if size == 16 && not_null => PropertyType::Uuid,
        "binary" | "varbinary" | "blob" => PropertyType::Binary { max_length: Some(size_usize) },
        "decimal" | "numeric" => match scale {
            None | Some(0) => PropertyType::integer(),
            Some(s) => PropertyType::Decimal {
                scale: s.min(MAX_DECIMAL_SCALE),
                min_value: None,
                max_value: None,
            },
        },
        "float" | "real" | "double" => PropertyType::float(),
        "int" | "integer" | "bigint" => PropertyType::integer(),
        _ => PropertyType::Any,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_types() {
        assert_eq!(map_column_type("INTEGER", false), PropertyType::integer());
        assert_eq!(
            map_column_type("SMALLINT", false),
            PropertyType::Integer { min_value: Some(-32768), max_value: Some(32767) }
        );
        assert_eq!(
            map_column_type("VARCHAR(50)", false),
            PropertyType::Text { min_length: None, max_length: Some(50), regex: None }
        );
        assert_eq!(map_column_type("BINARY(16)", true), PropertyType::Uuid);
    }

    #[test]
    fn test_binary_16_nullable_is_binary() {
        assert_eq!(map_column_type("binary(16)", false), PropertyType::Binary { max_length: Some(16) });
    }

    #[test]
    fn test_parameterised_and_fallback() {
        assert_eq!(
            map_column_type("numeric(10, 2)", false),
            PropertyType::Decimal { scale: 2, min_value: None, max_value: None }
        );
        assert_eq!(map_column_type("Character  Varying(20)", false).type_name(), "text");
        assert_eq!(map_column_type("GEOMETRY", false), PropertyType::Any);
        assert_eq!(map_column_type("", false), PropertyType::Any);
        assert_eq!(map_column_type("varchar(x)", false), PropertyType::Any);
    }
}

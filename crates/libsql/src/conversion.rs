use bytes::Bytes;
use fleet_sql::{Rows, SqlParam};
use libsql::{Rows as LibsqlRows, Value, ValueType};

use crate::Error;

pub async fn convert_libsql_rows(mut libsql_rows: LibsqlRows) -> Result<Rows, Error> {
    let column_count = libsql_rows.column_count();
    let column_names = get_column_names(&libsql_rows, column_count);
    let column_types = get_column_types(&libsql_rows, column_count);
    let rows = get_row_values(&mut libsql_rows, column_count).await?;

    Ok(Rows {
        column_count: u16::try_from(column_count).map_err(|_| Error::InvalidColumnCount)?,
        column_names,
        column_types,
        rows,
    })
}

pub fn convert_params(params: Vec<SqlParam>) -> Vec<Value> {
    params
        .into_iter()
        .map(|p| match p {
            SqlParam::Null => Value::Null,
            SqlParam::Integer(i) => Value::Integer(i),
            SqlParam::Real(r) => Value::Real(r),
            SqlParam::Text(s) => Value::Text(s),
            SqlParam::Blob(b) => Value::Blob(b.to_vec()),
        })
        .collect()
}

fn get_column_names(rows: &LibsqlRows, column_count: i32) -> Vec<String> {
    (0..column_count)
        .map(|i| rows.column_name(i).unwrap_or_default().to_string())
        .collect()
}

// Types come from the first row's values, so an empty result set reports
// no types at all.
fn get_column_types(rows: &LibsqlRows, column_count: i32) -> Vec<String> {
    (0..column_count)
        .map(|i| match rows.column_type(i) {
            Ok(ValueType::Text) => "TEXT".to_string(),
            Ok(ValueType::Integer) => "INTEGER".to_string(),
            Ok(ValueType::Real) => "REAL".to_string(),
            Ok(ValueType::Blob) => "BLOB".to_string(),
            Ok(ValueType::Null) => "NULL".to_string(),
            Err(_) => String::new(),
        })
        .collect()
}

async fn get_row_values(
    rows: &mut LibsqlRows,
    column_count: i32,
) -> Result<Vec<Vec<SqlParam>>, Error> {
    let mut rows_vec = Vec::new();

    while let Some(row) = rows.next().await? {
        let mut row_vec = Vec::with_capacity(usize::try_from(column_count).unwrap_or_default());

        for i in 0..column_count {
            row_vec.push(match row.get_value(i)? {
                Value::Null => SqlParam::Null,
                Value::Integer(i) => SqlParam::Integer(i),
                Value::Real(r) => SqlParam::Real(r),
                Value::Text(s) => SqlParam::Text(s),
                Value::Blob(b) => SqlParam::Blob(Bytes::from(b)),
            });
        }

        rows_vec.push(row_vec);
    }

    Ok(rows_vec)
}

use crate::sql::base::table::{TableRef, quote_identifier};

/// `$1` is the exclusive lower bound, `$2` the limit.
pub fn list_keys(table: &TableRef) -> String {
    let key = table.quoted_key();
    format!(
        "SELECT {key}::bigint FROM {table} WHERE {key} > $1 ORDER BY {key} LIMIT $2",
        table = table.qualified()
    )
}

/// `$1` is a `bigint[]` of keys. Each row comes back as its JSON object text.
pub fn fetch_rows(table: &TableRef) -> String {
    let key = table.quoted_key();
    format!(
        "SELECT t.{key}::bigint, to_jsonb(t)::text FROM {table} AS t \
         WHERE t.{key} = ANY($1) ORDER BY t.{key}",
        table = table.qualified()
    )
}

/// Bulk upsert of a JSON array bound as `$1`.
///
/// Rows are expanded with the destination's own row type, so column types
/// come from the destination schema. Existing keys are overwritten with the
/// incoming values.
pub fn upsert_rows(table: &TableRef, columns: &[String]) -> String {
    let qualified = table.qualified();
    let key = table.quoted_key();
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");

    let assignments = columns
        .iter()
        .filter(|c| **c != table.key_column)
        .map(|c| {
            let c = quote_identifier(c);
            format!("{c} = EXCLUDED.{c}")
        })
        .collect::<Vec<_>>();

    let on_conflict = if assignments.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", assignments.join(", "))
    };

    format!(
        "INSERT INTO {qualified} ({column_list}) \
         SELECT {column_list} FROM jsonb_populate_recordset(NULL::{qualified}, $1::jsonb) \
         ON CONFLICT ({key}) {on_conflict}"
    )
}

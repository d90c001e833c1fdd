use async_trait::async_trait;
use serde_json::{Map, Value, json};

use weft_core::ActionError;

use crate::context::ActionContext;
use crate::strategy::ActionStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv;charset=utf-8",
            Self::Json => "application/json",
        }
    }

    fn default_filename(self) -> &'static str {
        match self {
            Self::Csv => "export.csv",
            Self::Json => "export.json",
        }
    }
}

/// `export_csv` / `export_json`: `{data, filename?, columns?}`. The file is
/// handed to the host through the runtime `download` callback.
#[derive(Debug, Clone, Copy)]
pub struct Export(pub ExportFormat);

#[async_trait]
impl ActionStrategy for Export {
    async fn execute(&self, cx: &ActionContext<'_>) -> Result<Value, ActionError> {
        let data = cx.param("data").ok_or_else(|| {
            ActionError::Validation(format!("{} requires data", cx.handler().action))
        })?;
        let filename = cx
            .param_str(&["filename"])
            .unwrap_or_else(|| self.0.default_filename().to_owned());

        let (bytes, rows) = match self.0 {
            ExportFormat::Json => {
                let rows = data.as_array().map_or(1, Vec::len);
                (serde_json::to_vec_pretty(&data)?, rows)
            }
            ExportFormat::Csv => {
                let Value::Array(rows) = &data else {
                    return Err(ActionError::Validation("export_csv data must be a list".into()));
                };
                let columns = match cx.param("columns") {
                    Some(Value::Array(cols)) => cols
                        .iter()
                        .filter_map(|c| c.as_str().map(str::to_owned))
                        .collect(),
                    _ => infer_columns(rows),
                };
                (to_csv(&columns, rows).into_bytes(), rows.len())
            }
        };

        cx.dispatcher()
            .runtime
            .download(&filename, self.0.content_type(), &bytes)?;
        Ok(json!({"filename": filename, "rows": rows}))
    }
}

/// Keys of every object row, in first-seen order.
fn infer_columns(rows: &[Value]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows.iter().filter_map(Value::as_object) {
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

fn to_csv(columns: &[String], rows: &[Value]) -> String {
    let empty = Map::new();
    let mut out = String::new();
    push_line(&mut out, columns.iter().map(String::as_str));
    for row in rows {
        let row = row.as_object().unwrap_or(&empty);
        let cells: Vec<String> = columns
            .iter()
            .map(|c| match row.get(c) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        push_line(&mut out, cells.iter().map(String::as_str));
    }
    out
}

fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push_str("\r\n");
}

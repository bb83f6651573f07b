//! Sheet collaborator consumed by the formula engine: cell storage,
//! the name table, and sheet-level attributes. The engine reads cells
//! and name definitions from here; it does not own recalculation order
//! or persistence.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::formula::value::{Coord, ErrorKind, NumberKind, TypedValue, Value, ValueType};

/// Stored contents of one cell: a data value plus its type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellData {
    pub value: Value,
    pub vtype: ValueType,
}

impl CellData {
    pub fn typed_value(&self) -> TypedValue {
        TypedValue {
            value: self.value.clone(),
            vtype: self.vtype,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    cells: FxHashMap<Coord, CellData>,
    /// Name definitions, keyed by the case-folded name. A definition is
    /// a coordinate ("A1"), a range ("A1:B3"), a formula ("=...") or a
    /// constant.
    names: FxHashMap<String, String>,
    last_row: usize,
    last_col: usize,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Sheet {
        Sheet {
            name: name.into(),
            ..Sheet::default()
        }
    }

    // ── cells ─────────────────────────────────────────────────────

    pub fn set_cell(&mut self, coord: Coord, value: TypedValue) {
        self.last_row = self.last_row.max(coord.row);
        self.last_col = self.last_col.max(coord.col);
        self.cells.insert(
            coord,
            CellData {
                value: value.value,
                vtype: value.vtype,
            },
        );
    }

    pub fn set_number(&mut self, coord: Coord, n: f64) {
        self.set_cell(coord, TypedValue::number(n));
    }

    pub fn set_text(&mut self, coord: Coord, s: impl Into<String>) {
        self.set_cell(coord, TypedValue::text(s));
    }

    pub fn set_logical(&mut self, coord: Coord, b: bool) {
        self.set_cell(coord, TypedValue::logical(b));
    }

    pub fn set_error(&mut self, coord: Coord, kind: ErrorKind) {
        self.set_cell(coord, TypedValue::error(kind));
    }

    pub fn set_date(&mut self, coord: Coord, serial: f64) {
        self.set_cell(coord, TypedValue::number_of_kind(serial, NumberKind::Date));
    }

    /// Set a cell from raw user input: numbers become numbers, TRUE and
    /// FALSE become logicals, error codes become errors, everything
    /// else is text. Empty input clears the cell.
    pub fn set_input(&mut self, coord: Coord, input: &str) {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            self.clear_cell(coord);
        } else if let Ok(n) = trimmed.parse::<f64>() {
            self.set_number(coord, n);
        } else if trimmed.eq_ignore_ascii_case("TRUE") {
            self.set_logical(coord, true);
        } else if trimmed.eq_ignore_ascii_case("FALSE") {
            self.set_logical(coord, false);
        } else if let Some(kind) = ErrorKind::from_code(trimmed) {
            self.set_error(coord, kind);
        } else {
            self.set_text(coord, trimmed);
        }
    }

    pub fn clear_cell(&mut self, coord: Coord) {
        self.cells.remove(&coord);
    }

    pub fn cell(&self, coord: &Coord) -> Option<&CellData> {
        self.cells.get(coord)
    }

    /// The value and type at a coordinate; unset cells are blank.
    pub fn value_and_type(&self, coord: &Coord) -> TypedValue {
        self.cells
            .get(coord)
            .map(CellData::typed_value)
            .unwrap_or_else(TypedValue::blank)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    // ── names ─────────────────────────────────────────────────────

    pub fn define_name(&mut self, name: &str, definition: impl Into<String>) {
        self.names.insert(name.to_uppercase(), definition.into());
    }

    pub fn delete_name(&mut self, name: &str) {
        self.names.remove(&name.to_uppercase());
    }

    /// Look up a name definition. Names are case-insensitive.
    pub fn name_definition(&self, name: &str) -> Option<&str> {
        self.names.get(&name.to_uppercase()).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // ── attributes ────────────────────────────────────────────────

    /// Highest row index ever written. Grows monotonically, the way a
    /// sheet's used-area attribute does.
    pub fn last_row(&self) -> usize {
        self.last_row
    }

    pub fn last_col(&self) -> usize {
        self.last_col
    }
}

// Lookup and reference built-ins: CHOOSE, INDEX, MATCH, HLOOKUP and
// VLOOKUP. The lookup scans are directional and linear; approximate
// matching remembers the last candidate that was still on the right
// side of the target and falls back to it once the scan crosses over.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;

use super::super::eval::Evaluator;
use super::super::value::{CellRef, Coord, ErrorKind, Operand, RangeRef, TypedValue};
use super::{next_scalar, number_arg, ArgList, Arity, FunctionDef, FunctionRegistry, Handler};

fn entry(handler: Handler, arity: Arity, arg_def: &'static str, help: &'static str) -> FunctionDef {
    FunctionDef {
        handler,
        arity,
        arg_def,
        help,
        class: "lookup",
        volatile: false,
    }
}

pub(crate) fn register(reg: &mut FunctionRegistry) {
    reg.register(
        "CHOOSE",
        entry(lookup_choose, Arity::AtLeast(2), "nv", "Pick an argument by index"),
    );
    reg.register(
        "INDEX",
        entry(lookup_index, Arity::AtLeast(1), "rnn", "Reference into a range by row and column"),
    );
    reg.register(
        "MATCH",
        entry(lookup_match, Arity::AtLeast(2), "vrn", "Position of a value in a vector"),
    );
    reg.register(
        "HLOOKUP",
        entry(
            lookup_table,
            Arity::AtLeast(3),
            "vrnl",
            "Search the first row, return from a later row",
        ),
    );
    reg.register(
        "VLOOKUP",
        entry(
            lookup_table,
            Arity::AtLeast(3),
            "vrnl",
            "Search the first column, return from a later column",
        ),
    );
}

/// Pop the next argument as a range reference.
pub(crate) fn range_arg(args: &mut ArgList, ev: &mut Evaluator<'_>) -> Option<RangeRef> {
    let op = args.next()?;
    match ev.resolve(op) {
        Operand::Range(range) => Some(range),
        Operand::Coord(cellref) => {
            let end = cellref.coord;
            Some(RangeRef::new(cellref, end))
        }
        _ => None,
    }
}

pub(crate) fn cell_at(ev: &mut Evaluator<'_>, range: &RangeRef, row: usize, col: usize) -> TypedValue {
    let coord = Coord::new(range.start.coord.col + col, range.start.coord.row + row);
    let cellref = CellRef {
        coord,
        sheet: range.start.sheet.clone(),
    };
    ev.cell_value(&cellref)
}

/// Compare a cell against the lookup target. Only values of the same
/// major class are comparable; everything else is skipped.
fn compare_cell(cell: &TypedValue, target: &TypedValue) -> Option<Ordering> {
    if cell.vtype.major() == 'n' && target.vtype.major() == 'n' {
        Some(
            OrderedFloat(cell.value.as_number()).cmp(&OrderedFloat(target.value.as_number())),
        )
    } else if cell.vtype.is_text() && target.vtype.is_text() {
        Some(
            cell.value
                .as_text()
                .to_lowercase()
                .cmp(&target.value.as_text().to_lowercase()),
        )
    } else {
        None
    }
}

fn lookup_choose(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let index = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if index < 1.0 {
        return Operand::error(ErrorKind::Value);
    }
    let index = index.trunc() as usize;
    let mut seen = 0usize;
    while let Some(op) = args.next() {
        seen += 1;
        if seen == index {
            return op;
        }
    }
    Operand::error(ErrorKind::Value)
}

fn lookup_index(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let range = match range_arg(args, ev) {
        Some(range) => range,
        None => return Operand::error(ErrorKind::Value),
    };
    let explicit_args = args.len();
    let mut row = 0usize;
    let mut col = 0usize;
    if !args.is_empty() {
        match number_arg(args, ev) {
            Ok(v) if v >= 0.0 => row = v.trunc() as usize,
            Ok(_) => return Operand::error(ErrorKind::Value),
            Err(e) => return e,
        }
    }
    if !args.is_empty() {
        match number_arg(args, ev) {
            Ok(v) if v >= 0.0 => col = v.trunc() as usize,
            Ok(_) => return Operand::error(ErrorKind::Value),
            Err(e) => return e,
        }
    }
    // A single index into a one-row range selects a column.
    if explicit_args == 1 && range.rows() == 1 && range.cols() > 1 {
        col = row;
        row = 0;
    }
    if row > range.rows() || col > range.cols() {
        return Operand::error(ErrorKind::Ref);
    }

    let start = range.start.coord;
    let sheet = range.start.sheet.clone();
    let sub = |c1: Coord, c2: Coord| -> Operand {
        if c1 == c2 {
            Operand::Coord(CellRef {
                coord: c1,
                sheet: sheet.clone(),
            })
        } else {
            Operand::Range(RangeRef::new(
                CellRef {
                    coord: c1,
                    sheet: sheet.clone(),
                },
                c2,
            ))
        }
    };
    match (row, col) {
        (0, 0) => sub(start, range.end),
        (r, 0) => sub(
            Coord::new(start.col, start.row + r - 1),
            Coord::new(range.end.col, start.row + r - 1),
        ),
        (0, c) => sub(
            Coord::new(start.col + c - 1, start.row),
            Coord::new(start.col + c - 1, range.end.row),
        ),
        (r, c) => sub(
            Coord::new(start.col + c - 1, start.row + r - 1),
            Coord::new(start.col + c - 1, start.row + r - 1),
        ),
    }
}

fn lookup_match(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 3 {
        return Operand::error(ErrorKind::Value);
    }
    let target = next_scalar(args, ev);
    if target.is_error() {
        return Operand::Typed(target);
    }
    let range = match range_arg(args, ev) {
        Some(range) => range,
        None => return Operand::error(ErrorKind::Value),
    };
    let match_type = if args.is_empty() {
        1.0
    } else {
        match number_arg(args, ev) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };

    let horizontal = range.rows() == 1;
    if !horizontal && range.cols() != 1 {
        return Operand::error(ErrorKind::Value);
    }
    let length = if horizontal { range.cols() } else { range.rows() };

    let mut fallback: Option<usize> = None;
    for i in 0..length {
        let cell = if horizontal {
            cell_at(ev, &range, 0, i)
        } else {
            cell_at(ev, &range, i, 0)
        };
        let ordering = match compare_cell(&cell, &target) {
            Some(ordering) => ordering,
            None => continue,
        };
        if match_type == 0.0 {
            if ordering == Ordering::Equal {
                return Operand::number((i + 1) as f64);
            }
        } else if match_type > 0.0 {
            // Ascending data: remember the last cell still <= target
            // and stop once the scan crosses over.
            if ordering == Ordering::Greater {
                break;
            }
            fallback = Some(i);
        } else {
            // Descending data: last cell still >= target.
            if ordering == Ordering::Less {
                break;
            }
            fallback = Some(i);
        }
    }
    match fallback {
        Some(i) if match_type != 0.0 => Operand::number((i + 1) as f64),
        _ => Operand::error(ErrorKind::NA),
    }
}

fn lookup_table(name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 4 {
        return Operand::error(ErrorKind::Value);
    }
    let target = next_scalar(args, ev);
    if target.is_error() {
        return Operand::Typed(target);
    }
    let range = match range_arg(args, ev) {
        Some(range) => range,
        None => return Operand::error(ErrorKind::Value),
    };
    let offset = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let approximate = if args.is_empty() {
        true
    } else {
        match number_arg(args, ev) {
            Ok(v) => v != 0.0,
            Err(e) => return e,
        }
    };

    if offset < 1.0 {
        return Operand::error(ErrorKind::Value);
    }
    let offset = offset.trunc() as usize;
    let vertical = name == "VLOOKUP";
    let lanes = if vertical { range.cols() } else { range.rows() };
    if offset > lanes {
        return Operand::error(ErrorKind::Ref);
    }

    let length = if vertical { range.rows() } else { range.cols() };
    let mut found: Option<usize> = None;
    for i in 0..length {
        let cell = if vertical {
            cell_at(ev, &range, i, 0)
        } else {
            cell_at(ev, &range, 0, i)
        };
        let ordering = match compare_cell(&cell, &target) {
            Some(ordering) => ordering,
            None => continue,
        };
        if approximate {
            // Sorted-ascending assumption: keep the greatest entry not
            // above the target, stop at the first one past it.
            if ordering == Ordering::Greater {
                break;
            }
            found = Some(i);
        } else if ordering == Ordering::Equal {
            found = Some(i);
            break;
        }
    }

    match found {
        Some(i) => {
            let tv = if vertical {
                cell_at(ev, &range, i, offset - 1)
            } else {
                cell_at(ev, &range, offset - 1, i)
            };
            Operand::Typed(tv)
        }
        None => Operand::error(ErrorKind::NA),
    }
}

#[cfg(test)]
mod tests {
    use crate::formula::eval::{evaluate_text, EvalContext, EvalResult};
    use crate::formula::value::{Coord, Value};
    use crate::sheet::Sheet;

    fn c(s: &str) -> Coord {
        Coord::parse(s).unwrap()
    }

    /// A1:B3 lookup table: (1, one), (3, three), (7, seven).
    fn table_sheet() -> Sheet {
        let mut sheet = Sheet::new("Sheet1");
        for (i, (k, v)) in [(1.0, "one"), (3.0, "three"), (7.0, "seven")].iter().enumerate() {
            sheet.set_number(Coord::new(0, i), *k);
            sheet.set_text(Coord::new(1, i), *v);
        }
        sheet
    }

    fn eval_on(sheet: &Sheet, text: &str) -> EvalResult {
        let mut ctx = EvalContext::new();
        evaluate_text(text, sheet, &mut ctx, false)
    }

    #[test]
    fn test_vlookup_approximate_falls_back_to_largest_not_above() {
        let sheet = table_sheet();
        let result = eval_on(&sheet, "VLOOKUP(5,A1:B3,2,TRUE())");
        assert_eq!(result.value, Value::Text("three".into()));
        // Exactly at a key.
        let result = eval_on(&sheet, "VLOOKUP(7,A1:B3,2,TRUE())");
        assert_eq!(result.value, Value::Text("seven".into()));
        // Below the first key there is nothing to fall back to.
        assert_eq!(eval_on(&sheet, "VLOOKUP(0,A1:B3,2,TRUE())").vtype, "e#N/A");
    }

    #[test]
    fn test_vlookup_exact() {
        let sheet = table_sheet();
        assert_eq!(
            eval_on(&sheet, "VLOOKUP(3,A1:B3,2,FALSE())").value,
            Value::Text("three".into())
        );
        assert_eq!(eval_on(&sheet, "VLOOKUP(5,A1:B3,2,FALSE())").vtype, "e#N/A");
    }

    #[test]
    fn test_vlookup_bad_offset_is_ref_error() {
        let sheet = table_sheet();
        assert_eq!(eval_on(&sheet, "VLOOKUP(3,A1:B3,3)").vtype, "e#REF!");
        assert_eq!(eval_on(&sheet, "VLOOKUP(3,A1:B3,0)").vtype, "e#VALUE!");
    }

    #[test]
    fn test_hlookup() {
        // Transposed table in A1:C2.
        let mut sheet = Sheet::new("Sheet1");
        for (i, (k, v)) in [(1.0, "one"), (3.0, "three"), (7.0, "seven")].iter().enumerate() {
            sheet.set_number(Coord::new(i, 0), *k);
            sheet.set_text(Coord::new(i, 1), *v);
        }
        assert_eq!(
            eval_on(&sheet, "HLOOKUP(4,A1:C2,2)").value,
            Value::Text("three".into())
        );
    }

    #[test]
    fn test_match_modes() {
        let sheet = table_sheet();
        assert_eq!(eval_on(&sheet, "MATCH(3,A1:A3,0)").value, Value::Number(2.0));
        assert_eq!(eval_on(&sheet, "MATCH(5,A1:A3,1)").value, Value::Number(2.0));
        assert_eq!(eval_on(&sheet, "MATCH(5,A1:A3)").value, Value::Number(2.0));
        assert_eq!(eval_on(&sheet, "MATCH(99,A1:A3,0)").vtype, "e#N/A");

        // Descending data with match type -1.
        let mut desc = Sheet::new("Sheet1");
        for (i, v) in [9.0, 5.0, 2.0].iter().enumerate() {
            desc.set_number(Coord::new(0, i), *v);
        }
        assert_eq!(eval_on(&desc, "MATCH(4,A1:A3,-1)").value, Value::Number(2.0));
    }

    #[test]
    fn test_match_text_is_case_insensitive() {
        let sheet = table_sheet();
        assert_eq!(
            eval_on(&sheet, "MATCH(\"THREE\",B1:B3,0)").value,
            Value::Number(2.0)
        );
    }

    #[test]
    fn test_choose() {
        let sheet = table_sheet();
        assert_eq!(
            eval_on(&sheet, "CHOOSE(2,\"a\",\"b\",\"c\")").value,
            Value::Text("b".into())
        );
        // References stay references until consumed.
        assert_eq!(eval_on(&sheet, "CHOOSE(1,A2,A3)").value, Value::Number(3.0));
        assert_eq!(eval_on(&sheet, "CHOOSE(5,\"a\")").vtype, "e#VALUE!");
    }

    #[test]
    fn test_index_forms() {
        let sheet = table_sheet();
        // Full addressing.
        assert_eq!(
            eval_on(&sheet, "INDEX(A1:B3,2,2)").value,
            Value::Text("three".into())
        );
        // Row selection feeds a series function.
        assert_eq!(eval_on(&sheet, "SUM(INDEX(A1:B3,3,0))").value, Value::Number(7.0));
        // Out of bounds.
        assert_eq!(eval_on(&sheet, "INDEX(A1:B3,4,1)").vtype, "e#REF!");
    }
}

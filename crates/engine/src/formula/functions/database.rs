// Database built-ins and the criteria mini-language. A criteria range
// filters database rows: conditions AND across columns within one
// criteria row and OR across criteria rows; the field values of
// matching rows feed the same accumulator the statistical functions
// use. COUNTIF and SUMIF share the criteria parser.

use std::cmp::Ordering;

use ordered_float::OrderedFloat;

use super::super::eval::Evaluator;
use super::super::value::{ErrorKind, Operand, RangeRef, TypedValue, Value, ValueType};
use super::lookup::{cell_at, range_arg};
use super::stat::SeriesAccum;
use super::{next_scalar, ArgList, Arity, FunctionDef, FunctionRegistry, Handler};

fn entry(handler: Handler, arity: Arity, arg_def: &'static str, help: &'static str) -> FunctionDef {
    FunctionDef {
        handler,
        arity,
        arg_def,
        help,
        class: "db",
        volatile: false,
    }
}

pub(crate) fn register(reg: &mut FunctionRegistry) {
    let db = |help| entry(db_fn, Arity::Exact(3), "rfc", help);
    reg.register("DAVERAGE", db("Mean of matching field values"));
    reg.register("DCOUNT", db("Counts matching numeric field values"));
    reg.register("DCOUNTA", db("Counts matching non-blank field values"));
    reg.register("DGET", db("The single matching field value"));
    reg.register("DMAX", db("Largest matching field value"));
    reg.register("DMIN", db("Smallest matching field value"));
    reg.register("DPRODUCT", db("Product of matching field values"));
    reg.register("DSTDEV", db("Sample standard deviation of matching field values"));
    reg.register("DSTDEVP", db("Population standard deviation of matching field values"));
    reg.register("DSUM", db("Sum of matching field values"));
    reg.register("DVAR", db("Sample variance of matching field values"));
    reg.register("DVARP", db("Population variance of matching field values"));

    reg.register(
        "COUNTIF",
        entry(countif_fn, Arity::Exact(2), "rc", "Counts cells meeting a criterion"),
    );
    reg.register(
        "SUMIF",
        entry(
            sumif_fn,
            Arity::AtLeast(2),
            "rcr",
            "Adds cells meeting a criterion, optionally from a second range",
        ),
    );
}

// ── criteria ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// One decoded criterion: a comparator plus the target in both numeric
/// and text form. Decoded once per criteria cell, never re-parsed per
/// candidate.
#[derive(Debug, Clone)]
pub(crate) struct Criterion {
    cmp: Cmp,
    number: Option<f64>,
    text: String,
}

impl Criterion {
    /// Decode a criteria cell: a comparator-prefixed string (">5",
    /// "<>Apple"), a bare value ("Apple", 5), or None for a blank cell
    /// (no constraint).
    pub(crate) fn parse(tv: &TypedValue) -> Option<Criterion> {
        match tv.vtype {
            ValueType::Blank => None,
            ValueType::Number(_) => Some(Criterion {
                cmp: Cmp::Eq,
                number: Some(tv.value.as_number()),
                text: tv.value.as_text(),
            }),
            _ => {
                let s = tv.value.as_text();
                let (cmp, rest) = if let Some(rest) = s.strip_prefix(">=") {
                    (Cmp::Ge, rest)
                } else if let Some(rest) = s.strip_prefix("<=") {
                    (Cmp::Le, rest)
                } else if let Some(rest) = s.strip_prefix("<>") {
                    (Cmp::Ne, rest)
                } else if let Some(rest) = s.strip_prefix('>') {
                    (Cmp::Gt, rest)
                } else if let Some(rest) = s.strip_prefix('<') {
                    (Cmp::Lt, rest)
                } else if let Some(rest) = s.strip_prefix('=') {
                    (Cmp::Eq, rest)
                } else {
                    (Cmp::Eq, s.as_str())
                };
                let rest = rest.trim();
                Some(Criterion {
                    cmp,
                    number: rest.parse::<f64>().ok(),
                    text: rest.to_string(),
                })
            }
        }
    }

    /// Test one cell. Numeric cells compare against a numeric target,
    /// text cells against the target's text form, case-insensitively;
    /// blanks and errors never match.
    pub(crate) fn matches(&self, cell: &TypedValue) -> bool {
        let ordering = match (&cell.vtype, self.number) {
            (ValueType::Number(_), Some(target)) => {
                OrderedFloat(cell.value.as_number()).cmp(&OrderedFloat(target))
            }
            (ValueType::Text(_), _) => cell
                .value
                .as_text()
                .to_lowercase()
                .cmp(&self.text.to_lowercase()),
            _ => return false,
        };
        match self.cmp {
            Cmp::Lt => ordering == Ordering::Less,
            Cmp::Le => ordering != Ordering::Greater,
            Cmp::Gt => ordering == Ordering::Greater,
            Cmp::Ge => ordering != Ordering::Less,
            Cmp::Eq => ordering == Ordering::Equal,
            Cmp::Ne => ordering != Ordering::Equal,
        }
    }
}

// ── database functions ────────────────────────────────────────────

/// Resolve the field argument to a 0-based column offset into the
/// database range: a 1-based index, or a header label from its first
/// row.
fn field_column(ev: &mut Evaluator<'_>, db: &RangeRef, field: &TypedValue) -> Option<usize> {
    match field.vtype {
        ValueType::Number(_) => {
            let n = field.value.as_number();
            if n < 1.0 || n.trunc() as usize > db.cols() {
                return None;
            }
            Some(n.trunc() as usize - 1)
        }
        ValueType::Text(_) => {
            let label = field.value.as_text().to_lowercase();
            (0..db.cols()).find(|&col| {
                cell_at(ev, db, 0, col).value.as_text().to_lowercase() == label
            })
        }
        _ => None,
    }
}

/// Map each criteria column to a database column by header label.
fn criteria_columns(
    ev: &mut Evaluator<'_>,
    db: &RangeRef,
    criteria: &RangeRef,
) -> Vec<Option<usize>> {
    (0..criteria.cols())
        .map(|col| {
            let label = cell_at(ev, criteria, 0, col);
            field_column(ev, db, &label)
        })
        .collect()
}

/// OR across criteria rows, AND across the columns within each row. A
/// criteria row with only blank cells matches every database row.
fn row_matches(
    ev: &mut Evaluator<'_>,
    db: &RangeRef,
    row: usize,
    criteria: &RangeRef,
    crit_cols: &[Option<usize>],
) -> bool {
    'rows: for crow in 1..criteria.rows() {
        for (ccol, db_col) in crit_cols.iter().enumerate() {
            let criterion = match Criterion::parse(&cell_at(ev, criteria, crow, ccol)) {
                Some(criterion) => criterion,
                None => continue,
            };
            let db_col = match db_col {
                Some(col) => *col,
                // A constraint under an unknown label can never hold.
                None => continue 'rows,
            };
            if !criterion.matches(&cell_at(ev, db, row, db_col)) {
                continue 'rows;
            }
        }
        return true;
    }
    false
}

fn db_fn(name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let db = match range_arg(args, ev) {
        Some(range) => range,
        None => return Operand::error(ErrorKind::Value),
    };
    let field = next_scalar(args, ev);
    if field.is_error() {
        return Operand::Typed(field);
    }
    let criteria = match range_arg(args, ev) {
        Some(range) => range,
        None => return Operand::error(ErrorKind::Value),
    };
    let col = match field_column(ev, &db, &field) {
        Some(col) => col,
        None => return Operand::error(ErrorKind::Value),
    };
    let crit_cols = criteria_columns(ev, &db, &criteria);

    let mut accum = SeriesAccum::new();
    let mut matched_rows = 0usize;
    let mut single: Option<TypedValue> = None;
    for row in 1..db.rows() {
        if !row_matches(ev, &db, row, &criteria, &crit_cols) {
            continue;
        }
        matched_rows += 1;
        let tv = cell_at(ev, &db, row, col);
        if single.is_none() {
            single = Some(tv.clone());
        }
        accum.add(tv);
    }

    if name == "DGET" {
        return match matched_rows {
            0 => Operand::error(ErrorKind::Value),
            1 => match single {
                Some(tv) => Operand::Typed(tv),
                None => Operand::error(ErrorKind::Value),
            },
            _ => Operand::error(ErrorKind::Num),
        };
    }

    if let Some(error) = accum.error {
        return Operand::Typed(error);
    }
    let sum_type = accum.sum_type.unwrap_or(ValueType::PLAIN_NUMBER);
    match name {
        "DSUM" => Operand::Typed(TypedValue {
            value: Value::Number(accum.sum),
            vtype: sum_type,
        }),
        "DAVERAGE" => {
            if accum.count == 0 {
                Operand::error(ErrorKind::Div0)
            } else {
                Operand::number(accum.sum / accum.count as f64)
            }
        }
        "DCOUNT" => Operand::number(accum.count as f64),
        "DCOUNTA" => Operand::number(accum.counta as f64),
        // The same collapse-to-0 behavior as the plain aggregates.
        "DMIN" => Operand::number(if accum.count > 0 { accum.min } else { 0.0 }),
        "DMAX" => Operand::number(if accum.count > 0 { accum.max } else { 0.0 }),
        "DPRODUCT" => Operand::number(if accum.count > 0 { accum.product } else { 0.0 }),
        "DVAR" => match accum.variance(false) {
            Some(v) => Operand::number(v),
            None => Operand::error(ErrorKind::Div0),
        },
        "DVARP" => match accum.variance(true) {
            Some(v) => Operand::number(v),
            None => Operand::error(ErrorKind::Div0),
        },
        "DSTDEV" => match accum.variance(false) {
            Some(v) => Operand::number(v.sqrt()),
            None => Operand::error(ErrorKind::Div0),
        },
        "DSTDEVP" => match accum.variance(true) {
            Some(v) => Operand::number(v.sqrt()),
            None => Operand::error(ErrorKind::Div0),
        },
        _ => Operand::error(ErrorKind::Name),
    }
}

// ── conditional aggregates ────────────────────────────────────────

fn criterion_arg(args: &mut ArgList, ev: &mut Evaluator<'_>) -> Result<Option<Criterion>, Operand> {
    let tv = next_scalar(args, ev);
    if tv.is_error() {
        return Err(Operand::Typed(tv));
    }
    Ok(Criterion::parse(&tv))
}

fn countif_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let range = match range_arg(args, ev) {
        Some(range) => range,
        None => return Operand::error(ErrorKind::Value),
    };
    let criterion = match criterion_arg(args, ev) {
        Ok(Some(criterion)) => criterion,
        Ok(None) => return Operand::number(0.0),
        Err(e) => return e,
    };
    let mut count = 0usize;
    for row in 0..range.rows() {
        for col in 0..range.cols() {
            if criterion.matches(&cell_at(ev, &range, row, col)) {
                count += 1;
            }
        }
    }
    Operand::number(count as f64)
}

fn sumif_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let range = match range_arg(args, ev) {
        Some(range) => range,
        None => return Operand::error(ErrorKind::Value),
    };
    let criterion = match criterion_arg(args, ev) {
        Ok(Some(criterion)) => criterion,
        Ok(None) => return Operand::number(0.0),
        Err(e) => return e,
    };
    // Values come from a second range when given, paired positionally
    // with the tested cells.
    let sum_range = if args.is_empty() {
        None
    } else {
        match range_arg(args, ev) {
            Some(range) => Some(range),
            None => return Operand::error(ErrorKind::Value),
        }
    };

    let mut accum = SeriesAccum::new();
    for row in 0..range.rows() {
        for col in 0..range.cols() {
            if !criterion.matches(&cell_at(ev, &range, row, col)) {
                continue;
            }
            let tv = match &sum_range {
                Some(values) => cell_at(ev, values, row, col),
                None => cell_at(ev, &range, row, col),
            };
            accum.add(tv);
        }
    }
    if let Some(error) = accum.error {
        return Operand::Typed(error);
    }
    Operand::Typed(TypedValue {
        value: Value::Number(accum.sum),
        vtype: accum.sum_type.unwrap_or(ValueType::PLAIN_NUMBER),
    })
}

#[cfg(test)]
mod tests {
    use crate::formula::eval::{evaluate_text, EvalContext, EvalResult};
    use crate::formula::value::{Coord, Value};
    use crate::sheet::Sheet;

    fn c(s: &str) -> Coord {
        Coord::parse(s).unwrap()
    }

    /// A1:C5 is a small fruit database; E1:F3 holds criteria labels.
    fn orchard() -> Sheet {
        let mut sheet = Sheet::new("Sheet1");
        for (coord, text) in [("A1", "Fruit"), ("B1", "Qty"), ("C1", "Price")] {
            sheet.set_text(c(coord), text);
        }
        for (row, fruit, qty, price) in [
            (2, "Apple", 10.0, 1.5),
            (3, "Banana", 5.0, 0.5),
            (4, "Apple", 20.0, 2.0),
            (5, "Cherry", 8.0, 3.0),
        ] {
            sheet.set_text(Coord::new(0, row - 1), fruit);
            sheet.set_number(Coord::new(1, row - 1), qty);
            sheet.set_number(Coord::new(2, row - 1), price);
        }
        sheet
    }

    fn eval_on(sheet: &Sheet, text: &str) -> EvalResult {
        let mut ctx = EvalContext::new();
        evaluate_text(text, sheet, &mut ctx, false)
    }

    fn num_on(sheet: &Sheet, text: &str) -> f64 {
        match eval_on(sheet, text).value {
            Value::Number(n) => n,
            Value::Text(s) => panic!("expected number, got {:?}", s),
        }
    }

    // ── database functions ────────────────────────────────────────

    #[test]
    fn test_dsum_single_criterion() {
        let mut sheet = orchard();
        sheet.set_text(c("E1"), "Fruit");
        sheet.set_text(c("E2"), "Apple");
        assert_eq!(num_on(&sheet, "DSUM(A1:C5,\"Qty\",E1:E2)"), 30.0);
        assert_eq!(num_on(&sheet, "DAVERAGE(A1:C5,\"Qty\",E1:E2)"), 15.0);
        assert_eq!(num_on(&sheet, "DCOUNT(A1:C5,\"Qty\",E1:E2)"), 2.0);
    }

    #[test]
    fn test_field_by_one_based_index() {
        let mut sheet = orchard();
        sheet.set_text(c("E1"), "Fruit");
        sheet.set_text(c("E2"), "Apple");
        assert_eq!(num_on(&sheet, "DSUM(A1:C5,2,E1:E2)"), 30.0);
        assert_eq!(eval_on(&sheet, "DSUM(A1:C5,4,E1:E2)").vtype, "e#VALUE!");
        assert_eq!(eval_on(&sheet, "DSUM(A1:C5,\"Weight\",E1:E2)").vtype, "e#VALUE!");
    }

    #[test]
    fn test_criteria_and_across_columns() {
        let mut sheet = orchard();
        sheet.set_text(c("E1"), "Fruit");
        sheet.set_text(c("F1"), "Qty");
        sheet.set_text(c("E2"), "Apple");
        sheet.set_text(c("F2"), ">10");
        // Only the second apple row has Qty > 10.
        assert_eq!(num_on(&sheet, "DSUM(A1:C5,\"Qty\",E1:F2)"), 20.0);
    }

    #[test]
    fn test_criteria_or_across_rows() {
        let mut sheet = orchard();
        sheet.set_text(c("E1"), "Fruit");
        sheet.set_text(c("E2"), "Apple");
        sheet.set_text(c("E3"), "Cherry");
        assert_eq!(num_on(&sheet, "DSUM(A1:C5,\"Qty\",E1:E3)"), 38.0);
        assert_eq!(num_on(&sheet, "DMAX(A1:C5,\"Price\",E1:E3)"), 3.0);
        assert_eq!(num_on(&sheet, "DMIN(A1:C5,\"Price\",E1:E3)"), 1.5);
    }

    #[test]
    fn test_blank_criteria_row_matches_everything() {
        let mut sheet = orchard();
        sheet.set_text(c("E1"), "Fruit");
        // E2 left blank.
        assert_eq!(num_on(&sheet, "DSUM(A1:C5,\"Qty\",E1:E2)"), 43.0);
    }

    #[test]
    fn test_dget_wants_exactly_one_match() {
        let mut sheet = orchard();
        sheet.set_text(c("E1"), "Fruit");
        sheet.set_text(c("E2"), "Cherry");
        assert_eq!(num_on(&sheet, "DGET(A1:C5,\"Price\",E1:E2)"), 3.0);

        sheet.set_text(c("E2"), "Apple");
        assert_eq!(eval_on(&sheet, "DGET(A1:C5,\"Price\",E1:E2)").vtype, "e#NUM!");
        sheet.set_text(c("E2"), "Durian");
        assert_eq!(eval_on(&sheet, "DGET(A1:C5,\"Price\",E1:E2)").vtype, "e#VALUE!");
    }

    #[test]
    fn test_dcounta_counts_text_fields() {
        let mut sheet = orchard();
        sheet.set_text(c("E1"), "Qty");
        sheet.set_text(c("E2"), ">=8");
        // Three matching rows; the Fruit field is text in all of them.
        assert_eq!(num_on(&sheet, "DCOUNT(A1:C5,\"Fruit\",E1:E2)"), 0.0);
        assert_eq!(num_on(&sheet, "DCOUNTA(A1:C5,\"Fruit\",E1:E2)"), 3.0);
    }

    #[test]
    fn test_dvar_delegates_to_the_shared_accumulator() {
        let mut sheet = orchard();
        sheet.set_text(c("E1"), "Fruit");
        sheet.set_text(c("E2"), "Apple");
        // Two qty values 10 and 20: sample variance 50, population 25.
        assert_eq!(num_on(&sheet, "DVAR(A1:C5,\"Qty\",E1:E2)"), 50.0);
        assert_eq!(num_on(&sheet, "DVARP(A1:C5,\"Qty\",E1:E2)"), 25.0);
        assert_eq!(num_on(&sheet, "DSTDEVP(A1:C5,\"Qty\",E1:E2)"), 5.0);
    }

    // ── COUNTIF and SUMIF ─────────────────────────────────────────

    #[test]
    fn test_countif_comparator_strings() {
        let sheet = orchard();
        assert_eq!(num_on(&sheet, "COUNTIF(B2:B5,\">8\")"), 2.0);
        assert_eq!(num_on(&sheet, "COUNTIF(B2:B5,\"<=8\")"), 2.0);
        assert_eq!(num_on(&sheet, "COUNTIF(A2:A5,\"Apple\")"), 2.0);
        assert_eq!(num_on(&sheet, "COUNTIF(A2:A5,\"<>Apple\")"), 2.0);
        assert_eq!(num_on(&sheet, "COUNTIF(A2:A5,\"=apple\")"), 2.0);
    }

    #[test]
    fn test_countif_bare_number() {
        let sheet = orchard();
        assert_eq!(num_on(&sheet, "COUNTIF(B2:B5,20)"), 1.0);
    }

    #[test]
    fn test_sumif_same_range() {
        let sheet = orchard();
        assert_eq!(num_on(&sheet, "SUMIF(B2:B5,\">8\")"), 30.0);
    }

    #[test]
    fn test_sumif_with_value_range() {
        let sheet = orchard();
        // Apples: prices 1.5 and 2.0.
        assert_eq!(num_on(&sheet, "SUMIF(A2:A5,\"Apple\",C2:C5)"), 3.5);
    }

    #[test]
    fn test_error_in_matched_values_propagates() {
        let mut sheet = orchard();
        sheet.set_error(c("C4"), crate::formula::value::ErrorKind::Ref);
        assert_eq!(
            eval_on(&sheet, "SUMIF(A2:A5,\"Apple\",C2:C5)").vtype,
            "e#REF!"
        );
    }
}

// Statistical aggregates. One scan over scalars and ranges accumulates
// sum, product, extrema and an online variance (running mean plus sum
// of squared deltas), so SUM, AVERAGE, VAR and friends all share the
// same accumulation pass.

use super::super::coerce::tables;
use super::super::eval::Evaluator;
use super::super::value::{ErrorKind, Operand, TypedValue, Value, ValueType};
use super::{next_value, ArgList, Arity, FunctionDef, FunctionRegistry, Handler};

fn entry(handler: Handler, arity: Arity, arg_def: &'static str, help: &'static str) -> FunctionDef {
    FunctionDef {
        handler,
        arity,
        arg_def,
        help,
        class: "stat",
        volatile: false,
    }
}

pub(crate) fn register(reg: &mut FunctionRegistry) {
    let series = |help| entry(series_fn, Arity::AtLeast(1), "vn", help);
    reg.register("SUM", series("Adds its arguments"));
    reg.register("PRODUCT", series("Multiplies its arguments"));
    reg.register("MIN", series("Smallest numeric argument"));
    reg.register("MAX", series("Largest numeric argument"));
    reg.register("COUNT", series("Counts numeric values"));
    reg.register("COUNTA", series("Counts non-blank values"));
    reg.register("COUNTBLANK", series("Counts blank cells"));
    reg.register("AVERAGE", series("Arithmetic mean of numeric values"));
    reg.register("STDEV", series("Sample standard deviation"));
    reg.register("STDEVP", series("Population standard deviation"));
    reg.register("VAR", series("Sample variance"));
    reg.register("VARP", series("Population variance"));
}

/// Single-pass accumulator over a value series.
#[derive(Debug, Clone)]
pub(crate) struct SeriesAccum {
    pub count: usize,
    pub counta: usize,
    pub countblank: usize,
    pub sum: f64,
    pub product: f64,
    pub min: f64,
    pub max: f64,
    mean: f64,
    sq_delta_sum: f64,
    pub sum_type: Option<ValueType>,
    pub error: Option<TypedValue>,
}

impl SeriesAccum {
    pub(crate) fn new() -> SeriesAccum {
        SeriesAccum {
            count: 0,
            counta: 0,
            countblank: 0,
            sum: 0.0,
            product: 1.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            sq_delta_sum: 0.0,
            sum_type: None,
            error: None,
        }
    }

    pub(crate) fn add(&mut self, tv: TypedValue) {
        let vtype = tv.vtype;
        match vtype {
            ValueType::Error(_) => {
                if self.error.is_none() {
                    self.error = Some(tv);
                }
            }
            ValueType::Blank => self.countblank += 1,
            ValueType::Text(_) => self.counta += 1,
            ValueType::Number(_) => {
                let v = tv.value.as_number();
                self.count += 1;
                self.counta += 1;
                self.sum += v;
                self.product *= v;
                self.min = self.min.min(v);
                self.max = self.max.max(v);
                // Online variance update.
                let delta = v - self.mean;
                self.mean += delta / self.count as f64;
                self.sq_delta_sum += delta * (v - self.mean);
            }
        }
        // The running sum's subtype follows the same rules as `+`.
        if !vtype.is_error() && !vtype.is_blank() && !vtype.is_text() {
            self.sum_type = Some(match self.sum_type {
                None => vtype,
                Some(prev) => tables().plus.resolve(&prev, &vtype),
            });
        }
    }

    pub(crate) fn variance(&self, population: bool) -> Option<f64> {
        let n = self.count as f64;
        if population {
            if self.count == 0 {
                return None;
            }
            Some(self.sq_delta_sum / n)
        } else {
            if self.count < 2 {
                return None;
            }
            Some(self.sq_delta_sum / (n - 1.0))
        }
    }

    /// Accumulate every remaining argument, stepping through ranges.
    pub(crate) fn collect(args: &mut ArgList, ev: &mut Evaluator<'_>) -> SeriesAccum {
        let mut accum = SeriesAccum::new();
        while let Some(tv) = next_value(args, ev) {
            accum.add(tv);
        }
        accum
    }
}

fn series_fn(name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let accum = SeriesAccum::collect(args, ev);
    if let Some(error) = accum.error {
        return Operand::Typed(error);
    }
    let sum_type = accum.sum_type.unwrap_or(ValueType::PLAIN_NUMBER);

    match name {
        "SUM" => Operand::Typed(TypedValue {
            value: Value::Number(accum.sum),
            vtype: sum_type,
        }),
        // These collapse to 0 when no numeric value was seen; a real 0
        // looks exactly the same. Kept as-is: callers depend on it.
        "PRODUCT" => Operand::number(if accum.count > 0 { accum.product } else { 0.0 }),
        "MIN" => Operand::number(if accum.count > 0 { accum.min } else { 0.0 }),
        "MAX" => Operand::number(if accum.count > 0 { accum.max } else { 0.0 }),
        "COUNT" => Operand::number(accum.count as f64),
        "COUNTA" => Operand::number(accum.counta as f64),
        "COUNTBLANK" => Operand::number(accum.countblank as f64),
        "AVERAGE" => {
            if accum.count == 0 {
                Operand::error(ErrorKind::Div0)
            } else {
                Operand::number(accum.sum / accum.count as f64)
            }
        }
        "VAR" => match accum.variance(false) {
            Some(v) => Operand::number(v),
            None => Operand::error(ErrorKind::Div0),
        },
        "VARP" => match accum.variance(true) {
            Some(v) => Operand::number(v),
            None => Operand::error(ErrorKind::Div0),
        },
        "STDEV" => match accum.variance(false) {
            Some(v) => Operand::number(v.sqrt()),
            None => Operand::error(ErrorKind::Div0),
        },
        "STDEVP" => match accum.variance(true) {
            Some(v) => Operand::number(v.sqrt()),
            None => Operand::error(ErrorKind::Div0),
        },
        _ => Operand::error(ErrorKind::Name),
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

    fn sheet_123() -> Sheet {
        // A1=1, A2=2, A3 blank, A4="note"
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_number(c("A1"), 1.0);
        sheet.set_number(c("A2"), 2.0);
        sheet.set_text(c("A4"), "note");
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

    #[test]
    fn test_sum_over_range_excludes_blanks() {
        let sheet = sheet_123();
        let result = eval_on(&sheet, "SUM(A1:A3)");
        assert_eq!(result.value, Value::Number(3.0));
        assert_eq!(result.vtype, "n");
    }

    #[test]
    fn test_counta_counts_text_but_not_blanks() {
        let sheet = sheet_123();
        assert_eq!(num_on(&sheet, "COUNTA(A1:A3)"), 2.0);
        assert_eq!(num_on(&sheet, "COUNTA(A1:A4)"), 3.0);
        assert_eq!(num_on(&sheet, "COUNT(A1:A4)"), 2.0);
        assert_eq!(num_on(&sheet, "COUNTBLANK(A1:A4)"), 1.0);
    }

    #[test]
    fn test_mixed_scalar_and_range_arguments() {
        let sheet = sheet_123();
        assert_eq!(num_on(&sheet, "SUM(A1:A2,10,5)"), 18.0);
    }

    #[test]
    fn test_average_and_empty_average() {
        let sheet = sheet_123();
        assert_eq!(num_on(&sheet, "AVERAGE(A1:A3)"), 1.5);
        assert_eq!(eval_on(&sheet, "AVERAGE(A3)").vtype, "e#DIV/0!");
    }

    #[test]
    fn test_min_max_product() {
        let sheet = sheet_123();
        assert_eq!(num_on(&sheet, "MIN(A1:A2,0.5)"), 0.5);
        assert_eq!(num_on(&sheet, "MAX(A1:A2)"), 2.0);
        assert_eq!(num_on(&sheet, "PRODUCT(A1:A2,4)"), 8.0);
    }

    #[test]
    fn test_aggregates_over_no_numbers_collapse_to_zero() {
        // A text-only series gives MIN/MAX/PRODUCT a bare 0, which is
        // indistinguishable from a legitimate zero result. This pins
        // the behavior down; do not "fix" it silently.
        let sheet = sheet_123();
        assert_eq!(num_on(&sheet, "MIN(A4)"), 0.0);
        assert_eq!(num_on(&sheet, "MAX(A4)"), 0.0);
        assert_eq!(num_on(&sheet, "PRODUCT(A4)"), 0.0);
        assert_eq!(num_on(&sheet, "SUM(A4)"), 0.0);
    }

    #[test]
    fn test_variance_and_stdev() {
        let mut sheet = Sheet::new("Sheet1");
        for (i, v) in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].iter().enumerate() {
            sheet.set_number(Coord::new(0, i), *v);
        }
        // Known data set: population variance 4, sample variance 32/7.
        assert!((num_on(&sheet, "VARP(A1:A8)") - 4.0).abs() < 1e-12);
        assert!((num_on(&sheet, "STDEVP(A1:A8)") - 2.0).abs() < 1e-12);
        assert!((num_on(&sheet, "VAR(A1:A8)") - 32.0 / 7.0).abs() < 1e-12);
        assert!((num_on(&sheet, "STDEV(A1:A8)") - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_variance_of_single_value_is_div0() {
        let sheet = sheet_123();
        assert_eq!(eval_on(&sheet, "VAR(A1)").vtype, "e#DIV/0!");
        assert_eq!(eval_on(&sheet, "STDEV(A1)").vtype, "e#DIV/0!");
    }

    #[test]
    fn test_error_in_series_propagates() {
        let mut sheet = sheet_123();
        sheet.set_error(c("A3"), crate::formula::value::ErrorKind::Ref);
        assert_eq!(eval_on(&sheet, "SUM(A1:A3)").vtype, "e#REF!");
    }

    #[test]
    fn test_sum_keeps_currency_subtype() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_cell(
            c("A1"),
            crate::formula::value::TypedValue::number_of_kind(
                2.0,
                crate::formula::value::NumberKind::Currency,
            ),
        );
        sheet.set_number(c("A2"), 3.0);
        let result = eval_on(&sheet, "SUM(A1:A2)");
        assert_eq!(result.vtype, "n$");
        assert_eq!(result.value, Value::Number(5.0));
    }
}

// Stack evaluator - walks a postfix program left to right against an
// operand stack, dereferencing coordinates, ranges and names through
// the Sheet collaborator and resolving result types through the
// coercion tables. Computational failures become typed error operands,
// never panics, so stack bookkeeping stays consistent and the rest of
// the formula still evaluates.

use rustc_hash::FxHashSet;

use crate::sheet::Sheet;
use crate::sheet_cache::{FreshnessInfo, SheetCache};

use super::coerce::tables;
use super::functions::{self, FunctionRegistry};
use super::postfix::{to_postfix, PostfixEntry};
use super::tokenizer::{tokenize, OpCode, ParseInfo, TokenKind};
use super::value::{CellRef, Coord, ErrorKind, Operand, RangeRef, TypedValue, Value, ValueType};

/// What the engine hands back to its caller: a value, its type tag and
/// an error message (empty when the evaluation was clean).
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResult {
    pub value: Value,
    pub vtype: String,
    pub error: String,
}

impl EvalResult {
    fn from_typed(tv: TypedValue, error: String) -> EvalResult {
        // Non-finite numeric results surface as #NUM!.
        if let (ValueType::Number(_), Value::Number(n)) = (&tv.vtype, &tv.value) {
            if !n.is_finite() {
                return EvalResult {
                    value: Value::Number(0.0),
                    vtype: ErrorKind::Num.tag().to_string(),
                    error,
                };
            }
        }
        EvalResult {
            value: tv.value,
            vtype: tv.vtype.tag().to_string(),
            error,
        }
    }

    fn failure(kind: ErrorKind, error: String) -> EvalResult {
        EvalResult {
            value: Value::Number(0.0),
            vtype: kind.tag().to_string(),
            error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.vtype.starts_with('e')
    }
}

/// Everything one recalculation pass needs: the function registry, the
/// cross-sheet cache, the freshness tracker and the circular-name
/// guard. Construct one per pass; there are no process-wide registries.
pub struct EvalContext {
    pub functions: FunctionRegistry,
    pub sheet_cache: SheetCache,
    pub freshness: FreshnessInfo,
    /// Names currently being resolved, scoped to one top-level
    /// evaluation. Re-entering one is a circular reference.
    pub(crate) names_in_progress: FxHashSet<String>,
}

impl EvalContext {
    pub fn new() -> EvalContext {
        EvalContext {
            functions: FunctionRegistry::builtin(),
            sheet_cache: SheetCache::new(),
            freshness: FreshnessInfo::new(),
            names_in_progress: FxHashSet::default(),
        }
    }

    /// Start a fresh pass: freshness info is rebuilt every pass while
    /// the sheet cache persists until explicitly invalidated.
    pub fn begin_pass(&mut self) {
        self.freshness.reset();
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        EvalContext::new()
    }
}

/// Evaluate a compiled program. The program must have been produced
/// from this exact ParseInfo. The circular-name guard is reset on the
/// way in and torn down on every return path.
pub fn evaluate(
    parse: &ParseInfo,
    program: &[PostfixEntry],
    sheet: &Sheet,
    ctx: &mut EvalContext,
    allow_range_result: bool,
) -> EvalResult {
    ctx.names_in_progress.clear();
    let result = run_program(parse, program, sheet, ctx, allow_range_result);
    ctx.names_in_progress.clear();
    result
}

/// Tokenize, convert and evaluate formula text in one step. A leading
/// `=` is accepted and ignored. Structural errors come back in the
/// error field with a #VALUE! type.
pub fn evaluate_text(
    text: &str,
    sheet: &Sheet,
    ctx: &mut EvalContext,
    allow_range_result: bool,
) -> EvalResult {
    let trimmed = text.trim();
    let body = trimmed.strip_prefix('=').unwrap_or(trimmed);
    let parse = tokenize(body);
    match to_postfix(&parse) {
        Ok(program) => evaluate(&parse, &program, sheet, ctx, allow_range_result),
        Err(e) => EvalResult::failure(ErrorKind::Value, e),
    }
}

/// Inner evaluation; used both for top-level programs and for nested
/// name-definition formulas (which must share the circular-name guard).
pub(crate) fn run_program(
    parse: &ParseInfo,
    program: &[PostfixEntry],
    sheet: &Sheet,
    ctx: &mut EvalContext,
    allow_range_result: bool,
) -> EvalResult {
    let mut ev = Evaluator::new(sheet, ctx);

    for entry in program {
        match entry {
            PostfixEntry::FunctionStart => ev.stack.push(Operand::FunctionStart),
            PostfixEntry::Token(i) => {
                let tok = match parse.get(*i) {
                    Some(tok) => tok,
                    None => {
                        ev.note_error("Program does not match its token sequence");
                        break;
                    }
                };
                match tok.kind {
                    TokenKind::Num => {
                        let n = tok.text.parse::<f64>().unwrap_or(f64::NAN);
                        ev.stack.push(Operand::number(n));
                    }
                    TokenKind::Str => {
                        ev.stack.push(Operand::Typed(TypedValue::text(&tok.text)));
                    }
                    TokenKind::Coord => match Coord::parse(&tok.text) {
                        Some(coord) => ev.stack.push(Operand::Coord(CellRef::local(coord))),
                        None => {
                            ev.note_error(format!("Invalid coordinate '{}'", tok.text));
                            ev.stack.push(Operand::error(ErrorKind::Ref));
                        }
                    },
                    TokenKind::Name => functions::call(&tok.text, &mut ev),
                    TokenKind::Op => match tok.opcode {
                        Some(opcode) => ev.apply_op(opcode),
                        None => ev.note_error(format!("Unknown operator '{}'", tok.text)),
                    },
                    // The converter never emits these.
                    TokenKind::Space | TokenKind::Error => {}
                }
            }
        }
    }

    // Final-result normalization.
    if ev.stack.len() != 1 {
        let msg = if ev.stack.is_empty() {
            "Missing operand"
        } else {
            "Error in formula"
        };
        ev.note_error(msg);
        return EvalResult::failure(ErrorKind::Value, ev.errortext);
    }
    let top = match ev.stack.pop() {
        Some(top) => top,
        None => return EvalResult::failure(ErrorKind::Value, ev.errortext),
    };
    match ev.resolve(top) {
        Operand::Typed(tv) => EvalResult::from_typed(tv, ev.errortext),
        Operand::Coord(cellref) => {
            let tv = ev.cell_value(&cellref);
            EvalResult::from_typed(tv, ev.errortext)
        }
        Operand::Range(range) => {
            if allow_range_result {
                EvalResult {
                    value: Value::Text(range.display()),
                    vtype: "range".to_string(),
                    error: ev.errortext,
                }
            } else {
                ev.note_error("Formula results in a range");
                EvalResult::failure(ErrorKind::Value, ev.errortext)
            }
        }
        Operand::Name(_) | Operand::FunctionStart => {
            ev.note_error("Error in formula");
            EvalResult::failure(ErrorKind::Value, ev.errortext)
        }
    }
}

/// Working state of one program walk: the operand stack plus the sheet
/// and pass context it dereferences through.
pub(crate) struct Evaluator<'e> {
    pub(crate) sheet: &'e Sheet,
    pub(crate) ctx: &'e mut EvalContext,
    pub(crate) stack: Vec<Operand>,
    pub(crate) errortext: String,
}

impl<'e> Evaluator<'e> {
    fn new(sheet: &'e Sheet, ctx: &'e mut EvalContext) -> Evaluator<'e> {
        Evaluator {
            sheet,
            ctx,
            stack: Vec::new(),
            errortext: String::new(),
        }
    }

    /// Record an error message; the first one wins.
    pub(crate) fn note_error(&mut self, msg: impl Into<String>) {
        if self.errortext.is_empty() {
            self.errortext = msg.into();
        }
    }

    /// Pop an operand; an empty stack is an evaluator-internal error
    /// that degrades to a #VALUE! operand rather than a crash.
    fn pop(&mut self) -> Operand {
        match self.stack.pop() {
            Some(op) => op,
            None => {
                self.note_error("Operand stack underflow");
                Operand::error(ErrorKind::Value)
            }
        }
    }

    // ── dereferencing ─────────────────────────────────────────────

    /// Resolve a name operand to what it stands for; other operands
    /// pass through unchanged.
    pub(crate) fn resolve(&mut self, op: Operand) -> Operand {
        match op {
            Operand::Name(name) => self.deref_name(&name),
            other => other,
        }
    }

    /// Resolve a name through the sheet's name table: a coordinate, a
    /// range, a nested formula, a constant, or one of the bare error
    /// constants. Guarded against circular definitions.
    pub(crate) fn deref_name(&mut self, name: &str) -> Operand {
        if let Some(kind) = ErrorKind::from_code(name) {
            return Operand::error(kind);
        }
        let folded = name.to_uppercase();
        let def = match self.sheet.name_definition(&folded) {
            Some(def) => def.to_string(),
            None => {
                self.note_error(format!("Name {} does not exist", folded));
                return Operand::error(ErrorKind::Name);
            }
        };
        if self.ctx.names_in_progress.contains(&folded) {
            self.note_error(format!("Circular reference to name {}", folded));
            return Operand::error(ErrorKind::Name);
        }

        if let Some(formula) = def.strip_prefix('=') {
            self.ctx.names_in_progress.insert(folded.clone());
            let parse = tokenize(formula);
            let result = match to_postfix(&parse) {
                Ok(program) => run_program(&parse, &program, self.sheet, self.ctx, false),
                Err(e) => EvalResult::failure(ErrorKind::Name, e),
            };
            self.ctx.names_in_progress.remove(&folded);
            if !result.error.is_empty() {
                self.note_error(result.error.clone());
            }
            let vtype =
                ValueType::from_tag(&result.vtype).unwrap_or(ValueType::Error(ErrorKind::Name));
            return Operand::Typed(TypedValue {
                value: result.value,
                vtype,
            });
        }
        if let Some((first, second)) = def.split_once(':') {
            match (Coord::parse(first), Coord::parse(second)) {
                (Some(a), Some(b)) => {
                    return Operand::Range(RangeRef::new(CellRef::local(a), b));
                }
                _ => {
                    self.note_error(format!("Invalid definition for name {}", folded));
                    return Operand::error(ErrorKind::Name);
                }
            }
        }
        if let Some(coord) = Coord::parse(&def) {
            return Operand::Coord(CellRef::local(coord));
        }
        if let Ok(n) = def.trim().parse::<f64>() {
            return Operand::number(n);
        }
        Operand::Typed(TypedValue::text(def))
    }

    /// Fully dereference to a scalar value. Ranges are not scalars.
    pub(crate) fn scalar(&mut self, op: Operand) -> TypedValue {
        match self.resolve(op) {
            Operand::Typed(tv) => tv,
            Operand::Coord(cellref) => self.cell_value(&cellref),
            Operand::Range(_) => {
                self.note_error("Range used where a single value is required");
                TypedValue::error(ErrorKind::Value)
            }
            Operand::Name(_) | Operand::FunctionStart => TypedValue::error(ErrorKind::Name),
        }
    }

    /// Scalar coerced toward a number: numeric text becomes a plain
    /// number, blanks stay blank (worth 0), non-numeric text keeps its
    /// text type so the coercion tables can reject it.
    pub(crate) fn as_number(&mut self, op: Operand) -> TypedValue {
        let tv = self.scalar(op);
        match tv.vtype {
            ValueType::Text(_) => match tv.value.as_text().trim().parse::<f64>() {
                Ok(n) => TypedValue::number(n),
                Err(_) => TypedValue {
                    value: Value::Number(0.0),
                    vtype: tv.vtype,
                },
            },
            ValueType::Blank => TypedValue {
                value: Value::Number(0.0),
                vtype: ValueType::Blank,
            },
            _ => tv,
        }
    }

    /// Scalar rendered toward text; the type tag is kept so the concat
    /// table can pick the result subtype.
    pub(crate) fn as_text(&mut self, op: Operand) -> TypedValue {
        let tv = self.scalar(op);
        match tv.vtype {
            ValueType::Error(_) => tv,
            _ => TypedValue {
                value: Value::Text(tv.display_text()),
                vtype: tv.vtype,
            },
        }
    }

    /// Coerce an operand to a cell reference: coordinates directly,
    /// names through the name table, ranges via their anchor corner.
    pub(crate) fn as_coord(&mut self, op: Operand) -> Option<CellRef> {
        match self.resolve(op) {
            Operand::Coord(cellref) => Some(cellref),
            Operand::Range(range) => Some(range.start),
            Operand::Typed(tv) if tv.vtype.is_text() => CellRef::decode(&tv.value.as_text()),
            _ => None,
        }
    }

    /// Read a cell's value and type. Sheet-qualified references
    /// redirect through the cross-sheet cache and fail soft as #REF!
    /// when that sheet is not available.
    pub(crate) fn cell_value(&mut self, cellref: &CellRef) -> TypedValue {
        match &cellref.sheet {
            None => self.sheet.value_and_type(&cellref.coord),
            Some(name) => {
                if name.to_uppercase() == self.sheet.name.to_uppercase() {
                    return self.sheet.value_and_type(&cellref.coord);
                }
                match self.ctx.sheet_cache.load(name) {
                    Ok(other) => {
                        let tv = other.value_and_type(&cellref.coord);
                        self.ctx
                            .freshness
                            .sheets_touched
                            .insert(name.to_uppercase());
                        tv
                    }
                    Err(needs) => {
                        self.note_error(format!("Sheet {} is not available", needs.name));
                        TypedValue::error(ErrorKind::Ref)
                    }
                }
            }
        }
    }

    // ── operators ─────────────────────────────────────────────────

    pub(crate) fn apply_op(&mut self, opcode: OpCode) {
        match opcode {
            OpCode::Colon => self.build_range(),
            OpCode::Bang => self.qualify_sheet(),
            OpCode::Less
            | OpCode::Greater
            | OpCode::Equal
            | OpCode::GreaterEqual
            | OpCode::LessEqual
            | OpCode::NotEqual => self.compare(opcode),
            OpCode::Concat => {
                let op2 = self.pop();
                let op1 = self.pop();
                let v1 = self.as_text(op1);
                let v2 = self.as_text(op2);
                let rtype = tables().concat.resolve(&v1.vtype, &v2.vtype);
                if rtype.is_error() {
                    self.push_typed(TypedValue {
                        value: Value::Number(0.0),
                        vtype: rtype,
                    });
                    return;
                }
                let joined = format!("{}{}", v1.value.as_text(), v2.value.as_text());
                self.push_typed(TypedValue {
                    value: Value::Text(joined),
                    vtype: rtype,
                });
            }
            OpCode::Plus | OpCode::Minus | OpCode::Multiply | OpCode::Divide | OpCode::Power => {
                let op2 = self.pop();
                let op1 = self.pop();
                let v1 = self.as_number(op1);
                let v2 = self.as_number(op2);
                let table = match opcode {
                    OpCode::Plus | OpCode::Minus | OpCode::Multiply => &tables().plus,
                    _ => &tables().twoargnumeric,
                };
                let rtype = table.resolve(&v1.vtype, &v2.vtype);
                if rtype.is_error() {
                    self.push_typed(TypedValue {
                        value: Value::Number(0.0),
                        vtype: rtype,
                    });
                    return;
                }
                let a = v1.value.as_number();
                let b = v2.value.as_number();
                let result = match opcode {
                    OpCode::Plus => a + b,
                    OpCode::Minus => a - b,
                    OpCode::Multiply => a * b,
                    OpCode::Divide => {
                        if b == 0.0 {
                            self.stack.push(Operand::error(ErrorKind::Div0));
                            return;
                        }
                        a / b
                    }
                    _ => a.powf(b),
                };
                self.push_typed(TypedValue {
                    value: Value::Number(result),
                    vtype: rtype,
                });
            }
            OpCode::UnaryMinus | OpCode::UnaryPlus => {
                let op = self.pop();
                let v = self.as_number(op);
                let rtype = tables().oneargnumeric.resolve(&v.vtype, &v.vtype);
                if rtype.is_error() {
                    self.push_typed(TypedValue {
                        value: Value::Number(0.0),
                        vtype: rtype,
                    });
                    return;
                }
                let n = v.value.as_number();
                let n = if opcode == OpCode::UnaryMinus { -n } else { n };
                self.push_typed(TypedValue {
                    value: Value::Number(n),
                    vtype: rtype,
                });
            }
            OpCode::Percent => {
                let op = self.pop();
                let v = self.as_number(op);
                let rtype = tables().unarypercent.resolve(&v.vtype, &v.vtype);
                if rtype.is_error() {
                    self.push_typed(TypedValue {
                        value: Value::Number(0.0),
                        vtype: rtype,
                    });
                    return;
                }
                self.push_typed(TypedValue {
                    value: Value::Number(v.value.as_number() / 100.0),
                    vtype: rtype,
                });
            }
            OpCode::OpenParen | OpCode::CloseParen | OpCode::Comma => {
                // Structural tokens never reach a compiled program.
                self.note_error("Unexpected structural operator in program");
            }
        }
    }

    fn push_typed(&mut self, tv: TypedValue) {
        self.stack.push(Operand::Typed(tv));
    }

    /// `:` builds a range from two coordinate-or-name operands. The
    /// left coordinate's sheet qualification wins.
    fn build_range(&mut self) {
        let op2 = self.pop();
        let op1 = self.pop();
        let c2 = self.as_coord(op2);
        let c1 = self.as_coord(op1);
        match (c1, c2) {
            (Some(a), Some(b)) => {
                self.stack.push(Operand::Range(RangeRef::new(a, b.coord)));
            }
            _ => {
                self.note_error("Invalid range");
                self.stack.push(Operand::error(ErrorKind::Ref));
            }
        }
    }

    /// `!` attaches a sheet name to a coordinate or range. The name
    /// operand is taken verbatim; it refers to another sheet, not to
    /// this sheet's name table.
    fn qualify_sheet(&mut self) {
        let op2 = self.pop();
        let op1 = self.pop();
        let sheet_name = match op1 {
            Operand::Name(n) => Some(n),
            Operand::Typed(tv) if tv.vtype.is_text() => Some(tv.value.as_text()),
            _ => None,
        };
        match (op2, sheet_name) {
            (Operand::Coord(cellref), Some(sheet)) => {
                self.stack
                    .push(Operand::Coord(CellRef::on_sheet(cellref.coord, sheet)));
            }
            (Operand::Range(range), Some(sheet)) => {
                let requalified =
                    RangeRef::new(CellRef::on_sheet(range.start.coord, sheet), range.end);
                self.stack.push(Operand::Range(requalified));
            }
            _ => {
                self.note_error("Improper sheet reference");
                self.stack.push(Operand::error(ErrorKind::Ref));
            }
        }
    }

    /// Comparisons have three branches: numeric against numeric, an
    /// error on either side, and everything else compared as text
    /// case-insensitively (numbers and blanks render to display text
    /// first). The result is a logical 1 or 0.
    fn compare(&mut self, opcode: OpCode) {
        use std::cmp::Ordering;

        let op2 = self.pop();
        let op1 = self.pop();
        let v1 = self.scalar(op1);
        let v2 = self.scalar(op2);

        let propagated = tables().propagateerror.resolve(&v1.vtype, &v2.vtype);
        if propagated.is_error() {
            self.push_typed(TypedValue {
                value: Value::Number(0.0),
                vtype: propagated,
            });
            return;
        }

        let ordering = if v1.vtype.major() == 'n' && v2.vtype.major() == 'n' {
            v1.value
                .as_number()
                .partial_cmp(&v2.value.as_number())
                .unwrap_or(Ordering::Equal)
        } else if v1.vtype.is_text() && v2.vtype.is_text() {
            v1.value
                .as_text()
                .to_lowercase()
                .cmp(&v2.value.as_text().to_lowercase())
        } else {
            // Mixed: numbers and blanks render to display text first.
            v1.display_text()
                .to_lowercase()
                .cmp(&v2.display_text().to_lowercase())
        };

        let result = match opcode {
            OpCode::Less => ordering == Ordering::Less,
            OpCode::Greater => ordering == Ordering::Greater,
            OpCode::Equal => ordering == Ordering::Equal,
            OpCode::LessEqual => ordering != Ordering::Greater,
            OpCode::GreaterEqual => ordering != Ordering::Less,
            _ => ordering != Ordering::Equal,
        };
        self.stack.push(Operand::Typed(TypedValue::logical(result)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Coord {
        Coord::parse(s).unwrap()
    }

    fn eval(text: &str, sheet: &Sheet, ctx: &mut EvalContext) -> EvalResult {
        evaluate_text(text, sheet, ctx, false)
    }

    fn eval_fresh(text: &str) -> EvalResult {
        let sheet = Sheet::new("Sheet1");
        let mut ctx = EvalContext::new();
        eval(text, &sheet, &mut ctx)
    }

    // ── scenarios ─────────────────────────────────────────────────

    #[test]
    fn test_simple_addition() {
        let result = eval_fresh("1+2");
        assert_eq!(result.value, Value::Number(3.0));
        assert_eq!(result.vtype, "n");
        assert_eq!(result.error, "");
    }

    #[test]
    fn test_division_by_zero_cell() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_number(c("A1"), 10.0);
        sheet.set_number(c("B1"), 0.0);
        let mut ctx = EvalContext::new();
        let result = eval("A1/B1", &sheet, &mut ctx);
        assert_eq!(result.value, Value::Number(0.0));
        assert_eq!(result.vtype, "e#DIV/0!");
    }

    #[test]
    fn test_circular_name_reference() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.define_name("Foo", "=Foo");
        let mut ctx = EvalContext::new();
        let result = eval("Foo", &sheet, &mut ctx);
        assert_eq!(result.vtype, "e#NAME?");
        assert!(
            result.error.to_lowercase().contains("circular reference"),
            "error was: {}",
            result.error
        );
        // The guard tears down: evaluating again behaves identically.
        let again = eval("Foo", &sheet, &mut ctx);
        assert_eq!(again.vtype, "e#NAME?");
    }

    #[test]
    fn test_unavailable_sheet_records_pending_then_resolves() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_number(c("A1"), 1.0);
        let mut ctx = EvalContext::new();

        let parse = tokenize("Sheet2!A1");
        let program = to_postfix(&parse).unwrap();
        let result = evaluate(&parse, &program, &sheet, &mut ctx, false);
        assert_eq!(result.vtype, "e#REF!");
        assert!(result.error.contains("Sheet2"), "error: {}", result.error);
        assert_eq!(ctx.sheet_cache.pending_request(), Some("SHEET2"));

        // Register the sheet and re-run the same program.
        let mut other = Sheet::new("Sheet2");
        other.set_number(c("A1"), 99.0);
        ctx.sheet_cache.register_sheet("Sheet2", other);
        ctx.begin_pass();
        let result = evaluate(&parse, &program, &sheet, &mut ctx, false);
        assert_eq!(result.value, Value::Number(99.0));
        assert_eq!(result.vtype, "n");
        assert!(ctx.freshness.sheets_touched.contains("SHEET2"));
    }

    // ── dereferencing ─────────────────────────────────────────────

    #[test]
    fn test_cell_reference_and_blank_cells() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_number(c("A1"), 5.0);
        let mut ctx = EvalContext::new();
        assert_eq!(eval("A1+1", &sheet, &mut ctx).value, Value::Number(6.0));
        // Blank cells are worth zero in arithmetic.
        assert_eq!(eval("C9+1", &sheet, &mut ctx).value, Value::Number(1.0));
    }

    #[test]
    fn test_absolute_markers_stripped_on_lookup() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_number(c("A1"), 5.0);
        let mut ctx = EvalContext::new();
        assert_eq!(eval("$A$1*2", &sheet, &mut ctx).value, Value::Number(10.0));
    }

    #[test]
    fn test_named_coordinate_and_named_formula() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_number(c("B2"), 21.0);
        sheet.define_name("Target", "B2");
        sheet.define_name("Double", "=Target*2");
        let mut ctx = EvalContext::new();
        assert_eq!(eval("Target", &sheet, &mut ctx).value, Value::Number(21.0));
        assert_eq!(eval("Double", &sheet, &mut ctx).value, Value::Number(42.0));
    }

    #[test]
    fn test_unknown_name() {
        let result = eval_fresh("Nope+1");
        assert_eq!(result.vtype, "e#NAME?");
    }

    #[test]
    fn test_bare_error_constant() {
        let result = eval_fresh("#REF!");
        assert_eq!(result.vtype, "e#REF!");
        let result = eval_fresh("1+#DIV/0!");
        assert_eq!(result.vtype, "e#DIV/0!");
    }

    #[test]
    fn test_error_cell_propagates() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_error(c("A1"), ErrorKind::NA);
        let mut ctx = EvalContext::new();
        let result = eval("A1*2", &sheet, &mut ctx);
        assert_eq!(result.vtype, "e#N/A");
    }

    // ── operators ─────────────────────────────────────────────────

    #[test]
    fn test_operator_precedence_and_power() {
        assert_eq!(eval_fresh("2+3*4").value, Value::Number(14.0));
        assert_eq!(eval_fresh("2^10").value, Value::Number(1024.0));
        assert_eq!(eval_fresh("(2+3)*4").value, Value::Number(20.0));
    }

    #[test]
    fn test_unary_chain_and_percent() {
        assert_eq!(eval_fresh("--5").value, Value::Number(5.0));
        let pct = eval_fresh("50%");
        assert_eq!(pct.value, Value::Number(0.5));
        assert_eq!(pct.vtype, "n%");
        assert_eq!(eval_fresh("-5%").value, Value::Number(-0.05));
    }

    #[test]
    fn test_numeric_text_coerces_in_arithmetic() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_text(c("A1"), "5");
        sheet.set_text(c("A2"), "apple");
        let mut ctx = EvalContext::new();
        assert_eq!(eval("A1+1", &sheet, &mut ctx).value, Value::Number(6.0));
        assert_eq!(eval("A2+1", &sheet, &mut ctx).vtype, "e#VALUE!");
    }

    #[test]
    fn test_concatenation() {
        let result = eval_fresh("\"total: \"&42");
        assert_eq!(result.value, Value::Text("total: 42".to_string()));
        assert_eq!(result.vtype, "t");
    }

    #[test]
    fn test_comparisons_numeric_and_text() {
        assert_eq!(eval_fresh("1<2").value, Value::Number(1.0));
        assert_eq!(eval_fresh("1<2").vtype, "nl");
        assert_eq!(eval_fresh("2<=1").value, Value::Number(0.0));
        assert_eq!(eval_fresh("\"Apple\"=\"APPLE\"").value, Value::Number(1.0));
        assert_eq!(eval_fresh("\"a\"<>\"b\"").value, Value::Number(1.0));
    }

    #[test]
    fn test_comparison_mixed_types_use_display_text() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_number(c("A1"), 5.0);
        sheet.set_text(c("B1"), "5");
        let mut ctx = EvalContext::new();
        assert_eq!(eval("A1=B1", &sheet, &mut ctx).value, Value::Number(1.0));
    }

    #[test]
    fn test_comparison_propagates_errors() {
        let result = eval_fresh("#N/A=1");
        assert_eq!(result.vtype, "e#N/A");
    }

    #[test]
    fn test_date_arithmetic_types() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_date(c("A1"), 40000.0);
        sheet.set_date(c("A2"), 39990.0);
        let mut ctx = EvalContext::new();
        let plus = eval("A1+1", &sheet, &mut ctx);
        assert_eq!(plus.vtype, "nd");
        assert_eq!(plus.value, Value::Number(40001.0));
        let diff = eval("A1-A2", &sheet, &mut ctx);
        assert_eq!(diff.vtype, "n");
        assert_eq!(diff.value, Value::Number(10.0));
    }

    // ── structure and normalization ───────────────────────────────

    #[test]
    fn test_range_result_needs_permission() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_number(c("A1"), 1.0);
        let mut ctx = EvalContext::new();
        let denied = evaluate_text("A1:B2", &sheet, &mut ctx, false);
        assert_eq!(denied.vtype, "e#VALUE!");
        let allowed = evaluate_text("A1:B2", &sheet, &mut ctx, true);
        assert_eq!(allowed.vtype, "range");
        assert_eq!(allowed.value, Value::Text("A1:B2".to_string()));
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let mut sheet = Sheet::new("Sheet1");
        sheet.set_number(c("A1"), 0.1);
        sheet.set_number(c("A2"), 0.2);
        let mut ctx = EvalContext::new();
        let parse = tokenize("A1+A2*A1/A2");
        let program = to_postfix(&parse).unwrap();
        let first = evaluate(&parse, &program, &sheet, &mut ctx, false);
        for _ in 0..10 {
            assert_eq!(evaluate(&parse, &program, &sheet, &mut ctx, false), first);
        }
    }

    #[test]
    fn test_nonfinite_result_becomes_num_error() {
        // 2^10000 overflows to infinity.
        let result = eval_fresh("2^10000");
        assert_eq!(result.vtype, "e#NUM!");
        assert_eq!(result.value, Value::Number(0.0));
    }

    #[test]
    fn test_structural_error_reported_before_evaluation() {
        let result = eval_fresh("(1+2");
        assert_eq!(result.error, "Missing close parenthesis");
        assert_eq!(result.vtype, "e#VALUE!");
    }

    #[test]
    fn test_underflow_is_soft() {
        let result = eval_fresh("1+");
        assert_eq!(result.vtype, "e#VALUE!");
        assert!(!result.error.is_empty());
    }
}

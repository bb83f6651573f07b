// Function registry and the argument-stack protocol. Built-ins are
// registered by family; each entry carries its handler, an arity rule,
// an argument-definition key, help text and class tags for external
// help and UI tooling.

use rustc_hash::FxHashMap;

use super::eval::Evaluator;
use super::value::{ErrorKind, Operand, TypedValue};

pub(crate) mod database;
pub(crate) mod datetime;
pub(crate) mod financial;
pub(crate) mod logical;
pub(crate) mod lookup;
pub(crate) mod math;
pub(crate) mod stat;
pub(crate) mod text;

/// Per-call argument list. Arguments come off the caller's operand
/// stack in reverse, so popping this list yields them left to right.
pub(crate) struct ArgList {
    items: Vec<Operand>,
}

impl ArgList {
    pub(crate) fn next(&mut self) -> Option<Operand> {
        self.items.pop()
    }

    /// Reinsert an operand so it is the next one popped; ranges being
    /// stepped through push their remainder back this way.
    pub(crate) fn push_front(&mut self, op: Operand) {
        self.items.push(op);
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// How many arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Unchecked,
}

impl Arity {
    fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exact(want) => n == *want,
            Arity::AtLeast(min) => n >= *min,
            Arity::Unchecked => true,
        }
    }
}

pub(crate) type Handler = fn(&str, &mut ArgList, &mut Evaluator<'_>) -> Operand;

/// Registration record for one function.
#[derive(Debug, Clone, Copy)]
pub struct FunctionDef {
    pub(crate) handler: Handler,
    pub arity: Arity,
    /// Key into the argument-pattern descriptions used by help UIs.
    pub arg_def: &'static str,
    pub help: &'static str,
    /// Class tags, e.g. "stat" or "math".
    pub class: &'static str,
    /// Volatile functions are recorded in the freshness info on every
    /// dispatch; their results can change without any cell edit.
    pub volatile: bool,
}

/// Name-keyed function table. Lives in the EvalContext; one per pass,
/// not a process-wide singleton.
pub struct FunctionRegistry {
    map: FxHashMap<String, FunctionDef>,
}

impl FunctionRegistry {
    pub fn empty() -> FunctionRegistry {
        FunctionRegistry {
            map: FxHashMap::default(),
        }
    }

    /// The full built-in set.
    pub fn builtin() -> FunctionRegistry {
        let mut reg = FunctionRegistry::empty();
        math::register(&mut reg);
        stat::register(&mut reg);
        text::register(&mut reg);
        logical::register(&mut reg);
        lookup::register(&mut reg);
        datetime::register(&mut reg);
        financial::register(&mut reg);
        database::register(&mut reg);
        reg
    }

    pub fn register(&mut self, name: &str, def: FunctionDef) {
        self.map.insert(name.to_uppercase(), def);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.map.get(&name.to_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registration surface for external help and UI tooling.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &FunctionDef)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        FunctionRegistry::builtin()
    }
}

/// Dispatch a name from the postfix stream. Arguments are moved off the
/// caller stack down to the FunctionStart sentinel, restoring
/// left-to-right order. A bare unknown name with no arguments is pushed
/// back as a name operand to be dereferenced later; an unknown name
/// with arguments is a #NAME? error. Arity violations push a typed
/// #VALUE! operand rather than failing hard.
pub(crate) fn call(name: &str, ev: &mut Evaluator<'_>) {
    let mut items = Vec::new();
    let mut found_start = false;
    while let Some(op) = ev.stack.pop() {
        if matches!(op, Operand::FunctionStart) {
            found_start = true;
            break;
        }
        items.push(op);
    }
    if !found_start {
        ev.note_error("Missing function start marker");
    }
    let mut args = ArgList { items };

    let folded = name.to_uppercase();
    let def = match ev.ctx.functions.get(&folded).copied() {
        Some(def) => def,
        None => {
            if args.is_empty() {
                ev.stack.push(Operand::Name(name.to_string()));
            } else {
                ev.note_error(format!("Unknown function {}", folded));
                ev.stack.push(Operand::error(ErrorKind::Name));
            }
            return;
        }
    };

    if !def.arity.accepts(args.len()) {
        ev.note_error(format!(
            "Incorrect number of arguments to function {}",
            folded
        ));
        ev.stack.push(Operand::error(ErrorKind::Value));
        return;
    }

    if def.volatile {
        ev.ctx.freshness.volatile_used.insert(folded.clone());
    }

    let result = (def.handler)(&folded, &mut args, ev);
    ev.stack.push(result);
}

// ── shared argument helpers ───────────────────────────────────────

/// Pop the next value, stepping through ranges one cell at a time via
/// the cursor embedded in the range itself; an unexhausted remainder is
/// pushed back so the next pop continues it.
pub(crate) fn next_value(args: &mut ArgList, ev: &mut Evaluator<'_>) -> Option<TypedValue> {
    loop {
        let op = args.next()?;
        match ev.resolve(op) {
            Operand::Range(range) => match range.step() {
                None => continue,
                Some((cell, rest)) => {
                    if let Some(rest) = rest {
                        args.push_front(Operand::Range(rest));
                    }
                    return Some(ev.cell_value(&cell));
                }
            },
            Operand::Coord(cellref) => return Some(ev.cell_value(&cellref)),
            Operand::Typed(tv) => return Some(tv),
            Operand::Name(_) | Operand::FunctionStart => {
                return Some(TypedValue::error(ErrorKind::Value))
            }
        }
    }
}

/// Pop the next argument as a scalar. Ranges are rejected here; use
/// `next_value` for series arguments.
pub(crate) fn next_scalar(args: &mut ArgList, ev: &mut Evaluator<'_>) -> TypedValue {
    match args.next() {
        Some(op) => ev.scalar(op),
        None => TypedValue::blank(),
    }
}

/// Pop the next argument as a number, or the error operand to return.
pub(crate) fn number_arg(args: &mut ArgList, ev: &mut Evaluator<'_>) -> Result<f64, Operand> {
    let tv = match args.next() {
        Some(op) => ev.as_number(op),
        None => TypedValue::blank(),
    };
    if tv.is_error() {
        return Err(Operand::Typed(tv));
    }
    if tv.vtype.is_text() {
        return Err(Operand::error(ErrorKind::Value));
    }
    Ok(tv.value.as_number())
}

/// Pop the next argument as text, or the error operand to return.
pub(crate) fn text_arg(args: &mut ArgList, ev: &mut Evaluator<'_>) -> Result<String, Operand> {
    let tv = match args.next() {
        Some(op) => ev.as_text(op),
        None => TypedValue::blank(),
    };
    if tv.is_error() {
        return Err(Operand::Typed(tv));
    }
    Ok(tv.value.as_text())
}

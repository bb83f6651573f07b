// Logical and information built-ins. Arguments reach these already
// evaluated (there is no short-circuiting in a postfix program), so IF
// simply picks one of the operands it was handed.

use super::super::eval::Evaluator;
use super::super::value::{ErrorKind, NumberKind, Operand, TypedValue, ValueType};
use super::{next_scalar, next_value, ArgList, Arity, FunctionDef, FunctionRegistry, Handler};

fn entry(handler: Handler, arity: Arity, arg_def: &'static str, help: &'static str) -> FunctionDef {
    FunctionDef {
        handler,
        arity,
        arg_def,
        help,
        class: "test",
        volatile: false,
    }
}

pub(crate) fn register(reg: &mut FunctionRegistry) {
    reg.register(
        "IF",
        entry(logical_if, Arity::AtLeast(2), "iab", "Pick a value by condition"),
    );
    reg.register(
        "AND",
        entry(logical_and_or, Arity::AtLeast(1), "vn", "TRUE when every argument is nonzero"),
    );
    reg.register(
        "OR",
        entry(logical_and_or, Arity::AtLeast(1), "vn", "TRUE when any argument is nonzero"),
    );
    reg.register(
        "NOT",
        entry(logical_not, Arity::Exact(1), "v", "Logical negation"),
    );
    reg.register(
        "TRUE",
        entry(logical_const, Arity::Exact(0), "", "The logical value TRUE"),
    );
    reg.register(
        "FALSE",
        entry(logical_const, Arity::Exact(0), "", "The logical value FALSE"),
    );
    reg.register(
        "NA",
        entry(logical_na, Arity::Exact(0), "", "The error value #N/A"),
    );

    let is = |help| entry(logical_is, Arity::Exact(1), "v", help);
    reg.register("ISBLANK", is("TRUE for a blank cell"));
    reg.register("ISERR", is("TRUE for any error except #N/A"));
    reg.register("ISERROR", is("TRUE for any error value"));
    reg.register("ISNA", is("TRUE for the #N/A error"));
    reg.register("ISLOGICAL", is("TRUE for a logical value"));
    reg.register("ISNUMBER", is("TRUE for a numeric value"));
    reg.register("ISTEXT", is("TRUE for a text value"));
    reg.register("ISNONTEXT", is("TRUE for anything but text"));
}

fn logical_if(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 3 {
        return Operand::error(ErrorKind::Value);
    }
    let cond = next_scalar(args, ev);
    if cond.is_error() {
        return Operand::Typed(cond);
    }
    let take_first = cond.value.as_number() != 0.0;
    let when_true = args.next();
    let when_false = args.next();
    let chosen = if take_first { when_true } else { when_false };
    // The branch may be a reference; it dereferences downstream.
    chosen.unwrap_or(Operand::Typed(TypedValue::logical(false)))
}

fn logical_and_or(name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let mut any_true = false;
    let mut all_true = true;
    let mut saw_value = false;
    while let Some(tv) = next_value(args, ev) {
        match tv.vtype {
            ValueType::Error(_) => return Operand::Typed(tv),
            ValueType::Blank => {}
            ValueType::Text(_) => return Operand::error(ErrorKind::Value),
            ValueType::Number(_) => {
                saw_value = true;
                if tv.value.as_number() != 0.0 {
                    any_true = true;
                } else {
                    all_true = false;
                }
            }
        }
    }
    if !saw_value {
        return Operand::error(ErrorKind::Value);
    }
    Operand::Typed(TypedValue::logical(if name == "AND" {
        all_true
    } else {
        any_true
    }))
}

fn logical_not(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let tv = next_scalar(args, ev);
    if tv.is_error() {
        return Operand::Typed(tv);
    }
    if tv.vtype.is_text() {
        return Operand::error(ErrorKind::Value);
    }
    Operand::Typed(TypedValue::logical(tv.value.as_number() == 0.0))
}

fn logical_const(name: &str, _args: &mut ArgList, _ev: &mut Evaluator<'_>) -> Operand {
    Operand::Typed(TypedValue::logical(name == "TRUE"))
}

fn logical_na(_name: &str, _args: &mut ArgList, _ev: &mut Evaluator<'_>) -> Operand {
    Operand::error(ErrorKind::NA)
}

fn logical_is(name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let tv = next_scalar(args, ev);
    let result = match name {
        "ISBLANK" => tv.vtype.is_blank(),
        "ISERR" => matches!(tv.vtype, ValueType::Error(kind) if kind != ErrorKind::NA),
        "ISERROR" => tv.vtype.is_error(),
        "ISNA" => tv.vtype == ValueType::Error(ErrorKind::NA),
        "ISLOGICAL" => tv.vtype == ValueType::Number(NumberKind::Logical),
        "ISNUMBER" => tv.vtype.is_number(),
        "ISTEXT" => tv.vtype.is_text(),
        _ => !tv.vtype.is_text(),
    };
    Operand::Typed(TypedValue::logical(result))
}

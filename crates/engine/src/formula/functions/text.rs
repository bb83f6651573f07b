// Text built-ins. Positions are 1-based and lengths are counted in
// characters, not bytes.

use super::super::eval::Evaluator;
use super::super::value::{ErrorKind, Operand, TypedValue, ValueType};
use super::{next_scalar, number_arg, text_arg, ArgList, Arity, FunctionDef, FunctionRegistry, Handler};

fn entry(handler: Handler, arity: Arity, arg_def: &'static str, help: &'static str) -> FunctionDef {
    FunctionDef {
        handler,
        arity,
        arg_def,
        help,
        class: "text",
        volatile: false,
    }
}

pub(crate) fn register(reg: &mut FunctionRegistry) {
    reg.register(
        "LEFT",
        entry(text_left_right, Arity::AtLeast(1), "tn", "Leading characters of a string"),
    );
    reg.register(
        "RIGHT",
        entry(text_left_right, Arity::AtLeast(1), "tn", "Trailing characters of a string"),
    );
    reg.register(
        "MID",
        entry(text_mid, Arity::Exact(3), "tnn", "Substring by position and length"),
    );
    reg.register(
        "LEN",
        entry(text_len, Arity::Exact(1), "t", "Length of a string in characters"),
    );
    let case = |help| entry(text_case, Arity::Exact(1), "t", help);
    reg.register("LOWER", case("Lower-case a string"));
    reg.register("UPPER", case("Upper-case a string"));
    reg.register("PROPER", case("Capitalize each word"));
    reg.register(
        "TRIM",
        entry(text_trim, Arity::Exact(1), "t", "Strip leading, trailing and doubled spaces"),
    );
    reg.register(
        "REPT",
        entry(text_rept, Arity::Exact(2), "tn", "Repeat a string"),
    );
    reg.register(
        "REPLACE",
        entry(text_replace, Arity::Exact(4), "tnnt", "Replace a character span"),
    );
    reg.register(
        "SUBSTITUTE",
        entry(
            text_substitute,
            Arity::AtLeast(3),
            "ttt",
            "Replace occurrences of one string with another",
        ),
    );
    reg.register(
        "FIND",
        entry(
            text_find,
            Arity::AtLeast(2),
            "ttn",
            "Position of one string inside another (case-sensitive)",
        ),
    );
    reg.register(
        "EXACT",
        entry(text_exact, Arity::Exact(2), "tt", "Case-sensitive string equality"),
    );
    reg.register(
        "VALUE",
        entry(text_value, Arity::Exact(1), "t", "Convert text to a number"),
    );
    reg.register(
        "T",
        entry(text_t, Arity::Exact(1), "v", "The argument if it is text, else empty text"),
    );
    reg.register(
        "N",
        entry(text_n, Arity::Exact(1), "v", "The argument if it is a number, else 0"),
    );
}

fn text_left_right(name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let s = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let count = if args.is_empty() {
        1.0
    } else {
        match number_arg(args, ev) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };
    if count < 0.0 {
        return Operand::error(ErrorKind::Value);
    }
    let count = count.trunc() as usize;
    let chars: Vec<char> = s.chars().collect();
    let taken: String = if name == "LEFT" {
        chars.iter().take(count).collect()
    } else {
        let skip = chars.len().saturating_sub(count);
        chars.iter().skip(skip).collect()
    };
    Operand::Typed(TypedValue::text(taken))
}

fn text_mid(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let s = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let start = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let len = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if start < 1.0 || len < 0.0 {
        return Operand::error(ErrorKind::Value);
    }
    let taken: String = s
        .chars()
        .skip(start.trunc() as usize - 1)
        .take(len.trunc() as usize)
        .collect();
    Operand::Typed(TypedValue::text(taken))
}

fn text_len(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    match text_arg(args, ev) {
        Ok(s) => Operand::number(s.chars().count() as f64),
        Err(e) => e,
    }
}

fn text_case(name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let s = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let result = match name {
        "LOWER" => s.to_lowercase(),
        "UPPER" => s.to_uppercase(),
        _ => {
            // PROPER: upper-case every letter that follows a non-letter.
            let mut out = String::with_capacity(s.len());
            let mut at_word_start = true;
            for ch in s.chars() {
                if ch.is_alphabetic() {
                    if at_word_start {
                        out.extend(ch.to_uppercase());
                    } else {
                        out.extend(ch.to_lowercase());
                    }
                    at_word_start = false;
                } else {
                    out.push(ch);
                    at_word_start = true;
                }
            }
            out
        }
    };
    Operand::Typed(TypedValue::text(result))
}

fn text_trim(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    match text_arg(args, ev) {
        Ok(s) => {
            let collapsed = s.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ");
            Operand::Typed(TypedValue::text(collapsed))
        }
        Err(e) => e,
    }
}

fn text_rept(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let s = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let count = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if count < 0.0 {
        return Operand::error(ErrorKind::Value);
    }
    Operand::Typed(TypedValue::text(s.repeat(count.trunc() as usize)))
}

fn text_replace(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let s = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let start = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let len = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let replacement = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if start < 1.0 || len < 0.0 {
        return Operand::error(ErrorKind::Value);
    }
    let start = start.trunc() as usize - 1;
    let len = len.trunc() as usize;
    let chars: Vec<char> = s.chars().collect();
    let mut out: String = chars.iter().take(start).collect();
    out.push_str(&replacement);
    out.extend(chars.iter().skip(start + len));
    Operand::Typed(TypedValue::text(out))
}

fn text_substitute(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let s = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let old = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let new = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let instance = if args.is_empty() {
        None
    } else {
        match number_arg(args, ev) {
            Ok(v) if v >= 1.0 => Some(v.trunc() as usize),
            Ok(_) => return Operand::error(ErrorKind::Value),
            Err(e) => return e,
        }
    };
    if old.is_empty() {
        return Operand::Typed(TypedValue::text(s));
    }
    let result = match instance {
        None => s.replace(&old, &new),
        Some(nth) => {
            let mut out = String::new();
            let mut rest = s.as_str();
            let mut seen = 0usize;
            while let Some(pos) = rest.find(&old) {
                seen += 1;
                out.push_str(&rest[..pos]);
                if seen == nth {
                    out.push_str(&new);
                } else {
                    out.push_str(&old);
                }
                rest = &rest[pos + old.len()..];
            }
            out.push_str(rest);
            out
        }
    };
    Operand::Typed(TypedValue::text(result))
}

fn text_find(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let needle = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let haystack = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let start = if args.is_empty() {
        1.0
    } else {
        match number_arg(args, ev) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };
    let chars: Vec<char> = haystack.chars().collect();
    if start < 1.0 || start.trunc() as usize > chars.len() + 1 {
        return Operand::error(ErrorKind::Value);
    }
    let skip = start.trunc() as usize - 1;
    let tail: String = chars.iter().skip(skip).collect();
    match tail.find(&needle) {
        Some(byte_pos) => {
            let char_pos = tail[..byte_pos].chars().count();
            Operand::number((skip + char_pos + 1) as f64)
        }
        None => Operand::error(ErrorKind::Value),
    }
}

fn text_exact(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let a = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let b = match text_arg(args, ev) {
        Ok(s) => s,
        Err(e) => return e,
    };
    Operand::Typed(TypedValue::logical(a == b))
}

fn text_value(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let tv = next_scalar(args, ev);
    if tv.is_error() {
        return Operand::Typed(tv);
    }
    match tv.vtype {
        ValueType::Number(_) | ValueType::Blank => Operand::number(tv.value.as_number()),
        _ => match tv.value.as_text().trim().parse::<f64>() {
            Ok(n) => Operand::number(n),
            Err(_) => Operand::error(ErrorKind::Value),
        },
    }
}

fn text_t(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let tv = next_scalar(args, ev);
    if tv.is_error() {
        return Operand::Typed(tv);
    }
    if tv.vtype.is_text() {
        Operand::Typed(tv)
    } else {
        Operand::Typed(TypedValue::text(""))
    }
}

fn text_n(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let tv = next_scalar(args, ev);
    if tv.is_error() {
        return Operand::Typed(tv);
    }
    match tv.vtype {
        ValueType::Number(_) => Operand::number(tv.value.as_number()),
        _ => Operand::number(0.0),
    }
}

#[cfg(test)]
mod tests {
    use crate::formula::eval::{evaluate_text, EvalContext, EvalResult};
    use crate::formula::value::Value;
    use crate::sheet::Sheet;

    fn eval(text: &str) -> EvalResult {
        let sheet = Sheet::new("Sheet1");
        let mut ctx = EvalContext::new();
        evaluate_text(text, &sheet, &mut ctx, false)
    }

    fn text_of(formula: &str) -> String {
        match eval(formula).value {
            Value::Text(s) => s,
            Value::Number(n) => panic!("expected text, got {}", n),
        }
    }

    #[test]
    fn test_left_right_mid() {
        assert_eq!(text_of("LEFT(\"spreadsheet\",6)"), "spread");
        assert_eq!(text_of("LEFT(\"abc\")"), "a");
        assert_eq!(text_of("RIGHT(\"spreadsheet\",5)"), "sheet");
        assert_eq!(text_of("MID(\"spreadsheet\",7,5)"), "sheet");
        assert_eq!(text_of("RIGHT(\"ab\",9)"), "ab");
    }

    #[test]
    fn test_len_counts_characters() {
        assert_eq!(eval("LEN(\"hello\")").value, Value::Number(5.0));
        assert_eq!(eval("LEN(\"\")").value, Value::Number(0.0));
    }

    #[test]
    fn test_case_functions() {
        assert_eq!(text_of("UPPER(\"mixed Case\")"), "MIXED CASE");
        assert_eq!(text_of("LOWER(\"MIXED Case\")"), "mixed case");
        assert_eq!(text_of("PROPER(\"hello world-two\")"), "Hello World-Two");
    }

    #[test]
    fn test_trim_collapses_inner_spaces() {
        assert_eq!(text_of("TRIM(\"  a   b  \")"), "a b");
    }

    #[test]
    fn test_rept_and_replace() {
        assert_eq!(text_of("REPT(\"ab\",3)"), "ababab");
        assert_eq!(text_of("REPLACE(\"abcdef\",2,3,\"X\")"), "aXef");
    }

    #[test]
    fn test_substitute_all_and_nth() {
        assert_eq!(text_of("SUBSTITUTE(\"a-b-c\",\"-\",\"+\")"), "a+b+c");
        assert_eq!(text_of("SUBSTITUTE(\"a-b-c\",\"-\",\"+\",2)"), "a-b+c");
    }

    #[test]
    fn test_find_is_case_sensitive_and_one_based() {
        assert_eq!(eval("FIND(\"b\",\"abc\")").value, Value::Number(2.0));
        assert_eq!(eval("FIND(\"c\",\"abcabc\",4)").value, Value::Number(6.0));
        assert_eq!(eval("FIND(\"B\",\"abc\")").vtype, "e#VALUE!");
    }

    #[test]
    fn test_exact_is_case_sensitive() {
        assert_eq!(eval("EXACT(\"abc\",\"abc\")").value, Value::Number(1.0));
        assert_eq!(eval("EXACT(\"abc\",\"ABC\")").value, Value::Number(0.0));
    }

    #[test]
    fn test_value_t_n() {
        assert_eq!(eval("VALUE(\" 12.5 \")").value, Value::Number(12.5));
        assert_eq!(eval("VALUE(\"apple\")").vtype, "e#VALUE!");
        assert_eq!(text_of("T(\"abc\")"), "abc");
        assert_eq!(text_of("T(5)"), "");
        assert_eq!(eval("N(5)").value, Value::Number(5.0));
        assert_eq!(eval("N(\"abc\")").value, Value::Number(0.0));
    }

    #[test]
    fn test_numbers_render_in_text_functions() {
        assert_eq!(text_of("LEFT(1234,2)"), "12");
    }
}

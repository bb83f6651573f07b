// Math built-ins: single-argument functions share one handler and
// dispatch on the registered name; domain violations come back as
// #NUM! operands.

use super::super::eval::Evaluator;
use super::super::value::{ErrorKind, Operand};
use super::{number_arg, ArgList, Arity, FunctionDef, FunctionRegistry, Handler};

fn entry(handler: Handler, arity: Arity, arg_def: &'static str, help: &'static str) -> FunctionDef {
    FunctionDef {
        handler,
        arity,
        arg_def,
        help,
        class: "math",
        volatile: false,
    }
}

pub(crate) fn register(reg: &mut FunctionRegistry) {
    let one = |help| entry(math_one, Arity::Exact(1), "v", help);
    reg.register("ABS", one("Absolute value"));
    reg.register("ACOS", one("Arc cosine, in radians"));
    reg.register("ASIN", one("Arc sine, in radians"));
    reg.register("ATAN", one("Arc tangent, in radians"));
    reg.register("COS", one("Cosine of an angle in radians"));
    reg.register("SIN", one("Sine of an angle in radians"));
    reg.register("TAN", one("Tangent of an angle in radians"));
    reg.register("DEGREES", one("Convert radians to degrees"));
    reg.register("RADIANS", one("Convert degrees to radians"));
    reg.register("EXP", one("e raised to a power"));
    reg.register("LN", one("Natural logarithm"));
    reg.register("LOG10", one("Base-10 logarithm"));
    reg.register("SQRT", one("Square root"));
    reg.register("INT", one("Round down to the nearest integer"));
    reg.register("EVEN", one("Round away from zero to an even integer"));
    reg.register("ODD", one("Round away from zero to an odd integer"));
    reg.register("FACT", one("Factorial"));

    reg.register("PI", entry(math_pi, Arity::Exact(0), "", "The constant pi"));
    reg.register(
        "ATAN2",
        entry(math_atan2, Arity::Exact(2), "xy", "Arc tangent of y/x"),
    );
    reg.register(
        "MOD",
        entry(math_mod, Arity::Exact(2), "vd", "Remainder after division"),
    );
    reg.register(
        "POWER",
        entry(math_power, Arity::Exact(2), "vp", "One number raised to another"),
    );
    reg.register(
        "LOG",
        entry(
            math_log,
            Arity::AtLeast(1),
            "vb",
            "Logarithm to a given base (default 10)",
        ),
    );
    reg.register(
        "ROUND",
        entry(
            math_round,
            Arity::AtLeast(1),
            "vd",
            "Round to a number of decimal places",
        ),
    );
    reg.register(
        "TRUNC",
        entry(
            math_trunc,
            Arity::AtLeast(1),
            "vd",
            "Truncate toward zero to a number of decimal places",
        ),
    );
}

fn math_one(name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let v = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let result = match name {
        "ABS" => v.abs(),
        "ACOS" => {
            if !(-1.0..=1.0).contains(&v) {
                return Operand::error(ErrorKind::Num);
            }
            v.acos()
        }
        "ASIN" => {
            if !(-1.0..=1.0).contains(&v) {
                return Operand::error(ErrorKind::Num);
            }
            v.asin()
        }
        "ATAN" => v.atan(),
        "COS" => v.cos(),
        "SIN" => v.sin(),
        "TAN" => v.tan(),
        "DEGREES" => v.to_degrees(),
        "RADIANS" => v.to_radians(),
        "EXP" => v.exp(),
        "LN" => {
            if v <= 0.0 {
                return Operand::error(ErrorKind::Num);
            }
            v.ln()
        }
        "LOG10" => {
            if v <= 0.0 {
                return Operand::error(ErrorKind::Num);
            }
            v.log10()
        }
        "SQRT" => {
            if v < 0.0 {
                return Operand::error(ErrorKind::Num);
            }
            v.sqrt()
        }
        "INT" => v.floor(),
        "EVEN" => round_away(v, 2.0),
        "ODD" => {
            let n = v.abs();
            let odd = if n <= 1.0 {
                1.0
            } else {
                let k = ((n - 1.0) / 2.0).ceil();
                2.0 * k + 1.0
            };
            if v < 0.0 {
                -odd
            } else {
                odd
            }
        }
        "FACT" => {
            if v < 0.0 {
                return Operand::error(ErrorKind::Num);
            }
            let mut f = 1.0;
            let mut i = 2.0;
            while i <= v.floor() {
                f *= i;
                i += 1.0;
            }
            f
        }
        _ => return Operand::error(ErrorKind::Name),
    };
    Operand::number(result)
}

/// Round away from zero up to the next multiple of `step`.
fn round_away(v: f64, step: f64) -> f64 {
    let rounded = (v.abs() / step).ceil() * step;
    if v < 0.0 {
        -rounded
    } else {
        rounded
    }
}

fn math_pi(_name: &str, _args: &mut ArgList, _ev: &mut Evaluator<'_>) -> Operand {
    Operand::number(std::f64::consts::PI)
}

fn math_atan2(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let x = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let y = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if x == 0.0 && y == 0.0 {
        return Operand::error(ErrorKind::Div0);
    }
    Operand::number(y.atan2(x))
}

fn math_mod(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let n = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let d = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if d == 0.0 {
        return Operand::error(ErrorKind::Div0);
    }
    // The result carries the divisor's sign.
    Operand::number(n - d * (n / d).floor())
}

fn math_power(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let base = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exp = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    Operand::number(base.powf(exp))
}

fn math_log(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let v = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let base = if args.is_empty() {
        10.0
    } else {
        match number_arg(args, ev) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };
    if v <= 0.0 || base <= 0.0 || base == 1.0 {
        return Operand::error(ErrorKind::Num);
    }
    Operand::number(v.log(base))
}

fn math_round(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let v = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let digits = if args.is_empty() {
        0.0
    } else {
        match number_arg(args, ev) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };
    let factor = 10f64.powi(digits.trunc() as i32);
    Operand::number((v * factor).round() / factor)
}

fn math_trunc(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let v = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let digits = if args.is_empty() {
        0.0
    } else {
        match number_arg(args, ev) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };
    let factor = 10f64.powi(digits.trunc() as i32);
    Operand::number((v * factor).trunc() / factor)
}

// Financial built-ins. The closed forms share one payment kernel; the
// iterative solvers (RATE, IRR) run bounded Newton-Raphson with a fixed
// epsilon and iteration cap and fail as #NUM! instead of iterating
// unboundedly.

use super::super::eval::Evaluator;
use super::super::value::{ErrorKind, Operand, ValueType};
use super::{next_value, number_arg, ArgList, Arity, FunctionDef, FunctionRegistry, Handler};

const SOLVER_EPSILON: f64 = 1e-7;
const SOLVER_MAX_ITERATIONS: usize = 50;

fn entry(handler: Handler, arity: Arity, arg_def: &'static str, help: &'static str) -> FunctionDef {
    FunctionDef {
        handler,
        arity,
        arg_def,
        help,
        class: "financial",
        volatile: false,
    }
}

pub(crate) fn register(reg: &mut FunctionRegistry) {
    reg.register(
        "PMT",
        entry(pmt_fn, Arity::AtLeast(3), "rnp", "Loan payment at a constant rate"),
    );
    reg.register(
        "FV",
        entry(fv_fn, Arity::AtLeast(3), "rnp", "Future value of an investment"),
    );
    reg.register(
        "PV",
        entry(pv_fn, Arity::AtLeast(3), "rnp", "Present value of an investment"),
    );
    reg.register(
        "NPER",
        entry(nper_fn, Arity::AtLeast(3), "rpp", "Number of periods of an investment"),
    );
    reg.register(
        "NPV",
        entry(npv_fn, Arity::AtLeast(2), "rv", "Net present value of periodic cash flows"),
    );
    reg.register(
        "IRR",
        entry(irr_fn, Arity::AtLeast(1), "rg", "Internal rate of return of cash flows"),
    );
    reg.register(
        "RATE",
        entry(rate_fn, Arity::AtLeast(3), "npv", "Interest rate per period of an annuity"),
    );
    reg.register(
        "SLN",
        entry(sln_fn, Arity::Exact(3), "csl", "Straight-line depreciation"),
    );
    reg.register(
        "SYD",
        entry(syd_fn, Arity::Exact(4), "cslp", "Sum-of-years depreciation"),
    );
    reg.register(
        "DDB",
        entry(ddb_fn, Arity::AtLeast(4), "cslp", "Double-declining-balance depreciation"),
    );
}

/// Payment for a loan with constant payments and interest rate.
fn compute_pmt(rate: f64, nper: f64, pv: f64, fv: f64, due_start: bool) -> f64 {
    if rate == 0.0 {
        return -(pv + fv) / nper;
    }
    let pow = (1.0 + rate).powf(nper);
    let pmt = (rate * (pv * pow + fv)) / (pow - 1.0);
    if due_start {
        -pmt / (1.0 + rate)
    } else {
        -pmt
    }
}

/// Pop up to two optional trailing numbers: fv then payment-type.
fn optional_fv_type(args: &mut ArgList, ev: &mut Evaluator<'_>) -> Result<(f64, bool), Operand> {
    let fv = if args.is_empty() {
        0.0
    } else {
        number_arg(args, ev)?
    };
    let due_start = if args.is_empty() {
        false
    } else {
        number_arg(args, ev)? != 0.0
    };
    Ok((fv, due_start))
}

fn pmt_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 5 {
        return Operand::error(ErrorKind::Value);
    }
    let rate = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let nper = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pv = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (fv, due_start) = match optional_fv_type(args, ev) {
        Ok(pair) => pair,
        Err(e) => return e,
    };
    if nper == 0.0 {
        return Operand::error(ErrorKind::Num);
    }
    Operand::number(compute_pmt(rate, nper, pv, fv, due_start))
}

fn fv_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 5 {
        return Operand::error(ErrorKind::Value);
    }
    let rate = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let nper = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pmt = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pv = if args.is_empty() {
        0.0
    } else {
        match number_arg(args, ev) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };
    let due_start = if args.is_empty() {
        false
    } else {
        match number_arg(args, ev) {
            Ok(v) => v != 0.0,
            Err(e) => return e,
        }
    };
    let fv = if rate == 0.0 {
        -pv - pmt * nper
    } else {
        let pow = (1.0 + rate).powf(nper);
        let annuity = if due_start {
            pmt * (1.0 + rate) * (pow - 1.0) / rate
        } else {
            pmt * (pow - 1.0) / rate
        };
        -pv * pow - annuity
    };
    Operand::number(fv)
}

fn pv_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 5 {
        return Operand::error(ErrorKind::Value);
    }
    let rate = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let nper = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pmt = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (fv, due_start) = match optional_fv_type(args, ev) {
        Ok(pair) => pair,
        Err(e) => return e,
    };
    let pv = if rate == 0.0 {
        -fv - pmt * nper
    } else {
        let pow = (1.0 + rate).powf(nper);
        let annuity = if due_start {
            pmt * (1.0 + rate) * (pow - 1.0) / rate
        } else {
            pmt * (pow - 1.0) / rate
        };
        (-fv - annuity) / pow
    };
    Operand::number(pv)
}

fn nper_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 5 {
        return Operand::error(ErrorKind::Value);
    }
    let rate = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pmt = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pv = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (fv, due_start) = match optional_fv_type(args, ev) {
        Ok(pair) => pair,
        Err(e) => return e,
    };
    if rate == 0.0 {
        if pmt == 0.0 {
            return Operand::error(ErrorKind::Num);
        }
        return Operand::number(-(pv + fv) / pmt);
    }
    let adjusted = pmt * (1.0 + if due_start { rate } else { 0.0 }) / rate;
    let numerator = adjusted - fv;
    let denominator = pv + adjusted;
    if denominator == 0.0 || numerator / denominator <= 0.0 {
        return Operand::error(ErrorKind::Num);
    }
    Operand::number((numerator / denominator).ln() / (1.0 + rate).ln())
}

/// Collect numeric cash flows from the remaining arguments, skipping
/// blanks and text the way series aggregation does.
fn collect_cash_flows(args: &mut ArgList, ev: &mut Evaluator<'_>) -> Result<Vec<f64>, Operand> {
    let mut flows = Vec::new();
    while let Some(tv) = next_value(args, ev) {
        match tv.vtype {
            ValueType::Error(_) => return Err(Operand::Typed(tv)),
            ValueType::Number(_) => flows.push(tv.value.as_number()),
            ValueType::Blank | ValueType::Text(_) => {}
        }
    }
    Ok(flows)
}

fn npv_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let rate = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if rate == -1.0 {
        return Operand::error(ErrorKind::Div0);
    }
    let flows = match collect_cash_flows(args, ev) {
        Ok(flows) => flows,
        Err(e) => return e,
    };
    let mut npv = 0.0;
    for (i, flow) in flows.iter().enumerate() {
        npv += flow / (1.0 + rate).powi(i as i32 + 1);
    }
    Operand::number(npv)
}

fn irr_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 2 {
        return Operand::error(ErrorKind::Value);
    }
    // The optional guess trails the cash-flow series.
    let mut guess = 0.1;
    if args.len() == 2 {
        let first = match args.next() {
            Some(op) => op,
            None => return Operand::error(ErrorKind::Value),
        };
        match number_arg(args, ev) {
            Ok(v) => guess = v,
            Err(e) => return e,
        }
        args.push_front(first);
    }
    let flows = match collect_cash_flows(args, ev) {
        Ok(flows) => flows,
        Err(e) => return e,
    };
    if flows.len() < 2
        || !flows.iter().any(|&v| v > 0.0)
        || !flows.iter().any(|&v| v < 0.0)
    {
        return Operand::error(ErrorKind::Num);
    }

    let mut rate = guess;
    for _ in 0..SOLVER_MAX_ITERATIONS {
        let base = 1.0 + rate;
        if base <= 0.0 || !rate.is_finite() {
            return Operand::error(ErrorKind::Num);
        }
        let mut npv = 0.0;
        let mut derivative = 0.0;
        for (i, flow) in flows.iter().enumerate() {
            let t = i as f64;
            npv += flow / base.powf(t);
            if i > 0 {
                derivative -= t * flow / base.powf(t + 1.0);
            }
        }
        if derivative == 0.0 {
            return Operand::error(ErrorKind::Num);
        }
        let next = rate - npv / derivative;
        if (next - rate).abs() <= SOLVER_EPSILON {
            return Operand::number(next);
        }
        rate = next;
    }
    Operand::error(ErrorKind::Num)
}

fn rate_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 6 {
        return Operand::error(ErrorKind::Value);
    }
    let nper = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pmt = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pv = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (fv, due_start) = match optional_fv_type(args, ev) {
        Ok(pair) => pair,
        Err(e) => return e,
    };
    let guess = if args.is_empty() {
        0.1
    } else {
        match number_arg(args, ev) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };
    if nper <= 0.0 {
        return Operand::error(ErrorKind::Num);
    }

    // Residual of the annuity equation at a candidate rate.
    let residual = |rate: f64| -> f64 {
        if rate == 0.0 {
            return pv + pmt * nper + fv;
        }
        let pow = (1.0 + rate).powf(nper);
        let annuity = pmt * (1.0 + if due_start { rate } else { 0.0 }) * (pow - 1.0) / rate;
        pv * pow + annuity + fv
    };

    let mut rate = guess;
    for _ in 0..SOLVER_MAX_ITERATIONS {
        if rate <= -1.0 || !rate.is_finite() {
            return Operand::error(ErrorKind::Num);
        }
        let here = residual(rate);
        if here.abs() <= SOLVER_EPSILON {
            return Operand::number(rate);
        }
        let step = SOLVER_EPSILON.max(rate.abs() * 1e-5);
        let slope = (residual(rate + step) - here) / step;
        if slope == 0.0 || !slope.is_finite() {
            return Operand::error(ErrorKind::Num);
        }
        let next = rate - here / slope;
        if (next - rate).abs() <= SOLVER_EPSILON {
            return Operand::number(next);
        }
        rate = next;
    }
    Operand::error(ErrorKind::Num)
}

fn sln_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let cost = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let salvage = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let life = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if life == 0.0 {
        return Operand::error(ErrorKind::Div0);
    }
    Operand::number((cost - salvage) / life)
}

fn syd_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let cost = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let salvage = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let life = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if life <= 0.0 || period < 1.0 || period > life {
        return Operand::error(ErrorKind::Num);
    }
    Operand::number(
        (cost - salvage) * (life - period + 1.0) * 2.0 / (life * (life + 1.0)),
    )
}

fn ddb_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 5 {
        return Operand::error(ErrorKind::Value);
    }
    let cost = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let salvage = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let life = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let factor = if args.is_empty() {
        2.0
    } else {
        match number_arg(args, ev) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };
    if life <= 0.0 || period < 1.0 || period > life.ceil() || factor <= 0.0 {
        return Operand::error(ErrorKind::Num);
    }

    let rate = factor / life;
    let mut book = cost;
    let mut depreciation = 0.0;
    for _ in 0..period.ceil() as usize {
        depreciation = (book * rate).min(book - salvage);
        if depreciation < 0.0 {
            depreciation = 0.0;
        }
        book -= depreciation;
    }
    Operand::number(depreciation)
}

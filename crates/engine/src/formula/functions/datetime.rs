// Date and time built-ins. Dates are serial numbers counted from the
// 1899-12-30 epoch (serial 1 is 1899-12-31); times are day fractions.
// NOW and TODAY are volatile and get recorded in the freshness info on
// every dispatch.

use chrono::{Datelike, Duration, NaiveDate, Timelike};

use super::super::eval::Evaluator;
use super::super::value::{ErrorKind, NumberKind, Operand, TypedValue};
use super::{number_arg, ArgList, Arity, FunctionDef, FunctionRegistry, Handler};

/// Highest representable serial: 9999-12-31.
const MAX_SERIAL: f64 = 2_958_465.0;

fn entry(handler: Handler, arity: Arity, arg_def: &'static str, help: &'static str) -> FunctionDef {
    FunctionDef {
        handler,
        arity,
        arg_def,
        help,
        class: "datetime",
        volatile: false,
    }
}

pub(crate) fn register(reg: &mut FunctionRegistry) {
    reg.register(
        "DATE",
        entry(date_fn, Arity::Exact(3), "ymd", "Serial date from year, month and day"),
    );
    reg.register(
        "TIME",
        entry(time_fn, Arity::Exact(3), "hms", "Day fraction from hour, minute and second"),
    );
    let part = |help| entry(date_part, Arity::Exact(1), "d", help);
    reg.register("DAY", part("Day of the month of a serial date"));
    reg.register("MONTH", part("Month of a serial date"));
    reg.register("YEAR", part("Year of a serial date"));
    reg.register("HOUR", part("Hour of a serial time"));
    reg.register("MINUTE", part("Minute of a serial time"));
    reg.register("SECOND", part("Second of a serial time"));
    reg.register(
        "WEEKDAY",
        entry(weekday_fn, Arity::AtLeast(1), "dn", "Day of the week of a serial date"),
    );
    reg.register(
        "NOW",
        FunctionDef {
            handler: now_fn,
            arity: Arity::Exact(0),
            arg_def: "",
            help: "The current date and time",
            class: "datetime",
            volatile: true,
        },
    );
    reg.register(
        "TODAY",
        FunctionDef {
            handler: now_fn,
            arity: Arity::Exact(0),
            arg_def: "",
            help: "The current date",
            class: "datetime",
            volatile: true,
        },
    );
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or(NaiveDate::MIN)
}

pub(crate) fn serial_from_date(date: NaiveDate) -> f64 {
    (date - epoch()).num_days() as f64
}

pub(crate) fn date_from_serial(serial: f64) -> Option<NaiveDate> {
    if !(0.0..=MAX_SERIAL).contains(&serial) {
        return None;
    }
    epoch().checked_add_signed(Duration::days(serial.floor() as i64))
}

fn date_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let year = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let month = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let day = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Out-of-range months and days roll over into adjacent years and
    // months, so DATE(2020,13,1) lands in January 2021.
    if year.abs() > 10_000.0 || month.abs() > 120_000.0 || day.abs() > 4_000_000.0 {
        return Operand::error(ErrorKind::Num);
    }
    let month0 = month.trunc() as i64 - 1;
    let year = year.trunc() as i64 + month0.div_euclid(12);
    let month = month0.rem_euclid(12) + 1;
    if !(1800..=9999).contains(&year) {
        return Operand::error(ErrorKind::Num);
    }
    let first = match NaiveDate::from_ymd_opt(year as i32, month as u32, 1) {
        Some(first) => first,
        None => return Operand::error(ErrorKind::Num),
    };
    let date = match first.checked_add_signed(Duration::days(day.trunc() as i64 - 1)) {
        Some(date) => date,
        None => return Operand::error(ErrorKind::Num),
    };
    let serial = serial_from_date(date);
    if !(0.0..=MAX_SERIAL).contains(&serial) {
        return Operand::error(ErrorKind::Num);
    }
    Operand::Typed(TypedValue::number_of_kind(serial, NumberKind::Date))
}

fn time_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let hour = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let minute = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let second = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let seconds = hour * 3600.0 + minute * 60.0 + second;
    if seconds < 0.0 {
        return Operand::error(ErrorKind::Num);
    }
    Operand::Typed(TypedValue::number_of_kind(
        (seconds / 86_400.0).fract(),
        NumberKind::Time,
    ))
}

fn date_part(name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    let serial = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let result = match name {
        "DAY" | "MONTH" | "YEAR" => {
            let date = match date_from_serial(serial) {
                Some(date) => date,
                None => return Operand::error(ErrorKind::Num),
            };
            match name {
                "DAY" => date.day() as f64,
                "MONTH" => date.month() as f64,
                _ => date.year() as f64,
            }
        }
        _ => {
            let total_seconds = (serial.abs().fract() * 86_400.0).round() as u64;
            match name {
                "HOUR" => ((total_seconds / 3600) % 24) as f64,
                "MINUTE" => ((total_seconds / 60) % 60) as f64,
                _ => (total_seconds % 60) as f64,
            }
        }
    };
    Operand::number(result)
}

fn weekday_fn(_name: &str, args: &mut ArgList, ev: &mut Evaluator<'_>) -> Operand {
    if args.len() > 2 {
        return Operand::error(ErrorKind::Value);
    }
    let serial = match number_arg(args, ev) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mode = if args.is_empty() {
        1.0
    } else {
        match number_arg(args, ev) {
            Ok(v) => v,
            Err(e) => return e,
        }
    };
    let date = match date_from_serial(serial) {
        Some(date) => date,
        None => return Operand::error(ErrorKind::Num),
    };
    let result = match mode.trunc() as i64 {
        // Sunday=1 through Saturday=7.
        1 => date.weekday().num_days_from_sunday() + 1,
        // Monday=1 through Sunday=7.
        2 => date.weekday().num_days_from_monday() + 1,
        // Monday=0 through Sunday=6.
        3 => date.weekday().num_days_from_monday(),
        _ => return Operand::error(ErrorKind::Num),
    };
    Operand::number(result as f64)
}

fn now_fn(name: &str, _args: &mut ArgList, _ev: &mut Evaluator<'_>) -> Operand {
    let now = chrono::Local::now().naive_local();
    let days = serial_from_date(now.date());
    if name == "TODAY" {
        return Operand::Typed(TypedValue::number_of_kind(days, NumberKind::Date));
    }
    let fraction = now.num_seconds_from_midnight() as f64 / 86_400.0;
    Operand::Typed(TypedValue::number_of_kind(
        days + fraction,
        NumberKind::DateTime,
    ))
}

//! Standard spreadsheet functions implementation
//!
//! Every function receives already-evaluated arguments. Range arguments arrive
//! as [`Value::Array`]; aggregate functions only count numbers inside ranges
//! but coerce direct scalar arguments, matching Excel.

use chrono::Local;
use sheetstore_primitives::datetime::datetime_to_serial;
use sheetstore_primitives::{ErrorValue, Value};
use std::cmp::Ordering;

/// Coerce a scalar to a number: blanks are 0, booleans 1/0, numeric text parses.
pub fn to_number(value: &Value) -> Result<f64, ErrorValue> {
    match value {
        Value::Empty => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => Ok(*n),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| ErrorValue::Value),
        Value::Error(err) => Err(*err),
        Value::Array(_) => Err(ErrorValue::Value),
    }
}

/// Coerce a scalar to text the way Excel displays it.
pub fn to_text(value: &Value) -> Result<String, ErrorValue> {
    match value {
        Value::Empty => Ok(String::new()),
        Value::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Number(n) => Ok(format_number(*n)),
        Value::String(s) => Ok(s.clone()),
        Value::Error(err) => Err(*err),
        Value::Array(_) => Err(ErrorValue::Value),
    }
}

pub fn to_bool(value: &Value) -> Result<bool, ErrorValue> {
    match value {
        Value::Empty => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(*n != 0.0),
        Value::String(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
        Value::Error(err) => Err(*err),
        _ => Err(ErrorValue::Value),
    }
}

/// Integral values print without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

pub(crate) fn number_or_num_error(n: f64) -> Value {
    if n.is_finite() {
        Value::Number(n)
    } else {
        Value::Error(ErrorValue::Num)
    }
}

/// Excel comparison: numbers sort before text, text before booleans, and
/// text compares case-insensitively. A blank takes the type of the other side.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Number(_) => 0,
            Value::String(_) => 1,
            _ => 2,
        }
    }
    let (left, right) = match (left, right) {
        (Value::Empty, Value::Empty) => return Some(Ordering::Equal),
        (Value::Empty, other) => (blank_like(other), other.clone()),
        (other, Value::Empty) => (other.clone(), blank_like(other)),
        (l, r) => (l.clone(), r.clone()),
    };
    match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Array(_), _) | (_, Value::Array(_)) => None,
        (l, r) => Some(rank(l).cmp(&rank(r))),
    }
}

fn blank_like(other: &Value) -> Value {
    match other {
        Value::String(_) => Value::String(String::new()),
        Value::Bool(_) => Value::Bool(false),
        _ => Value::Number(0.0),
    }
}

/// Collect the numbers an aggregate function sees.
fn collect_numbers(args: &[Value]) -> Result<Vec<f64>, ErrorValue> {
    let mut numbers = Vec::new();
    for arg in args {
        match arg {
            Value::Array(_) => {
                for value in arg.scalars() {
                    match value {
                        Value::Number(n) => numbers.push(*n),
                        Value::Error(err) => return Err(*err),
                        _ => {}
                    }
                }
            }
            Value::Empty => {}
            scalar => numbers.push(to_number(scalar)?),
        }
    }
    Ok(numbers)
}

fn aggregate(args: &[Value], f: impl FnOnce(&[f64]) -> Value) -> Value {
    match collect_numbers(args) {
        Ok(numbers) => f(&numbers),
        Err(err) => Value::Error(err),
    }
}

pub fn sum(args: &[Value]) -> Value {
    aggregate(args, |ns| number_or_num_error(ns.iter().sum()))
}

pub fn average(args: &[Value]) -> Value {
    aggregate(args, |ns| {
        if ns.is_empty() {
            Value::Error(ErrorValue::Div0)
        } else {
            number_or_num_error(ns.iter().sum::<f64>() / ns.len() as f64)
        }
    })
}

pub fn count(args: &[Value]) -> Value {
    let mut total = 0usize;
    for arg in args {
        match arg {
            Value::Array(_) => {
                total += arg.scalars().filter(|v| matches!(v, Value::Number(_))).count();
            }
            Value::Number(_) | Value::Bool(_) => total += 1,
            Value::String(s) if s.trim().parse::<f64>().is_ok() => total += 1,
            _ => {}
        }
    }
    Value::Number(total as f64)
}

pub fn counta(args: &[Value]) -> Value {
    let total = args
        .iter()
        .flat_map(Value::scalars)
        .filter(|v| !v.is_empty())
        .count();
    Value::Number(total as f64)
}

pub fn min(args: &[Value]) -> Value {
    aggregate(args, |ns| {
        Value::Number(ns.iter().copied().reduce(f64::min).unwrap_or(0.0))
    })
}

pub fn max(args: &[Value]) -> Value {
    aggregate(args, |ns| {
        Value::Number(ns.iter().copied().reduce(f64::max).unwrap_or(0.0))
    })
}

pub fn product(args: &[Value]) -> Value {
    aggregate(args, |ns| {
        if ns.is_empty() {
            Value::Number(0.0)
        } else {
            number_or_num_error(ns.iter().product())
        }
    })
}

fn unary_math(args: &[Value], f: impl FnOnce(f64) -> Value) -> Value {
    match to_number(args.first().unwrap_or(&Value::Empty)) {
        Ok(n) => f(n),
        Err(err) => Value::Error(err),
    }
}

fn binary_math(args: &[Value], f: impl FnOnce(f64, f64) -> Value) -> Value {
    let a = to_number(args.first().unwrap_or(&Value::Empty));
    let b = to_number(args.get(1).unwrap_or(&Value::Empty));
    match (a, b) {
        (Ok(a), Ok(b)) => f(a, b),
        (Err(err), _) | (_, Err(err)) => Value::Error(err),
    }
}

pub fn abs(args: &[Value]) -> Value {
    unary_math(args, |n| Value::Number(n.abs()))
}

fn round_with(args: &[Value], f: fn(f64) -> f64) -> Value {
    binary_math(args, |n, digits| {
        let factor = 10f64.powi(digits.trunc() as i32);
        number_or_num_error(f(n * factor) / factor)
    })
}

pub fn round(args: &[Value]) -> Value {
    round_with(args, f64::round)
}

/// Rounds away from zero.
pub fn roundup(args: &[Value]) -> Value {
    round_with(args, |x| x.signum() * x.abs().ceil())
}

/// Rounds toward zero.
pub fn rounddown(args: &[Value]) -> Value {
    round_with(args, f64::trunc)
}

pub fn int(args: &[Value]) -> Value {
    unary_math(args, |n| Value::Number(n.floor()))
}

/// Result takes the sign of the divisor.
pub fn modulo(args: &[Value]) -> Value {
    binary_math(args, |n, d| {
        if d == 0.0 {
            Value::Error(ErrorValue::Div0)
        } else {
            number_or_num_error(n - d * (n / d).floor())
        }
    })
}

pub fn power(args: &[Value]) -> Value {
    binary_math(args, |base, exp| {
        if base == 0.0 && exp < 0.0 {
            Value::Error(ErrorValue::Div0)
        } else {
            number_or_num_error(base.powf(exp))
        }
    })
}

pub fn sqrt(args: &[Value]) -> Value {
    unary_math(args, |n| {
        if n < 0.0 {
            Value::Error(ErrorValue::Num)
        } else {
            Value::Number(n.sqrt())
        }
    })
}

fn collect_bools(args: &[Value]) -> Result<Vec<bool>, ErrorValue> {
    let mut flags = Vec::new();
    for arg in args {
        match arg {
            Value::Array(_) => {
                for value in arg.scalars() {
                    match value {
                        Value::Bool(b) => flags.push(*b),
                        Value::Number(n) => flags.push(*n != 0.0),
                        Value::Error(err) => return Err(*err),
                        _ => {}
                    }
                }
            }
            Value::Empty => {}
            scalar => flags.push(to_bool(scalar)?),
        }
    }
    if flags.is_empty() {
        return Err(ErrorValue::Value);
    }
    Ok(flags)
}

pub fn and(args: &[Value]) -> Value {
    match collect_bools(args) {
        Ok(flags) => Value::Bool(flags.iter().all(|b| *b)),
        Err(err) => Value::Error(err),
    }
}

pub fn or(args: &[Value]) -> Value {
    match collect_bools(args) {
        Ok(flags) => Value::Bool(flags.iter().any(|b| *b)),
        Err(err) => Value::Error(err),
    }
}

pub fn not(args: &[Value]) -> Value {
    match to_bool(args.first().unwrap_or(&Value::Empty)) {
        Ok(b) => Value::Bool(!b),
        Err(err) => Value::Error(err),
    }
}

pub fn concat(args: &[Value]) -> Value {
    let mut out = String::new();
    for value in args.iter().flat_map(Value::scalars) {
        match to_text(value) {
            Ok(text) => out.push_str(&text),
            Err(err) => return Value::Error(err),
        }
    }
    Value::String(out)
}

fn text_arg(args: &[Value], idx: usize) -> Result<String, ErrorValue> {
    to_text(args.get(idx).unwrap_or(&Value::Empty))
}

/// Optional non-negative character count argument.
fn count_arg(args: &[Value], idx: usize, default: usize) -> Result<usize, ErrorValue> {
    match args.get(idx) {
        None => Ok(default),
        Some(value) => {
            let n = to_number(value)?;
            if n < 0.0 {
                Err(ErrorValue::Value)
            } else {
                Ok(n.trunc() as usize)
            }
        }
    }
}

fn text_fn(args: &[Value], f: impl FnOnce(String) -> Value) -> Value {
    match text_arg(args, 0) {
        Ok(text) => f(text),
        Err(err) => Value::Error(err),
    }
}

pub fn len(args: &[Value]) -> Value {
    text_fn(args, |text| Value::Number(text.chars().count() as f64))
}

pub fn upper(args: &[Value]) -> Value {
    text_fn(args, |text| Value::String(text.to_uppercase()))
}

pub fn lower(args: &[Value]) -> Value {
    text_fn(args, |text| Value::String(text.to_lowercase()))
}

/// Strips leading and trailing spaces and collapses inner runs to one space.
pub fn trim(args: &[Value]) -> Value {
    text_fn(args, |text| {
        Value::String(text.split(' ').filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" "))
    })
}

pub fn left(args: &[Value]) -> Value {
    match (text_arg(args, 0), count_arg(args, 1, 1)) {
        (Ok(text), Ok(n)) => Value::String(text.chars().take(n).collect()),
        (Err(err), _) | (_, Err(err)) => Value::Error(err),
    }
}

pub fn right(args: &[Value]) -> Value {
    match (text_arg(args, 0), count_arg(args, 1, 1)) {
        (Ok(text), Ok(n)) => {
            let skip = text.chars().count().saturating_sub(n);
            Value::String(text.chars().skip(skip).collect())
        }
        (Err(err), _) | (_, Err(err)) => Value::Error(err),
    }
}

/// MID(text, start, count) with a 1-based start.
pub fn mid(args: &[Value]) -> Value {
    let text = match text_arg(args, 0) {
        Ok(text) => text,
        Err(err) => return Value::Error(err),
    };
    let start = match to_number(args.get(1).unwrap_or(&Value::Empty)) {
        Ok(n) if n >= 1.0 => n.trunc() as usize,
        Ok(_) => return Value::Error(ErrorValue::Value),
        Err(err) => return Value::Error(err),
    };
    match count_arg(args, 2, 0) {
        Ok(n) => Value::String(text.chars().skip(start - 1).take(n).collect()),
        Err(err) => Value::Error(err),
    }
}

pub fn isblank(args: &[Value]) -> Value {
    Value::Bool(matches!(args.first(), Some(Value::Empty)))
}

pub fn isnumber(args: &[Value]) -> Value {
    Value::Bool(matches!(args.first(), Some(Value::Number(_))))
}

pub fn istext(args: &[Value]) -> Value {
    Value::Bool(matches!(args.first(), Some(Value::String(_))))
}

pub fn iserror(args: &[Value]) -> Value {
    Value::Bool(matches!(args.first(), Some(Value::Error(_))))
}

/// Larger month or day offsets cannot land inside the serial date range.
const MAX_MONTH_OFFSET: f64 = 120_000.0;
const MAX_DAY_OFFSET: f64 = 3_000_000.0;

/// DATE(year, month, day) as a serial number. Months and days overflow into
/// the following year or month; years below 1900 are offset from 1900.
/// Years outside 0..=9999 are `#NUM!`, as in Excel.
pub fn date(args: &[Value]) -> Value {
    let parts: Result<Vec<f64>, ErrorValue> = args.iter().map(to_number).collect();
    let parts = match parts {
        Ok(parts) if parts.len() == 3 => parts,
        Ok(_) => return Value::Error(ErrorValue::Value),
        Err(err) => return Value::Error(err),
    };
    let (year, month, day) = (parts[0].trunc(), parts[1].trunc(), parts[2].trunc());
    if !parts.iter().all(|p| p.is_finite())
        || !(0.0..=9999.0).contains(&year)
        || month.abs() >= MAX_MONTH_OFFSET
        || day.abs() >= MAX_DAY_OFFSET
    {
        return Value::Error(ErrorValue::Num);
    }
    // Every part is bounded above, so the integer arithmetic cannot overflow.
    let mut year = year as i64;
    if year < 1900 {
        year += 1900;
    }
    let months = year * 12 + month as i64 - 1;
    let (year, month) = (months.div_euclid(12), months.rem_euclid(12) + 1);
    let day_offset = day as i64 - 1;
    let Ok(year) = i32::try_from(year) else {
        return Value::Error(ErrorValue::Num);
    };
    let serial = chrono::NaiveDate::from_ymd_opt(year, month as u32, 1)
        .and_then(|first| first.checked_add_signed(chrono::Duration::days(day_offset)))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(datetime_to_serial);
    match serial {
        Some(serial) => Value::Number(serial),
        None => Value::Error(ErrorValue::Num),
    }
}

pub fn today(_args: &[Value]) -> Value {
    Local::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(datetime_to_serial)
        .map_or(Value::Error(ErrorValue::Num), Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(values: Vec<Value>) -> Value {
        Value::Array(values.into_iter().map(|v| vec![v]).collect())
    }

    #[test]
    fn test_sum_skips_text_in_ranges_but_coerces_scalars() {
        let r = range(vec![Value::Number(1.0), Value::from("x"), Value::Empty]);
        assert_eq!(sum(&[r.clone(), Value::from("2")]), Value::Number(3.0));
        assert_eq!(sum(&[r, Value::from("x")]), Value::Error(ErrorValue::Value));
    }

    #[test]
    fn test_aggregate_propagates_range_errors() {
        let r = range(vec![Value::Number(1.0), Value::Error(ErrorValue::Ref)]);
        assert_eq!(sum(&[r.clone()]), Value::Error(ErrorValue::Ref));
        assert_eq!(count(&[r]), Value::Number(1.0));
    }

    #[test]
    fn test_average_of_nothing_is_div0() {
        assert_eq!(
            average(&[range(vec![Value::Empty])]),
            Value::Error(ErrorValue::Div0)
        );
    }

    #[test]
    fn test_rounding_family() {
        let args = [Value::Number(2.346), Value::Number(2.0)];
        assert_eq!(round(&args), Value::Number(2.35));
        assert_eq!(roundup(&[Value::Number(-1.21), Value::Number(1.0)]), Value::Number(-1.3));
        assert_eq!(rounddown(&args), Value::Number(2.34));
        assert_eq!(int(&[Value::Number(-1.5)]), Value::Number(-2.0));
        assert_eq!(modulo(&[Value::Number(-3.0), Value::Number(2.0)]), Value::Number(1.0));
    }

    #[test]
    fn test_text_functions() {
        assert_eq!(trim(&[Value::from("  a   b ")]), Value::from("a b"));
        assert_eq!(left(&[Value::from("hello"), Value::Number(2.0)]), Value::from("he"));
        assert_eq!(right(&[Value::from("hello")]), Value::from("o"));
        assert_eq!(
            mid(&[Value::from("hello"), Value::Number(2.0), Value::Number(3.0)]),
            Value::from("ell")
        );
        assert_eq!(
            concat(&[Value::from("n="), Value::Number(3.0), Value::Bool(true)]),
            Value::from("n=3TRUE")
        );
    }

    #[test]
    fn test_compare_orders_across_types() {
        assert_eq!(
            compare(&Value::Number(99.0), &Value::from("a")),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare(&Value::from("ABC"), &Value::from("abc")),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare(&Value::Empty, &Value::Number(0.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(compare(&Value::Empty, &Value::from("")), Some(Ordering::Equal));
    }

    #[test]
    fn test_date_overflow() {
        assert_eq!(
            date(&[Value::Number(2022.0), Value::Number(1.0), Value::Number(1.0)]),
            Value::Number(44562.0)
        );
        // Month 13 rolls into January of the next year.
        assert_eq!(
            date(&[Value::Number(2021.0), Value::Number(13.0), Value::Number(1.0)]),
            Value::Number(44562.0)
        );
        // Day 0 is the last day of the previous month.
        assert_eq!(
            date(&[Value::Number(2022.0), Value::Number(1.0), Value::Number(0.0)]),
            Value::Number(44561.0)
        );
        // Out-of-range parts are #NUM!, never an arithmetic overflow.
        for parts in [
            [1e18, 1.0, 1.0],
            [2020.0, 1e300, 1.0],
            [2020.0, -1e300, 1.0],
            [2020.0, 1.0, 1e300],
            [10_000.0, 1.0, 1.0],
            [-1.0, 1.0, 1.0],
            [2020.0, 1.0, f64::NAN],
        ] {
            assert_eq!(
                date(&parts.map(Value::Number)),
                Value::Error(ErrorValue::Num),
                "{parts:?}"
            );
        }
        assert_eq!(
            date(&[Value::Number(9999.0), Value::Number(12.0), Value::Number(31.0)]),
            Value::Number(2_958_465.0)
        );
    }
}

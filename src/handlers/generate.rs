//! 生成处理器
//!
//! 随机数生成器由调用方提供，相同种子下输出可复现。

use chrono::{Duration, NaiveDate};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Number, Value};

use super::format::chrono_pattern;
use super::phone;
use super::rules::GenerationRule;
use super::value_to_string;
use crate::utils::uuid_from_rng;

const LOREM_WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua", "enim",
    "ad", "minim", "veniam", "quis", "nostrud", "exercitation", "ullamco", "laboris", "nisi",
    "aliquip",
];

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

const DEFAULT_DATE_FROM: (i32, u32, u32) = (2020, 1, 1);
const DEFAULT_DATE_TO: (i32, u32, u32) = (2025, 12, 31);

/// 按规则生成一个值
///
/// `index` 为行号（从 0 开始），序列规则据此计算当前值。
pub fn generate<R: Rng + ?Sized>(rule: &GenerationRule, rng: &mut R, index: u64) -> Value {
    match rule {
        GenerationRule::Uuid => Value::String(uuid_from_rng(rng)),
        GenerationRule::Sequence {
            prefix,
            start,
            padding,
        } => {
            let n = start.saturating_add(index);
            Value::String(format!("{}{:0width$}", prefix, n, width = *padding))
        }
        GenerationRule::Pattern { pattern } => Value::String(generate_pattern(pattern, rng)),
        GenerationRule::Number { min, max, decimals } => generate_number(*min, *max, *decimals, rng),
        GenerationRule::Pick { values } => values.choose(rng).cloned().unwrap_or(Value::Null),
        GenerationRule::Boolean { probability } => {
            let p = if probability.is_finite() {
                probability.clamp(0.0, 1.0)
            } else {
                0.5
            };
            Value::Bool(rng.gen_bool(p))
        }
        GenerationRule::Date { from, to, format } => {
            Value::String(generate_date(from.as_deref(), to.as_deref(), format, rng))
        }
        GenerationRule::Phone { country } => Value::String(generate_phone(country.as_deref(), rng)),
        GenerationRule::Email { domains } => {
            let length = rng.gen_range(6..=10);
            let name: String = (0..length)
                .map(|_| char::from(b'a' + rng.gen_range(0..26)))
                .collect();
            let domain = domains
                .choose(rng)
                .map(String::as_str)
                .unwrap_or("example.com");
            Value::String(format!("{}@{}", name, domain))
        }
        GenerationRule::Lorem { words } => {
            let text: Vec<&str> = (0..*words)
                .filter_map(|_| LOREM_WORDS.choose(rng).copied())
                .collect();
            Value::String(text.join(" "))
        }
        GenerationRule::Composite { rules, separator } => {
            let parts: Vec<String> = rules
                .iter()
                .map(|rule| value_to_string(&generate(rule, rng, index)))
                .collect();
            Value::String(parts.join(separator))
        }
    }
}

fn generate_pattern<R: Rng + ?Sized>(pattern: &str, rng: &mut R) -> String {
    pattern
        .chars()
        .map(|c| match c {
            '#' => char::from(b'0' + rng.gen_range(0..10)),
            '?' => char::from(b'A' + rng.gen_range(0..26)),
            '*' => char::from(ALPHANUMERIC[rng.gen_range(0..ALPHANUMERIC.len())]),
            other => other,
        })
        .collect()
}

fn generate_number<R: Rng + ?Sized>(min: f64, max: f64, decimals: u32, rng: &mut R) -> Value {
    if !min.is_finite() || !max.is_finite() {
        return Value::Null;
    }
    let (low, high) = if min <= max { (min, max) } else { (max, min) };

    if decimals == 0 {
        let low = low.ceil() as i64;
        let high = high.floor() as i64;
        if low > high {
            return Value::Null;
        }
        return Value::Number(rng.gen_range(low..=high).into());
    }

    let factor = 10f64.powi(decimals.min(10) as i32);
    let raw = if (high - low).is_finite() {
        rng.gen_range(low..=high)
    } else {
        // 区间宽度溢出时按半宽采样
        let t: f64 = rng.gen();
        (low / 2.0 + t * (high / 2.0 - low / 2.0)) * 2.0
    };
    let scaled = raw * factor;
    let rounded = if scaled.is_finite() {
        scaled.round() / factor
    } else {
        raw
    };
    let rounded = rounded.clamp(low, high);
    Number::from_f64(rounded).map_or(Value::Null, Value::Number)
}

fn parse_date(text: Option<&str>, fallback: (i32, u32, u32)) -> Option<NaiveDate> {
    match text {
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        None => NaiveDate::from_ymd_opt(fallback.0, fallback.1, fallback.2),
    }
}

fn generate_date<R: Rng + ?Sized>(
    from: Option<&str>,
    to: Option<&str>,
    format: &str,
    rng: &mut R,
) -> String {
    let (Some(start), Some(end)) = (
        parse_date(from, DEFAULT_DATE_FROM),
        parse_date(to, DEFAULT_DATE_TO),
    ) else {
        return String::new();
    };
    let (start, end) = if start <= end { (start, end) } else { (end, start) };

    let span = (end - start).num_days();
    let date = start + Duration::days(rng.gen_range(0..=span));
    date.format(&chrono_pattern(format)).to_string()
}

fn random_digits<R: Rng + ?Sized>(count: usize, rng: &mut R) -> String {
    (0..count)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}

fn generate_phone<R: Rng + ?Sized>(country: Option<&str>, rng: &mut R) -> String {
    match country.and_then(phone::lookup_country) {
        Some(rule) if rule.calling_code != "1" => {
            // 首位不为 0，避免与长途前缀混淆
            let first = char::from(b'1' + rng.gen_range(0..9));
            let rest = random_digits(rule.max_digits - 1, rng);
            format!("+{} {}{}", rule.calling_code, first, rest)
        }
        _ => {
            // 北美号码的区号与交换码首位为 2-9
            let area = format!("{}{}", rng.gen_range(2..10), random_digits(2, rng));
            let exchange = format!("{}{}", rng.gen_range(2..10), random_digits(2, rng));
            format!("+1 ({}) {}-{}", area, exchange, random_digits(4, rng))
        }
    }
}

//! 格式化处理器
//!
//! 格式化仅用于展示，任何无法处理的输入都退化为原值的字符串形式。

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::phone;
use super::rules::FormatRule;
use super::validate::as_number;
use super::value_to_string;

/// 按规则格式化单个值
pub fn format(rule: &FormatRule, value: &Value) -> String {
    try_format(rule, value).unwrap_or_else(|| value_to_string(value))
}

fn try_format(rule: &FormatRule, value: &Value) -> Option<String> {
    match rule {
        FormatRule::Phone { country } => format_phone(country.as_deref(), value),
        FormatRule::Currency {
            symbol,
            decimals,
            thousands_separator,
            symbol_after,
        } => {
            let number = as_number(value)?;
            let body = format_grouped(number.abs(), Some(*decimals), thousands_separator);
            let sign = if number < 0.0 { "-" } else { "" };
            Some(if *symbol_after {
                format!("{}{} {}", sign, body, symbol)
            } else {
                format!("{}{}{}", sign, symbol, body)
            })
        }
        FormatRule::Percentage { decimals, multiply } => {
            let mut number = as_number(value)?;
            if *multiply {
                number *= 100.0;
            }
            Some(format!("{:.*}%", *decimals as usize, number))
        }
        FormatRule::Number {
            decimals,
            thousands_separator,
        } => {
            let number = as_number(value)?;
            let body = format_grouped(number.abs(), *decimals, thousands_separator);
            Some(if number < 0.0 { format!("-{}", body) } else { body })
        }
        FormatRule::Date { format } => {
            let datetime = parse_datetime(value)?;
            Some(datetime.format(&chrono_pattern(format)).to_string())
        }
        FormatRule::Uppercase => Some(value_to_string(value).to_uppercase()),
        FormatRule::Lowercase => Some(value_to_string(value).to_lowercase()),
        FormatRule::Capitalize => {
            let text = value_to_string(value);
            let mut chars = text.chars();
            Some(match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            })
        }
        FormatRule::Template { template } => {
            Some(template.replace("{value}", &value_to_string(value)))
        }
        FormatRule::Truncate { length, suffix } => {
            let text = value_to_string(value);
            if text.chars().count() <= *length {
                Some(text)
            } else {
                let head: String = text.chars().take(*length).collect();
                Some(format!("{}{}", head, suffix))
            }
        }
        FormatRule::Composite { rules } => {
            let mut current = value.clone();
            for rule in rules {
                current = Value::String(format(rule, &current));
            }
            Some(value_to_string(&current))
        }
    }
}

fn format_phone(country: Option<&str>, value: &Value) -> Option<String> {
    let text = value_to_string(value);
    let (number, extension) = phone::split_extension(text.trim());
    let digits = phone::digits_of(number);
    let has_plus = number.trim_start().starts_with('+');

    let code = country.map(str::to_ascii_uppercase);
    let formatted = match code.as_deref() {
        Some("US") | Some("CA") | None => {
            let national = match digits.len() {
                10 => digits.as_str(),
                11 if digits.starts_with('1') => &digits[1..],
                _ => return None,
            };
            let base = format!(
                "({}) {}-{}",
                &national[..3],
                &national[3..6],
                &national[6..]
            );
            if digits.len() == 11 || has_plus {
                format!("+1 {}", base)
            } else {
                base
            }
        }
        Some(other) => {
            let rule = phone::lookup_country(other)?;
            let national = rule.national(&digits, has_plus);
            if !(rule.min_digits..=rule.max_digits).contains(&national.len()) {
                return None;
            }
            let grouped = match rule.code {
                // 138 0013 8000
                "CN" => group_digits(national, &[3, 4, 4]),
                // 6 12 34 56 78
                "FR" => group_digits(national, &[1, 2, 2, 2, 2]),
                "GB" => group_digits(national, &[4, 6]),
                _ => group_digits(national, &[3, 3, 4]),
            };
            format!("+{} {}", rule.calling_code, grouped)
        }
    };

    Some(match extension {
        Some(ext) => format!("{} ext. {}", formatted, ext),
        None => formatted,
    })
}

/// 按分组长度切分数字，多余部分并入最后一组
fn group_digits(digits: &str, groups: &[usize]) -> String {
    let mut parts = Vec::new();
    let mut rest = digits;
    for (i, size) in groups.iter().enumerate() {
        if rest.is_empty() {
            break;
        }
        if i == groups.len() - 1 || rest.len() <= *size {
            parts.push(rest);
            rest = "";
        } else {
            let (head, tail) = rest.split_at(*size);
            parts.push(head);
            rest = tail;
        }
    }
    parts.join(" ")
}

/// 千分位分组
fn format_grouped(number: f64, decimals: Option<u32>, separator: &str) -> String {
    let text = match decimals {
        Some(d) => format!("{:.*}", d as usize, number),
        None => number.to_string(),
    };
    let (integer, fraction) = match text.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (text.as_str(), None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, c) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push_str(separator);
        }
        grouped.push(c);
    }

    match fraction {
        Some(f) => format!("{}.{}", grouped, f),
        None => grouped,
    }
}

/// 解析日期值：RFC 3339、`YYYY-MM-DD HH:mm:ss`、`YYYY-MM-DD` 或毫秒时间戳
pub(crate) fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Number(n) => {
            let millis = n.as_i64()?;
            DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            for pattern in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, pattern) {
                    return Some(dt);
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        _ => None,
    }
}

/// 把 `YYYY YY MM DD HH mm ss` 记号转换为 chrono 格式串，其它字符按字面输出
pub(crate) fn chrono_pattern(format: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("YYYY", "%Y"),
        ("YY", "%y"),
        ("MM", "%m"),
        ("DD", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
    ];

    let mut out = String::with_capacity(format.len() * 2);
    let mut rest = format;
    'outer: while !rest.is_empty() {
        for (token, replacement) in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(value: Value) -> FormatRule {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_currency() {
        let usd = rule(json!({"handler": "currency"}));
        assert_eq!(format(&usd, &json!(1234567.891)), "$1,234,567.89");
        assert_eq!(format(&usd, &json!(-5)), "-$5.00");
        assert_eq!(format(&usd, &json!("12")), "$12.00");

        let eur = rule(json!({
            "handler": "currency",
            "symbol": "€",
            "thousandsSeparator": ".",
            "symbolAfter": true,
            "decimals": 0
        }));
        assert_eq!(format(&eur, &json!(1500)), "1.500 €");
    }

    #[test]
    fn test_percentage_and_number() {
        let pct = rule(json!({"handler": "percentage", "decimals": 1, "multiply": true}));
        assert_eq!(format(&pct, &json!(0.256)), "25.6%");

        let plain = rule(json!({"handler": "percentage"}));
        assert_eq!(format(&plain, &json!(42)), "42%");

        let number = rule(json!({"handler": "number", "decimals": 2}));
        assert_eq!(format(&number, &json!(9876543.2)), "9,876,543.20");
        assert_eq!(format(&number, &json!(-1000)), "-1,000.00");
    }

    #[test]
    fn test_phone_templates() {
        let us = rule(json!({"handler": "phone", "country": "US"}));
        assert_eq!(format(&us, &json!("5551234567")), "(555) 123-4567");
        assert_eq!(format(&us, &json!("+1 555 123 4567")), "+1 (555) 123-4567");
        assert_eq!(format(&us, &json!("555-123-4567 x12")), "(555) 123-4567 ext. 12");

        let cn = rule(json!({"handler": "phone", "country": "CN"}));
        assert_eq!(format(&cn, &json!("13800138000")), "+86 138 0013 8000");

        let fr = rule(json!({"handler": "phone", "country": "FR"}));
        assert_eq!(format(&fr, &json!("06 12 34 56 78")), "+33 6 12 34 56 78");
    }

    #[test]
    fn test_date_tokens() {
        let date = rule(json!({"handler": "date", "format": "DD/MM/YYYY HH:mm"}));
        assert_eq!(format(&date, &json!("2024-03-05T14:07:00Z")), "05/03/2024 14:07");
        assert_eq!(format(&date, &json!("2024-03-05")), "05/03/2024 00:00");
        assert_eq!(format(&date, &json!(0)), "01/01/1970 00:00");

        let short = rule(json!({"handler": "date", "format": "YY-MM 100%"}));
        assert_eq!(format(&short, &json!("2024-03-05")), "24-03 100%");
    }

    #[test]
    fn test_text_transforms() {
        assert_eq!(format(&FormatRule::Uppercase, &json!("abc")), "ABC");
        assert_eq!(format(&FormatRule::Lowercase, &json!("ABC")), "abc");
        assert_eq!(format(&FormatRule::Capitalize, &json!("hello world")), "Hello world");

        let template = rule(json!({"handler": "template", "template": "#{value}!"}));
        assert_eq!(format(&template, &json!(7)), "#7!");

        let truncate = rule(json!({"handler": "truncate", "length": 3}));
        assert_eq!(format(&truncate, &json!("abcdef")), "abc...");
        assert_eq!(format(&truncate, &json!("ab")), "ab");
    }

    #[test]
    fn test_composite_chain() {
        let chain = rule(json!({
            "handler": "composite",
            "rules": [
                {"handler": "truncate", "length": 4, "suffix": ""},
                {"handler": "uppercase"},
                {"handler": "template", "template": "[{value}]"}
            ]
        }));
        assert_eq!(format(&chain, &json!("abcdefg")), "[ABCD]");
    }

    #[test]
    fn test_degrades_to_raw_value() {
        let usd = rule(json!({"handler": "currency"}));
        assert_eq!(format(&usd, &json!("n/a")), "n/a");

        let date = rule(json!({"handler": "date"}));
        assert_eq!(format(&date, &json!("yesterday")), "yesterday");

        let us = rule(json!({"handler": "phone", "country": "US"}));
        assert_eq!(format(&us, &json!("12")), "12");
        assert_eq!(format(&us, &Value::Null), "");
    }
}

//! 电话号码国家表与号码拆分

use regex::Regex;
use std::sync::LazyLock;

/// 分机号后缀：`x99`、`ext. 99`、`extension 99`
static EXTENSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*(?:x|ext\.?|extension)\s*(\d+)$").expect("Invalid extension regex")
});

/// 号码允许出现的字符
static PHONE_CHARS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9\s\-().]+$").expect("Invalid phone regex"));

/// 未指定国家时的位数范围（E.164）
pub(crate) const E164_MIN_DIGITS: usize = 7;
pub(crate) const E164_MAX_DIGITS: usize = 15;

/// 国家电话规则
#[derive(Debug, Clone, Copy)]
pub(crate) struct CountryPhone {
    pub code: &'static str,
    pub calling_code: &'static str,
    /// 国内号码（去掉国家码和长途前缀 0 后）的最少位数
    pub min_digits: usize,
    pub max_digits: usize,
    /// 国内号码是否带长途前缀 0
    pub trunk_zero: bool,
}

const COUNTRIES: &[CountryPhone] = &[
    CountryPhone { code: "US", calling_code: "1", min_digits: 10, max_digits: 10, trunk_zero: false },
    CountryPhone { code: "CA", calling_code: "1", min_digits: 10, max_digits: 10, trunk_zero: false },
    CountryPhone { code: "GB", calling_code: "44", min_digits: 9, max_digits: 10, trunk_zero: true },
    CountryPhone { code: "CN", calling_code: "86", min_digits: 11, max_digits: 11, trunk_zero: false },
    CountryPhone { code: "DE", calling_code: "49", min_digits: 6, max_digits: 13, trunk_zero: true },
    CountryPhone { code: "FR", calling_code: "33", min_digits: 9, max_digits: 9, trunk_zero: true },
    CountryPhone { code: "JP", calling_code: "81", min_digits: 9, max_digits: 10, trunk_zero: true },
    CountryPhone { code: "AU", calling_code: "61", min_digits: 9, max_digits: 9, trunk_zero: true },
    CountryPhone { code: "IN", calling_code: "91", min_digits: 10, max_digits: 10, trunk_zero: true },
];

/// 按 ISO 国家码查找（大小写不敏感）
pub(crate) fn lookup_country(code: &str) -> Option<&'static CountryPhone> {
    COUNTRIES.iter().find(|c| c.code.eq_ignore_ascii_case(code))
}

/// 拆分号码主体与分机号
pub(crate) fn split_extension(text: &str) -> (&str, Option<&str>) {
    match EXTENSION_REGEX.captures(text) {
        Some(caps) => {
            let whole = caps.get(0).map_or(text.len(), |m| m.start());
            (&text[..whole], caps.get(1).map(|m| m.as_str()))
        }
        None => (text, None),
    }
}

/// 号码是否只包含允许的字符
pub(crate) fn has_valid_chars(number: &str) -> bool {
    PHONE_CHARS_REGEX.is_match(number)
}

/// 提取所有数字
pub(crate) fn digits_of(number: &str) -> String {
    number.chars().filter(|c| c.is_ascii_digit()).collect()
}

impl CountryPhone {
    /// 去掉国家码与长途前缀，得到国内号码
    pub(crate) fn national<'a>(&self, digits: &'a str, has_plus: bool) -> &'a str {
        let mut national = digits;
        if national.starts_with(self.calling_code)
            && (has_plus || national.len() > self.max_digits)
        {
            national = &national[self.calling_code.len()..];
        }
        if self.trunk_zero && national.starts_with('0') {
            national = &national[1..];
        }
        national
    }
}

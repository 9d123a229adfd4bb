//! 数据源
//!
//! 为带有 `dataSource` 的列类型解析可选值列表。

pub mod resolver;

pub use resolver::{
    cache_key, cache_prefix, cache_ttl, extract_path, parse_ttl, substitute_settings,
    DataSourceResolver, OptionItem, ResolvedOptions, DEFAULT_CACHE_TTL,
};

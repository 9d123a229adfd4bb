//! 正则表达式缓存
//!
//! 模块清单中的正则规则在每次校验时都会用到，编译结果按 `(flags, pattern)`
//! 缓存在一个容量有限的 LRU 中。

use lru::LruCache;
use regex::{Regex, RegexBuilder};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

/// 默认缓存容量
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// 编译后正则的大小上限，防止模块提供的模式占用过多内存
const REGEX_SIZE_LIMIT: usize = 1 << 20;

static GLOBAL_CACHE: LazyLock<RegexCache> =
    LazyLock::new(|| RegexCache::new(DEFAULT_CACHE_CAPACITY));

/// 缓存统计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegexCacheStats {
    /// 命中次数
    pub hits: u64,
    /// 未命中次数
    pub misses: u64,
    /// 当前条目数
    pub size: usize,
    /// 容量
    pub capacity: usize,
}

/// 正则缓存
pub struct RegexCache {
    cache: Mutex<LruCache<String, Arc<Regex>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    capacity: usize,
}

impl RegexCache {
    /// 创建指定容量的缓存（至少为 1）
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            capacity: capacity.get(),
        }
    }

    /// 进程级共享缓存
    pub fn global() -> &'static RegexCache {
        &GLOBAL_CACHE
    }

    /// 获取（必要时编译）正则
    pub fn get_or_compile(&self, pattern: &str, flags: &str) -> Result<Arc<Regex>, regex::Error> {
        let key = format!("{}/{}", flags, pattern);

        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(regex) = cache.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(regex));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let regex = Arc::new(compile(pattern, flags)?);

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(key, Arc::clone(&regex));
        Ok(regex)
    }

    /// 统计信息
    pub fn stats(&self) -> RegexCacheStats {
        let size = self.cache.lock().unwrap_or_else(|e| e.into_inner()).len();
        RegexCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size,
            capacity: self.capacity,
        }
    }
}

fn compile(pattern: &str, flags: &str) -> Result<Regex, regex::Error> {
    let mut builder = RegexBuilder::new(pattern);
    builder.size_limit(REGEX_SIZE_LIMIT);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            // `g` `u` 等在此无意义
            _ => &mut builder,
        };
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_and_miss() {
        let cache = RegexCache::new(4);
        let first = cache.get_or_compile("^a+$", "").unwrap();
        let second = cache.get_or_compile("^a+$", "").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_flags_are_part_of_key() {
        let cache = RegexCache::new(4);
        let plain = cache.get_or_compile("^abc$", "").unwrap();
        let insensitive = cache.get_or_compile("^abc$", "i").unwrap();

        assert!(!plain.is_match("ABC"));
        assert!(insensitive.is_match("ABC"));
        assert_eq!(cache.stats().size, 2);
    }

    #[test]
    fn test_eviction() {
        let cache = RegexCache::new(2);
        for pattern in ["a", "b", "c"] {
            cache.get_or_compile(pattern, "").unwrap();
        }
        assert_eq!(cache.stats().size, 2);
        assert_eq!(cache.stats().capacity, 2);
    }

    #[test]
    fn test_invalid_pattern() {
        let cache = RegexCache::new(2);
        assert!(cache.get_or_compile("(unclosed", "").is_err());
        assert_eq!(cache.stats().size, 0);
    }
}

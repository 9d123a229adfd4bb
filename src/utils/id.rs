//! 标识符工具
//!
//! UUID 生成以及把模块 ID 编码为表名前缀、存储路径可用的命名空间。

use rand::Rng;

/// 生成 UUID v4 格式的 ID
///
/// 用于事件 ID 等需要全局唯一性的场景
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 使用调用方提供的随机数生成器生成 UUID v4
///
/// 在固定种子下输出可复现，供数据生成器使用。
pub fn uuid_from_rng<R: Rng + ?Sized>(rng: &mut R) -> String {
    let bytes: [u8; 16] = rng.gen();
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

/// 把模块 ID 编码为命名空间片段
///
/// 小写字母和数字原样保留，其余字节（包括大写字母）编码为 `_` 加两位小写十六进制。
/// 编码是单射的，结果只含 `[a-z0-9_]`，不含 `__`，也不以 `_` 结尾，
/// 因此可以安全地拼接 `__` 或 `/` 作为分隔符。空 ID 编码为空串。
///
/// ```
/// use table_modules::utils::id::module_namespace;
///
/// assert_eq!(module_namespace("crm"), "crm");
/// assert_eq!(module_namespace("@vendor/geo"), "_40vendor_2fgeo");
/// assert_eq!(module_namespace("vendor-geo"), "vendor_2dgeo");
/// ```
pub fn module_namespace(module_id: &str) -> String {
    let mut encoded = String::with_capacity(module_id.len() * 2);
    for byte in module_id.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("_{:02x}", byte));
        }
    }
    encoded
}

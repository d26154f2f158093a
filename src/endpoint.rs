//! Endpoint 工具
//!
//! Endpoint 形如 `scheme://host:port?isSecure=<bool>&...`，scheme 标识传输协议
//! （http、grpc、ws、tcp），查询参数由后端自定义，其中只有 `isSecure` 对框架有意义。

use http::Uri;

use crate::error::{Result, RoutingError};

const IS_SECURE: &str = "isSecure";

/// 根据是否启用传输安全返回实际 scheme（`grpc` → `grpcs`）
pub fn scheme(scheme: &str, is_secure: bool) -> String {
    if is_secure {
        format!("{}s", scheme)
    } else {
        scheme.to_string()
    }
}

/// 构造 endpoint 字符串
pub fn new_endpoint(scheme: &str, host: &str, is_secure: bool) -> String {
    if is_secure {
        format!("{}://{}?{}=true", scheme, host, IS_SECURE)
    } else {
        format!("{}://{}", scheme, host)
    }
}

/// 解析 endpoint
pub fn parse(endpoint: &str) -> Result<Uri> {
    let uri: Uri = endpoint
        .parse()
        .map_err(|e: http::uri::InvalidUri| RoutingError::invalid_endpoint(endpoint, e.to_string()))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(RoutingError::invalid_endpoint(
            endpoint,
            "missing scheme or authority",
        ));
    }
    Ok(uri)
}

/// 从 endpoint 列表中取出第一个与 `scheme` 和传输安全要求都匹配的 host:port
///
/// endpoint 的安全性由 `isSecure` 查询参数决定，与 [`new_endpoint`] 的编码一致；
/// `secure` 为 true 时同时接受 `<scheme>s://` 形式。
/// 没有匹配项时返回 `Ok(None)`；遇到无法解析的 endpoint 时返回错误
pub fn parse_endpoint(endpoints: &[String], scheme: &str, secure: bool) -> Result<Option<String>> {
    let secure_scheme = self::scheme(scheme, true);
    for endpoint in endpoints {
        let uri = parse(endpoint)?;
        let Some(actual) = uri.scheme_str() else {
            continue;
        };
        let matched = if actual.eq_ignore_ascii_case(scheme) {
            is_secure(&uri) == secure
        } else {
            secure && actual.eq_ignore_ascii_case(&secure_scheme)
        };
        if matched {
            return Ok(uri.authority().map(|a| a.to_string()));
        }
    }
    Ok(None)
}

/// 读取 `isSecure` 查询参数，缺失或无法解析时视为 false
pub fn is_secure(uri: &Uri) -> bool {
    query_param(uri, IS_SECURE)
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false)
}

/// 读取查询参数
pub fn query_param<'a>(uri: &'a Uri, key: &str) -> Option<&'a str> {
    uri.query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == key).then_some(v)
    })
}

//! Localized rejection messages.
//!
//! English is the default; a request whose `Accept-Language` lists a `zh`
//! tag before any `en` tag gets Chinese messages. Quality values are ignored
//! and the first recognized tag wins.
use axum::http::HeaderMap;
use axum::http::header::ACCEPT_LANGUAGE;
use portcullis_authz::RejectReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Zh,
}

impl Locale {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(ACCEPT_LANGUAGE)
            .and_then(|value| value.to_str().ok())
            .map(Self::from_accept_language)
            .unwrap_or_default()
    }

    pub fn from_accept_language(value: &str) -> Self {
        for entry in value.split(',') {
            let tag = entry
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            if tag == "zh" || tag.starts_with("zh-") {
                return Locale::Zh;
            }
            if tag == "en" || tag.starts_with("en-") {
                return Locale::En;
            }
        }
        Locale::En
    }
}

pub fn reject_message(reason: RejectReason, locale: Locale) -> &'static str {
    match locale {
        Locale::En => match reason {
            RejectReason::JwtSecretMissing => "authentication is not configured",
            RejectReason::AuthHeaderMissing => "missing Authorization header",
            RejectReason::AuthHeaderInvalid => "Authorization header must be 'Bearer <token>'",
            RejectReason::TokenInvalid => "invalid or expired token",
            RejectReason::TokenRevoked => "token has been revoked",
            RejectReason::UserDisabled => "account is disabled",
            RejectReason::Unauthorized => "authentication failed",
            RejectReason::Forbidden => "permission denied",
            RejectReason::RateLimited => "too many requests, retry later",
            RejectReason::RateLimitUnavailable => "rate limiting is temporarily unavailable",
        },
        Locale::Zh => match reason {
            RejectReason::JwtSecretMissing => "认证服务未配置",
            RejectReason::AuthHeaderMissing => "缺少 Authorization 请求头",
            RejectReason::AuthHeaderInvalid => "Authorization 请求头格式应为 'Bearer <token>'",
            RejectReason::TokenInvalid => "令牌无效或已过期",
            RejectReason::TokenRevoked => "令牌已被撤销",
            RejectReason::UserDisabled => "账号已被禁用",
            RejectReason::Unauthorized => "认证失败",
            RejectReason::Forbidden => "没有访问权限",
            RejectReason::RateLimited => "请求过于频繁，请稍后再试",
            RejectReason::RateLimitUnavailable => "限流服务暂不可用",
        },
    }
}

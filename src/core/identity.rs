//! 身份解析：TC 身份证号格式与校验位、身份验证接口

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// TC 身份证号长度
pub const NATIONAL_ID_LEN: usize = 11;

/// 验证结果（`{success, data, error}`）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn verified(user_id: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(serde_json::json!({ "user_id": user_id.into() })),
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// 验证成功时的 user_id：data 可以直接是字符串，也可以是带 user_id 字段的对象
    pub fn user_id(&self) -> Option<&str> {
        let data = self.data.as_ref()?;
        data.as_str()
            .or_else(|| data.get("user_id").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
    }
}

/// 身份验证：凭据 + 挑战值（身份证号模式下两者相同）
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, national_id: &str, challenge: &str) -> VerificationResult;
}

/// 11 位纯数字
pub fn is_national_id_format(handle: &str) -> bool {
    handle.len() == NATIONAL_ID_LEN && handle.bytes().all(|b| b.is_ascii_digit())
}

/// 完整 TC 校验：格式、首位非 0、第 10 / 11 位校验码
pub fn is_valid_national_id(handle: &str) -> bool {
    if !is_national_id_format(handle) {
        return false;
    }
    let d: Vec<i32> = handle.bytes().map(|b| (b - b'0') as i32).collect();
    if d[0] == 0 {
        return false;
    }
    let odd = d[0] + d[2] + d[4] + d[6] + d[8];
    let even = d[1] + d[3] + d[5] + d[7];
    let tenth = (odd * 7 - even).rem_euclid(10);
    let eleventh = d[..10].iter().sum::<i32>() % 10;
    d[9] == tenth && d[10] == eleventh
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        assert!(is_national_id_format("12345678901"));
        assert!(!is_national_id_format("1234567890"));
        assert!(!is_national_id_format("1234567890a"));
        assert!(!is_national_id_format("U1"));
    }

    #[test]
    fn test_checksum() {
        assert!(is_valid_national_id("12345678950"));
        assert!(is_valid_national_id("10000000146"));
        assert!(!is_valid_national_id("12345678901"));
        assert!(!is_valid_national_id("02345678950"));
    }

    #[test]
    fn test_verification_user_id() {
        assert_eq!(VerificationResult::verified("U1").user_id(), Some("U1"));
        let empty = VerificationResult {
            success: true,
            data: Some(serde_json::json!({})),
            error: None,
        };
        assert_eq!(empty.user_id(), None);
        assert_eq!(VerificationResult::rejected("x").user_id(), None);
        let bare = VerificationResult {
            success: true,
            data: Some(serde_json::json!("U2")),
            error: None,
        };
        assert_eq!(bare.user_id(), Some("U2"));
    }
}

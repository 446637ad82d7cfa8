//! Huya user lookups.

use reqwest::Client;
use serde::Deserialize;

use crate::danmaku::{DanmakuError, Result};

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<UserInfo>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    avatar: String,
}

fn parse_avatar(body: &str) -> Result<String> {
    let resp: UserInfoResponse = serde_json::from_str(body)?;
    match resp.data {
        Some(user) if resp.code == 200 => Ok(user.avatar),
        _ => Err(DanmakuError::protocol(format!(
            "huya user info: {} {}",
            resp.code, resp.message
        ))),
    }
}

/// Avatar URL of a user by uid.
pub async fn fetch_avatar(client: &Client, uid: &str) -> Result<String> {
    let body = client
        .get("https://user.huya.com/user/getUserInfo")
        .query(&[("uid", uid)])
        .send()
        .await?
        .text()
        .await?;
    parse_avatar(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_avatar() {
        let body = r#"{"code":200,"data":{"uid":1,"avatar":"https://huyaimg/a.jpg"},"message":"ok"}"#;
        assert_eq!(parse_avatar(body).unwrap(), "https://huyaimg/a.jpg");

        let body = r#"{"code":404,"data":null,"message":"no user"}"#;
        assert!(parse_avatar(body).is_err());
    }
}

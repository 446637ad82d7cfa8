//! Douyu gift catalog.

use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::danmaku::{GiftCatalog, GiftInfo, Result};

const GIFT_EFFECT_URL: &str =
    "https://webconf.douyucdn.cn/resource/common/gift/flash/gift_effect.json";
const DYNAMIC_GIFT_URL: &str = "https://fastly.jsdelivr.net/gh/popzoo/pop/json/dynamic_gift.json";

#[derive(Debug, Deserialize)]
struct GiftEffectConfig {
    data: GiftEffectData,
}

#[derive(Debug, Deserialize)]
struct GiftEffectData {
    #[serde(rename = "flashConfig", default)]
    flash_config: HashMap<String, FlashGift>,
}

#[derive(Debug, Deserialize)]
struct FlashGift {
    id: u64,
    name: String,
    #[serde(default)]
    hdt: String,
}

#[derive(Debug, Deserialize)]
struct DynamicGift {
    id: u64,
    name: String,
    #[serde(default)]
    himg: String,
}

/// Strip the `DYConfigCallback(...);` JSONP wrapper.
fn strip_jsonp(body: &str) -> &str {
    let body = body.trim();
    let body = body.strip_prefix("DYConfigCallback(").unwrap_or(body);
    body.strip_suffix(");").unwrap_or(body).trim()
}

fn parse_gift_effect(body: &str) -> Result<Vec<(String, GiftInfo)>> {
    let config: GiftEffectConfig = serde_json::from_str(strip_jsonp(body))?;
    Ok(config
        .data
        .flash_config
        .into_values()
        .map(|g| {
            (
                g.id.to_string(),
                GiftInfo {
                    name: g.name,
                    icon: g.hdt,
                    price: 0.0,
                },
            )
        })
        .collect())
}

fn parse_dynamic_gifts(body: &str) -> Result<Vec<(String, GiftInfo)>> {
    let gifts: Vec<DynamicGift> = serde_json::from_str(body)?;
    Ok(gifts
        .into_iter()
        .map(|g| {
            (
                g.id.to_string(),
                GiftInfo {
                    name: g.name,
                    icon: g.himg,
                    price: 0.0,
                },
            )
        })
        .collect())
}

/// Load the gift table keyed by gift id (`gfid`).
pub async fn fetch_gift_catalog(client: &Client) -> Result<GiftCatalog> {
    let effect = client
        .get(GIFT_EFFECT_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let dynamic = client
        .get(DYNAMIC_GIFT_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    let mut gifts = parse_gift_effect(&effect)?;
    gifts.extend(parse_dynamic_gifts(&dynamic)?);
    let catalog: GiftCatalog = gifts.into_iter().collect();
    debug!("Loaded {} douyu gifts", catalog.len());
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gift_effect_jsonp() {
        let body = r#"DYConfigCallback({"error":0,"data":{"flashConfig":{"824":{"id":824,"name":"粉丝荧光棒","hdt":"https://img/824.png"}}}});"#;
        let gifts = parse_gift_effect(body).unwrap();
        assert_eq!(gifts.len(), 1);
        assert_eq!(gifts[0].0, "824");
        assert_eq!(gifts[0].1.name, "粉丝荧光棒");
        assert_eq!(gifts[0].1.icon, "https://img/824.png");
    }

    #[test]
    fn test_parse_dynamic_gifts() {
        let body = r#"[{"id":20000,"name":"飞机","himg":"https://img/plane.gif"}]"#;
        let gifts = parse_dynamic_gifts(body).unwrap();
        assert_eq!(gifts[0].0, "20000");
        assert_eq!(gifts[0].1.icon, "https://img/plane.gif");
    }
}

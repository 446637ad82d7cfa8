use async_trait::async_trait;
use danmu_platforms::platforms::huya::{HuyaEvent, HuyaUser, fetch_avatar};
use tracing::debug;

use super::{NormalizeContext, Normalizer};
use crate::message::{ChatData, GiftData, MessageData, raw_value};

pub struct HuyaNormalizer {
    ctx: NormalizeContext,
}

impl HuyaNormalizer {
    pub fn new(ctx: NormalizeContext) -> Self {
        Self { ctx }
    }

    async fn avatar(&self, user: &HuyaUser) -> String {
        if user.rid.is_empty() {
            return String::new();
        }
        match fetch_avatar(&self.ctx.client, &user.rid).await {
            Ok(url) => self.ctx.image(&url),
            Err(e) => {
                debug!(uid = %user.rid, error = %e, "Huya avatar lookup failed");
                String::new()
            }
        }
    }
}

#[async_trait]
impl Normalizer for HuyaNormalizer {
    type Event = HuyaEvent;

    async fn normalize(&self, event: HuyaEvent) -> Option<MessageData> {
        let raw = raw_value(&event);
        let data = match event {
            HuyaEvent::Chat(chat) => MessageData::Chat(ChatData {
                avatar: self.avatar(&chat.from).await,
                name: chat.from.name,
                content: chat.content,
                emoticon: Vec::new(),
                raw,
            }),
            HuyaEvent::Gift(gift) => MessageData::Gift(GiftData {
                avatar: self.avatar(&gift.from).await,
                price: gift.total_price(),
                num: gift.count,
                name: gift.from.name,
                item: gift.name,
                gift_icon: String::new(),
                raw,
            }),
        };
        Some(data)
    }
}

use async_trait::async_trait;
use danmu_platforms::danmaku::GiftCatalog;
use danmu_platforms::platforms::kuaishou::KuaishouEvent;
use danmu_platforms::platforms::kuaishou::api;
use danmu_platforms::platforms::kuaishou::proto::SimpleUserInfo;
use tracing::debug;

use super::{NormalizeContext, Normalizer};
use crate::message::{
    ChatData, EndLiveData, GiftData, LikeData, MessageData, raw_from_str, raw_value,
};

const LIVE_ENDED_RAW: &str = "SC_LIVE_CHAT_ENDED";

pub struct KuaishouNormalizer {
    ctx: NormalizeContext,
    gifts: GiftCatalog,
}

impl KuaishouNormalizer {
    pub fn new(ctx: NormalizeContext, gifts: GiftCatalog) -> Self {
        Self { ctx, gifts }
    }

    pub async fn load(ctx: NormalizeContext) -> Self {
        let gifts = api::fetch_gift_catalog(&ctx.client)
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "Kuaishou gift catalog unavailable");
                GiftCatalog::new()
            });
        Self::new(ctx, gifts)
    }

    /// Feed avatar, or the profile avatar when a login cookie is available.
    async fn avatar(&self, user: &SimpleUserInfo) -> String {
        if let Some(cookie) = self.ctx.cookie.as_deref()
            && !user.principal_id.is_empty()
        {
            match api::fetch_user_avatar(&self.ctx.client, &user.principal_id, cookie).await {
                Ok(url) => return self.ctx.image(&url),
                Err(e) => debug!(uid = %user.principal_id, error = %e, "Kuaishou profile lookup failed"),
            }
        }
        self.ctx.image(&user.head_url)
    }

    async fn user(&self, user: Option<&SimpleUserInfo>) -> (String, String) {
        match user {
            Some(user) => (user.user_name.clone(), self.avatar(user).await),
            None => Default::default(),
        }
    }
}

#[async_trait]
impl Normalizer for KuaishouNormalizer {
    type Event = KuaishouEvent;

    async fn normalize(&self, event: KuaishouEvent) -> Option<MessageData> {
        let (name, avatar) = self.user(event.user()).await;
        let data = match event {
            KuaishouEvent::Comment(feed) => MessageData::Chat(ChatData {
                name,
                avatar,
                raw: raw_value(&feed),
                content: feed.content,
                emoticon: Vec::new(),
            }),
            KuaishouEvent::Like(feed) => MessageData::Like(LikeData {
                name,
                avatar,
                count: 1,
                raw: raw_value(&feed),
            }),
            KuaishouEvent::Gift(feed) => {
                let key = feed.gift_id.to_string();
                let info = self.gifts.get(&key);
                MessageData::Gift(GiftData {
                    name,
                    avatar,
                    item: info.map(|g| g.name.clone()).unwrap_or_default(),
                    num: feed.combo_count.into(),
                    price: info.map(|g| g.price).unwrap_or_default(),
                    gift_icon: self.ctx.image(&self.gifts.icon(&key)),
                    raw: raw_value(&feed),
                })
            }
            KuaishouEvent::LiveEnded => MessageData::EndLive(EndLiveData {
                raw: raw_from_str(LIVE_ENDED_RAW),
            }),
        };
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::test_support::context;
    use danmu_platforms::danmaku::GiftInfo;
    use danmu_platforms::platforms::kuaishou::proto::{WebCommentFeed, WebGiftFeed};
    use serde_json::json;

    fn user() -> SimpleUserInfo {
        SimpleUserInfo {
            principal_id: "3xuser".to_string(),
            user_name: "alice".to_string(),
            head_url: "https://p2.a.yximgs.com/alice.jpg".to_string(),
        }
    }

    fn normalizer() -> KuaishouNormalizer {
        let gifts = [(
            "2",
            GiftInfo {
                name: "啤酒".to_string(),
                icon: "https://k/2.png".to_string(),
                price: 10.0,
            },
        )]
        .into_iter()
        .collect();
        KuaishouNormalizer::new(context("3xabc"), gifts)
    }

    #[tokio::test]
    async fn test_comment_uses_feed_avatar_without_cookie() {
        let data = normalizer()
            .normalize(KuaishouEvent::Comment(WebCommentFeed {
                id: "c1".to_string(),
                user: Some(user()),
                content: "hi".to_string(),
            }))
            .await;
        let Some(MessageData::Chat(chat)) = data else {
            panic!("expected chat, got {data:?}");
        };
        assert_eq!(chat.name, "alice");
        assert_eq!(chat.avatar, "https://p2.a.yximgs.com/alice.jpg");
        assert_eq!(chat.raw["user"]["userName"], "alice");
    }

    #[tokio::test]
    async fn test_gift_from_catalog() {
        let data = normalizer()
            .normalize(KuaishouEvent::Gift(WebGiftFeed {
                user: Some(user()),
                gift_id: 2,
                combo_count: 4,
                ..Default::default()
            }))
            .await;
        let Some(MessageData::Gift(gift)) = data else {
            panic!("expected gift, got {data:?}");
        };
        assert_eq!(gift.item, "啤酒");
        assert_eq!(gift.price, 10.0);
        assert_eq!(gift.num, 4);
        assert_eq!(gift.gift_icon, "https://k/2.png");
    }

    #[tokio::test]
    async fn test_live_ended_raw_string() {
        let data = normalizer().normalize(KuaishouEvent::LiveEnded).await;
        assert_eq!(
            data,
            Some(MessageData::EndLive(EndLiveData {
                raw: json!("SC_LIVE_CHAT_ENDED")
            }))
        );
    }
}

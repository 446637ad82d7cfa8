use async_trait::async_trait;
use danmu_platforms::danmaku::GiftCatalog;
use danmu_platforms::platforms::douyu::{DouyuEvent, api, avatar_url};
use tracing::debug;

use super::{NormalizeContext, Normalizer};
use crate::message::{ChatData, EndLiveData, EnterRoomData, GiftData, MessageData, raw_value};

/// `rss` stream state once the broadcast stopped.
const STREAM_STOPPED: &str = "2";

pub struct DouyuNormalizer {
    ctx: NormalizeContext,
    gifts: GiftCatalog,
}

impl DouyuNormalizer {
    pub fn new(ctx: NormalizeContext, gifts: GiftCatalog) -> Self {
        Self { ctx, gifts }
    }

    pub async fn load(ctx: NormalizeContext) -> Self {
        let gifts = api::fetch_gift_catalog(&ctx.client)
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "Douyu gift catalog unavailable");
                GiftCatalog::new()
            });
        Self::new(ctx, gifts)
    }

    fn avatar(&self, ic: &str) -> String {
        self.ctx.image(&avatar_url(ic))
    }
}

#[async_trait]
impl Normalizer for DouyuNormalizer {
    type Event = DouyuEvent;

    async fn normalize(&self, event: DouyuEvent) -> Option<MessageData> {
        let data = match event {
            DouyuEvent::Chat(chat) => MessageData::Chat(ChatData {
                avatar: self.avatar(&chat.avatar),
                name: chat.nickname,
                content: chat.content,
                emoticon: Vec::new(),
                raw: raw_value(&chat.raw),
            }),
            DouyuEvent::Gift(gift) => {
                let info = self.gifts.get(&gift.gift_id);
                MessageData::Gift(GiftData {
                    avatar: self.avatar(&gift.avatar),
                    item: info.map(|g| g.name.clone()).unwrap_or_default(),
                    gift_icon: self.ctx.image(&self.gifts.icon(&gift.gift_id)),
                    num: gift.count.into(),
                    price: gift.contribution as f64,
                    name: gift.nickname,
                    raw: raw_value(&gift.raw),
                })
            }
            DouyuEvent::UserEnter(enter) => MessageData::EnterRoom(EnterRoomData {
                avatar: self.avatar(&enter.avatar),
                name: enter.nickname,
                raw: raw_value(&enter.raw),
            }),
            DouyuEvent::LiveStatus(status)
                if status.raw.get("ss").map(String::as_str) == Some(STREAM_STOPPED) =>
            {
                MessageData::EndLive(EndLiveData {
                    raw: raw_value(&status.raw),
                })
            }
            DouyuEvent::LiveStatus(_) => return None,
        };
        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::test_support::context;
    use danmu_platforms::danmaku::GiftInfo;
    use danmu_platforms::platforms::douyu::stt;

    fn event(payload: &str) -> DouyuEvent {
        DouyuEvent::from_record(stt::decode(payload)).unwrap()
    }

    fn normalizer() -> DouyuNormalizer {
        let gifts = [(
            "824",
            GiftInfo {
                name: "粉丝荧光棒".to_string(),
                icon: "https://gfs-op.douyucdn.cn/dygift/824.png".to_string(),
                price: 0.0,
            },
        )]
        .into_iter()
        .collect();
        DouyuNormalizer::new(context("9999"), gifts)
    }

    #[tokio::test]
    async fn test_chat() {
        let data = normalizer()
            .normalize(event("type@=chatmsg/rid@=9999/uid@=1/nn@=alice/txt@=666/ic@=avatar@Sface/level@=5/"))
            .await;
        let Some(MessageData::Chat(chat)) = data else {
            panic!("expected chat, got {data:?}");
        };
        assert_eq!(chat.name, "alice");
        assert_eq!(chat.content, "666");
        assert_eq!(chat.avatar, "https://apic.douyucdn.cn/upload/avatar/face_big.jpg");
        assert_eq!(chat.raw["type"], "chatmsg");
    }

    #[tokio::test]
    async fn test_gift_uses_catalog_and_own_avatar() {
        let data = normalizer()
            .normalize(event("type@=dgb/rid@=9999/uid@=2/nn@=bob/gfid@=824/gfcnt@=3/dc@=30/ic@=avatar@Sbob/"))
            .await;
        assert_eq!(
            data,
            Some(MessageData::Gift(GiftData {
                name: "bob".to_string(),
                avatar: "https://apic.douyucdn.cn/upload/avatar/bob_big.jpg".to_string(),
                item: "粉丝荧光棒".to_string(),
                num: 3,
                price: 30.0,
                gift_icon: "https://gfs-op.douyucdn.cn/dygift/824.png".to_string(),
                raw: raw_value(&stt::decode(
                    "type@=dgb/rid@=9999/uid@=2/nn@=bob/gfid@=824/gfcnt@=3/dc@=30/ic@=avatar@Sbob/"
                )),
            }))
        );
    }

    #[tokio::test]
    async fn test_unknown_gift_degrades_to_empty_fields() {
        let data = normalizer()
            .normalize(event("type@=dgb/rid@=9999/uid@=2/nn@=bob/gfid@=1/gfcnt@=1/"))
            .await;
        let Some(MessageData::Gift(gift)) = data else {
            panic!("expected gift, got {data:?}");
        };
        assert_eq!(gift.item, "");
        assert_eq!(gift.gift_icon, "");
        assert_eq!(gift.avatar, "");
    }

    #[tokio::test]
    async fn test_live_status() {
        let normalizer = normalizer();
        let ended = normalizer.normalize(event("type@=rss/rid@=9999/ss@=2/")).await;
        assert!(matches!(ended, Some(MessageData::EndLive(_))));
        let live = normalizer.normalize(event("type@=rss/rid@=9999/ss@=1/")).await;
        assert_eq!(live, None);
    }
}

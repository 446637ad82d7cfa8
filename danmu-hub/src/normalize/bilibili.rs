use async_trait::async_trait;
use danmu_platforms::danmaku::GiftCatalog;
use danmu_platforms::platforms::bilibili::{
    BilibiliEvent, api, extract_emoticon_urls, extract_face_url, guard_level_name,
};
use tracing::debug;

use super::{NormalizeContext, Normalizer};
use crate::message::{
    ChatData, EndLiveData, EnterRoomData, GiftData, LikeData, MessageData, SubscribeData,
    SuperChatData,
};

pub struct BilibiliNormalizer {
    ctx: NormalizeContext,
    gifts: GiftCatalog,
}

impl BilibiliNormalizer {
    pub fn new(ctx: NormalizeContext, gifts: GiftCatalog) -> Self {
        Self { ctx, gifts }
    }

    /// Load the gift catalog of the room. Short ids are resolved first.
    pub async fn load(ctx: NormalizeContext) -> Self {
        let room_id = match api::fetch_room_info(&ctx.client, &ctx.room_id).await {
            Ok(info) => info.room_id,
            Err(e) => {
                debug!(room_id = %ctx.room_id, error = %e, "Room lookup failed, using id as given");
                ctx.room_id.parse().unwrap_or_default()
            }
        };
        let gifts = api::fetch_gift_catalog(&ctx.client, room_id)
            .await
            .unwrap_or_else(|e| {
                debug!(room_id, error = %e, "Bilibili gift catalog unavailable");
                GiftCatalog::new()
            });
        Self::new(ctx, gifts)
    }

    async fn user_face(&self, uid: u64) -> String {
        if uid == 0 {
            return String::new();
        }
        match api::fetch_user_face(&self.ctx.client, uid).await {
            Ok(face) => self.ctx.image(&face),
            Err(e) => {
                debug!(uid, error = %e, "Bilibili face lookup failed");
                String::new()
            }
        }
    }
}

#[async_trait]
impl Normalizer for BilibiliNormalizer {
    type Event = BilibiliEvent;

    async fn normalize(&self, event: BilibiliEvent) -> Option<MessageData> {
        let data = match event {
            BilibiliEvent::Danmaku(d) => {
                let raw = d.raw.to_string();
                let face = extract_face_url(&raw).unwrap_or_default();
                MessageData::Chat(ChatData {
                    name: d.uname,
                    avatar: self.ctx.image(&face),
                    content: d.content,
                    emoticon: self.ctx.images(extract_emoticon_urls(&raw)),
                    raw: d.raw,
                })
            }
            BilibiliEvent::Gift(g) => MessageData::Gift(GiftData {
                avatar: self.ctx.image(&g.face),
                gift_icon: self.ctx.image(&self.gifts.icon(&g.gift_name)),
                price: g.num as f64 * g.price as f64 / 1000.0,
                num: g.num,
                name: g.uname,
                item: g.gift_name,
                raw: g.raw,
            }),
            BilibiliEvent::GuardBuy(g) => MessageData::Subscribe(SubscribeData {
                avatar: self.user_face(g.uid).await,
                item: guard_level_name(g.guard_level).to_string(),
                num: 1,
                price: g.price as f64 / 1000.0,
                name: g.username,
                raw: g.raw,
            }),
            BilibiliEvent::SuperChat(sc) => MessageData::SuperChat(SuperChatData {
                avatar: self.ctx.image(&sc.face),
                name: sc.uname,
                content: sc.message,
                price: sc.price,
                raw: sc.raw,
            }),
            BilibiliEvent::Like(u) => MessageData::Like(LikeData {
                avatar: self.user_face(u.uid).await,
                name: u.uname,
                count: 1,
                raw: u.raw,
            }),
            BilibiliEvent::Interact(u) => MessageData::EnterRoom(EnterRoomData {
                avatar: self.user_face(u.uid).await,
                name: u.uname,
                raw: u.raw,
            }),
            BilibiliEvent::Preparing(raw) => MessageData::EndLive(EndLiveData { raw }),
        };
        Some(data)
    }
}

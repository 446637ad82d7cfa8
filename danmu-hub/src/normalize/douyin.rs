use async_trait::async_trait;
use danmu_platforms::platforms::douyin::proto::User;
use danmu_platforms::platforms::douyin::{
    CONTROL_STATUS_ENDED, DouyinEvent, EmojiCatalog, fetch_emoji_catalog,
};
use tracing::debug;

use super::{NormalizeContext, Normalizer};
use crate::message::{
    ChatData, EndLiveData, EnterRoomData, GiftData, LikeData, MessageData, SubscribeData,
    raw_value,
};

/// Diamonds to yuan.
const DIAMOND_PRICE: f64 = 0.1;

pub struct DouyinNormalizer {
    ctx: NormalizeContext,
    emoji: EmojiCatalog,
}

impl DouyinNormalizer {
    pub fn new(ctx: NormalizeContext, emoji: EmojiCatalog) -> Self {
        Self { ctx, emoji }
    }

    pub async fn load(ctx: NormalizeContext) -> Self {
        let emoji = fetch_emoji_catalog(&ctx.client).await.unwrap_or_else(|e| {
            debug!(error = %e, "Douyin emoji catalog unavailable");
            EmojiCatalog::default()
        });
        Self::new(ctx, emoji)
    }

    fn name_and_avatar(&self, user: Option<&User>) -> (String, String) {
        user.map(|u| (u.nick_name.clone(), self.ctx.image(u.avatar())))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Normalizer for DouyinNormalizer {
    type Event = DouyinEvent;

    async fn normalize(&self, event: DouyinEvent) -> Option<MessageData> {
        let data = match event {
            DouyinEvent::Chat(chat) => {
                let raw = raw_value(&chat);
                let (name, avatar) = self.name_and_avatar(chat.user.as_ref());
                MessageData::Chat(ChatData {
                    name,
                    avatar,
                    emoticon: self.ctx.images(self.emoji.resolve(&chat.content)),
                    content: chat.content,
                    raw,
                })
            }
            DouyinEvent::EmojiChat(chat) => {
                let raw = raw_value(&chat);
                let (name, avatar) = self.name_and_avatar(chat.user.as_ref());
                MessageData::Chat(ChatData {
                    name,
                    avatar,
                    emoticon: self.ctx.images(chat.image_urls()),
                    content: chat.default_content,
                    raw,
                })
            }
            DouyinEvent::Gift(gift) => {
                if !gift.is_terminal() {
                    return None;
                }
                let raw = raw_value(&gift);
                let (name, avatar) = self.name_and_avatar(gift.user.as_ref());
                let num = gift.count();
                let info = gift.gift.unwrap_or_default();
                let icon = info.image.as_ref().map(|i| i.first_url()).unwrap_or_default();
                MessageData::Gift(GiftData {
                    name,
                    avatar,
                    gift_icon: self.ctx.image(icon),
                    price: info.diamond_count as f64 * DIAMOND_PRICE * num as f64,
                    num,
                    item: info.name,
                    raw,
                })
            }
            DouyinEvent::Like(like) => {
                let raw = raw_value(&like);
                let (name, avatar) = self.name_and_avatar(like.user.as_ref());
                MessageData::Like(LikeData {
                    name,
                    avatar,
                    count: like.count,
                    raw,
                })
            }
            DouyinEvent::Member(member) => {
                let raw = raw_value(&member);
                let (name, avatar) = self.name_and_avatar(member.user.as_ref());
                MessageData::EnterRoom(EnterRoomData { name, avatar, raw })
            }
            DouyinEvent::Room(room) => {
                let subscription = room.subscription()?;
                let raw = raw_value(&room);
                let (name, avatar) = self.name_and_avatar(Some(&subscription.user));
                MessageData::Subscribe(SubscribeData {
                    name,
                    avatar,
                    item: subscription.period,
                    num: 1,
                    price: 0.0,
                    raw,
                })
            }
            DouyinEvent::Control(control) if control.status == CONTROL_STATUS_ENDED => {
                MessageData::EndLive(EndLiveData {
                    raw: raw_value(&control),
                })
            }
            DouyinEvent::Control(_) => return None,
        };
        Some(data)
    }
}

pub mod api;
pub mod danmu;
pub mod stt;

pub use danmu::{
    DouyuChat, DouyuDanmuProtocol, DouyuDanmuProvider, DouyuEvent, DouyuGift, DouyuLiveStatus,
    DouyuUserEnter, avatar_url, create_douyu_danmu_provider,
};

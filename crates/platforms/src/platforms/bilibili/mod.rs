pub mod api;
pub mod danmu;
pub mod wbi;

pub use danmu::{
    BilibiliDanmaku, BilibiliDanmuProtocol, BilibiliDanmuProvider, BilibiliEvent, BilibiliGift,
    BilibiliGuardBuy, BilibiliSuperChat, BilibiliUser, create_bilibili_danmu_provider,
    extract_emoticon_urls, extract_face_url, guard_level_name,
};

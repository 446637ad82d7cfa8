pub mod api;
pub mod danmu;

pub use api::fetch_avatar;
pub use danmu::{
    HuyaChat, HuyaDanmuProtocol, HuyaDanmuProvider, HuyaEvent, HuyaGift, HuyaUser,
    create_huya_danmu_provider,
};

pub mod api;
pub mod danmu;
pub mod proto;
pub mod signature;

pub use api::{EmojiCatalog, fetch_emoji_catalog};
pub use danmu::{
    CONTROL_STATUS_ENDED, DouyinDanmuProtocol, DouyinDanmuProvider, DouyinEvent, Subscription,
    create_douyin_danmu_provider,
};
pub use signature::{XBogusSigner, generate_xbogus};

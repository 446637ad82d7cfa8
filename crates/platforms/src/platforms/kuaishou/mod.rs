pub mod api;
pub mod danmu;
pub mod proto;

pub use danmu::{
    KuaishouDanmuProtocol, KuaishouDanmuProvider, KuaishouEvent, create_kuaishou_danmu_provider,
};

pub mod catalog;
pub mod error;
pub mod provider;
pub mod signer;
pub mod transport;
pub mod websocket;

pub use catalog::{GiftCatalog, GiftInfo};
pub use error::{DanmakuError, Result};
pub use provider::{
    ConnectionConfig, ConnectionStats, ConnectionStatsSnapshot, StreamEnd, WebSocketProviderConfig,
};
pub use signer::{HelperProcessSigner, SignatureProvider};
pub use transport::{TungsteniteConnector, WsConnector, WsTransport};
pub use websocket::{
    DanmuConnection, DanmuProtocol, DecodedFrame, WebSocketDanmuProvider, cookie_value,
    merge_cookie_headers,
};

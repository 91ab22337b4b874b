// Live market data module
pub mod link;
pub mod simulated;
pub mod transport;
pub mod window;

pub use link::{FeedConfig, FeedError, LinkStatus, MarketDataLink};
pub use simulated::SimulatedTransport;
pub use transport::{CandleHandler, MarketStream, SubscriptionTransport};
pub use window::CandleWindow;

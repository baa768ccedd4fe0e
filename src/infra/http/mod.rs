mod feed;
mod middleware;
mod proxy;

pub use feed::{FeedState, build_feed_router};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use proxy::{CACHE_SOURCE_HEADER, ProxyState, build_proxy_router};

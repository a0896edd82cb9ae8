//! Page-side capture: the network interceptor and the content relay.

pub mod error;
pub mod http;
pub mod interceptor;
pub mod page;
pub mod relay;

pub use error::{RelayError, TransportError};
pub use http::{Fetch, FetchXhrFactory, HttpRequest, HttpResponse, ReqwestFetch, Xhr, XhrFactory};
pub use interceptor::install_interceptor;
pub use page::{Page, PageEvent, GRAPHQL_RESPONSE_EVENT};
pub use relay::{ContentRelay, RelayExit, RuntimeChannel, SocketChannel};

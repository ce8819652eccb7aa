mod error;
pub mod http;
mod paginate;
mod resource;
mod source;
mod throttle;

pub use error::ClientError;
pub use http::{HttpPageSource, HttpSettings};
pub use paginate::{
    ApiClient, ErrorHandler, IterationError, IterationSummary, Page, PageFailure, Paginator,
    PagingSettings,
};
pub use resource::{Filter, PageCursor, PageId, PageRequest, Resource};
pub use source::PageSource;
pub use throttle::LogThrottle;

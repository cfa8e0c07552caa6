mod fuzz;

mod http;
pub use http::HttpGateway;

mod node;
pub use node::Node;

mod overlay;
pub use overlay::{FileStorage, MemoryStorage, Storage, VoteMap, VoteOverlay};

mod snapshot;
pub use snapshot::Snapshot;

mod store;
pub use store::{ContentStore, Session, DETAIL_DEPTH};

mod thread_view;
pub use thread_view::{Page, SortMode, ThreadView};

mod tree;
pub use tree::Tree;

pub mod api {
    pub use drafts_api::*;
}

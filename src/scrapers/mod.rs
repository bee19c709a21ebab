pub mod client;
pub mod explore;
pub mod pdp;
pub mod traits;
pub mod types;

pub use client::ApiClient;
pub use explore::ExploreSearchClient;
pub use pdp::PdpSectionsClient;
pub use traits::{DetailProvider, SearchProvider};
pub use types::{Cursor, SearchPage};

pub mod elasticsearch;
pub mod search_index;

pub use elasticsearch::ElasticsearchIndex;
pub use search_index::SearchIndex;

mod fetcher;
mod normalize;
mod poller;

pub use fetcher::{FeedFetcher, FetchError, PostRecord};
pub use normalize::{clean_text, compare_ids, extract_status_id};
pub use poller::{check_all, check_loop, poll, BatchRunner, BatchSummary};

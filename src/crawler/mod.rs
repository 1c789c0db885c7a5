pub mod local;
pub mod remote;

pub use local::LocalCrawler;
pub use remote::{RemoteBuffer, RemoteCrawler};

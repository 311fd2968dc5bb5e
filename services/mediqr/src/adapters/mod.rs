pub mod attachments;
pub mod db;
pub mod scanner;

pub use attachments::FileAttachmentEncoder;
pub use db::SqliteKvAdapter;
pub use scanner::ChannelScanSource;

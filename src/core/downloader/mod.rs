pub mod client;

pub use client::{sha256_file, Downloader, DOWNLOAD_BUFFER_SIZE};

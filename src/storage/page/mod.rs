mod bucket_page;
mod codec;
mod directory_page;

pub use bucket_page::{bucket_array_size, HashTableBucketPage};
pub use codec::FixedWidth;
pub use directory_page::{
    HashTableDirectoryPage, DIRECTORY_ARRAY_SIZE, DIRECTORY_PAGE_SIZE, MAX_DEPTH,
};

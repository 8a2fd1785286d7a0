//! Blob storage for uploaded LabFlow files

mod local;

pub use local::LocalBlobStore;

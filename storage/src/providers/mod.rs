pub mod aws;

pub use aws::S3Provider;

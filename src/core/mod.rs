pub mod codec;
pub mod dedup;
pub mod download;
pub mod fingerprint;
pub mod harvest;
pub mod normalize;
pub mod partition;
pub mod review;

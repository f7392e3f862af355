pub mod archive;
pub mod frame_path;
pub mod fs;
pub mod images;
pub mod media;
pub mod meta_cache;
pub mod remote;
pub mod segmenter;
pub mod sources;
pub mod validation;
pub mod video;

use common::utils::config::AppConfig;

use crate::utils::{
    archive::{ArchiveUnpacker, CommandArchiveUnpacker},
    remote::{HttpFetcher, RemoteFetcher},
    video::{FfmpegTranscoder, Transcoder},
};

/// External collaborators the pipeline shells out to or calls over the network.
pub trait PipelineServices: Send + Sync {
    fn transcoder(&self) -> &dyn Transcoder;

    fn unpacker(&self) -> &dyn ArchiveUnpacker;

    fn fetcher(&self) -> &dyn RemoteFetcher;
}

pub struct DefaultPipelineServices {
    transcoder: FfmpegTranscoder,
    unpacker: CommandArchiveUnpacker,
    fetcher: HttpFetcher,
}

impl DefaultPipelineServices {
    pub fn new(config: &AppConfig, http_client: reqwest::Client) -> Self {
        Self {
            transcoder: FfmpegTranscoder::new(config.ffmpeg_path.clone()),
            unpacker: CommandArchiveUnpacker::new(config.archive_tool.clone()),
            fetcher: HttpFetcher::new(http_client),
        }
    }
}

impl PipelineServices for DefaultPipelineServices {
    fn transcoder(&self) -> &dyn Transcoder {
        &self.transcoder
    }

    fn unpacker(&self) -> &dyn ArchiveUnpacker {
        &self.unpacker
    }

    fn fetcher(&self) -> &dyn RemoteFetcher {
        &self.fetcher
    }
}

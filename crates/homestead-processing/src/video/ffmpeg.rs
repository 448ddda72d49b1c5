//! FfmpegTranscoder - HLS ladder transcoding with a single ffmpeg invocation.

use async_trait::async_trait;
use homestead_core::constants::MASTER_PLAYLIST_NAME;
use homestead_core::MediaResult;
use homestead_storage::ByteStream;
use std::path::Path;
use tokio::process::Command;

use super::process::{TranscodeProcess, TranscodeReport};
use crate::traits::TranscodeAdapter;

/// One rung of the HLS bitrate ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HlsRendition {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

impl HlsRendition {
    /// Label used in filter graph pads, e.g. `v720`.
    fn pad(&self) -> String {
        format!("v{}", self.height)
    }
}

/// 360p, 480p, 720p and 1080p renditions.
///
/// The 480p rung carries more audio bitrate than 720p; kept as published.
pub const DEFAULT_RENDITIONS: [HlsRendition; 4] = [
    HlsRendition {
        width: 640,
        height: 360,
        video_bitrate_kbps: 800,
        audio_bitrate_kbps: 96,
    },
    HlsRendition {
        width: 854,
        height: 480,
        video_bitrate_kbps: 1400,
        audio_bitrate_kbps: 160,
    },
    HlsRendition {
        width: 1280,
        height: 720,
        video_bitrate_kbps: 2800,
        audio_bitrate_kbps: 128,
    },
    HlsRendition {
        width: 1920,
        height: 1080,
        video_bitrate_kbps: 5000,
        audio_bitrate_kbps: 192,
    },
];

const DEFAULT_SEGMENT_DURATION_SECS: u64 = 10;

/// Spawns `ffmpeg` reading the source from stdin and writing
/// `master.m3u8` plus `v{N}/index.m3u8` and `v{N}/segmentNNN.ts` per rendition.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    segment_duration: u64,
    renditions: Vec<HlsRendition>,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            segment_duration: DEFAULT_SEGMENT_DURATION_SECS,
            renditions: DEFAULT_RENDITIONS.to_vec(),
        }
    }

    pub fn with_segment_duration(mut self, seconds: u64) -> Self {
        self.segment_duration = seconds.max(1);
        self
    }

    pub fn renditions(&self) -> &[HlsRendition] {
        &self.renditions
    }

    /// Full ffmpeg argument list for an output directory.
    pub fn build_args(&self, output_dir: &Path) -> Vec<String> {
        let out = output_dir.to_string_lossy();
        let count = self.renditions.len();

        let mut args: Vec<String> = vec![
            "-i".into(),
            "pipe:0".into(),
            "-map_metadata".into(),
            "-1".into(),
            "-map_chapters".into(),
            "-1".into(),
        ];

        // [0:v]split=4[v360][v480]...;[v360]scale=640:360[v360out];...
        let split_outputs: String = self
            .renditions
            .iter()
            .map(|r| format!("[{}]", r.pad()))
            .collect();
        let mut filter = format!("[0:v]split={}{}", count, split_outputs);
        for rendition in &self.renditions {
            filter.push_str(&format!(
                ";[{pad}]scale={w}:{h}[{pad}out]",
                pad = rendition.pad(),
                w = rendition.width,
                h = rendition.height
            ));
        }
        args.push("-filter_complex".into());
        args.push(filter);

        for rendition in &self.renditions {
            args.push("-map".into());
            args.push(format!("[{}out]", rendition.pad()));
            args.push("-map".into());
            args.push("0:a:0".into());
        }

        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "slow",
                "-c:a",
                "aac",
                "-ac",
                "2",
                "-ar",
                "48000",
                "-profile:a",
                "aac_low",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        for (index, rendition) in self.renditions.iter().enumerate() {
            args.push(format!("-b:v:{}", index));
            args.push(format!("{}k", rendition.video_bitrate_kbps));
            args.push(format!("-b:a:{}", index));
            args.push(format!("{}k", rendition.audio_bitrate_kbps));
        }

        let stream_map = (0..count)
            .map(|i| format!("v:{i},a:{i}"))
            .collect::<Vec<_>>()
            .join(" ");

        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.segment_duration.to_string(),
            "-hls_flags".to_string(),
            "independent_segments".to_string(),
            "-hls_playlist_type".to_string(),
            "vod".to_string(),
            "-hls_segment_filename".to_string(),
            format!("{}/v%v/segment%03d.ts", out),
            "-var_stream_map".to_string(),
            stream_map,
            "-master_pl_name".to_string(),
            MASTER_PLAYLIST_NAME.to_string(),
            format!("{}/v%v/index.m3u8", out),
        ]);

        args
    }

    /// Start ffmpeg for `output_dir`.
    ///
    /// The process is killed if the returned handle is dropped before it exits.
    pub fn spawn(&self, output_dir: &Path) -> MediaResult<TranscodeProcess> {
        let mut command = Command::new(&self.ffmpeg_path);
        command.args(self.build_args(output_dir));
        TranscodeProcess::spawn(command)
    }

    /// Rendition directories are created up front so the muxer can open its
    /// segment files.
    async fn prepare_output_dir(&self, output_dir: &Path) -> MediaResult<()> {
        for index in 0..self.renditions.len() {
            tokio::fs::create_dir_all(output_dir.join(format!("v{}", index))).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TranscodeAdapter for FfmpegTranscoder {
    #[tracing::instrument(skip(self, input), fields(output_dir = %output_dir.display()))]
    async fn transcode(
        &self,
        input: ByteStream,
        output_dir: &Path,
    ) -> MediaResult<TranscodeReport> {
        self.prepare_output_dir(output_dir).await?;

        let process = self.spawn(output_dir)?;
        let report = process.run(input).await?;

        tracing::info!(
            input_bytes = report.input_bytes,
            duration_ms = report.duration_ms,
            "Transcoding finished successfully"
        );
        Ok(report)
    }
}

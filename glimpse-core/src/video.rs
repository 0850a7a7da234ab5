use camino::{Utf8Path, Utf8PathBuf};
use ffmpeg_next::{codec, format::{self, Pixel}, media, software::scaling, util::frame};
use image::RgbImage;
use log::warn;

/// Controls how frames are drawn from a video during sequential decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingOptions {
    /// Number of sampled frames collected into each batch.
    pub batch_size: usize,
    /// Keep one frame out of every `interval` decoded frames.
    pub interval: usize,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        SamplingOptions { batch_size: 5, interval: 10 }
    }
}

/// A single decoded frame together with its presentation time in seconds
/// from the start of the video.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub image: RgbImage,
    pub timestamp: f64,
}

/// Errors that can occur while opening or decoding a video file.
#[derive(thiserror::Error, Debug)]
pub enum VideoError {
    #[error("Invalid sampling options: batch_size {batch_size}, interval {interval} (both must be nonzero)")]
    InvalidOptions { batch_size: usize, interval: usize },
    #[error("Error opening video file at {path}")]
    Open { path: Utf8PathBuf, #[source] source: anyhow::Error },
    #[error("No video stream found in file at {path}")]
    NoVideoStream { path: Utf8PathBuf },
    #[error("Error constructing decoder for video file at {path}")]
    Decoder { path: Utf8PathBuf, #[source] source: anyhow::Error },
    #[error("Error decoding video frame")]
    Decode { #[source] source: anyhow::Error },
    #[error("Error converting decoded frame to rgb")]
    Scale { #[source] source: anyhow::Error },
    #[error("Error seeking to timestamp {timestamp}s")]
    Seek { timestamp: f64, #[source] source: anyhow::Error },
}

/// Describes an object that can open a video for sampled frame access.
///
/// This is the seam between the orchestrator and the decoder: production
/// code opens [`FrameSource`]s through [`VideoFiles`], orchestrator tests
/// script their own sources.
pub trait OpenVideos {
    /// The frame reader this opener produces.
    type Source: ReadFrames + Send + 'static;

    /// Opens the video at `path` for reading with the given sampling.
    fn open(&self, path: &Utf8Path, options: SamplingOptions) -> Result<Self::Source, VideoError>;
}

/// Describes sequential and timestamp-directed access to the decoded frames
/// of one video.
pub trait ReadFrames {
    /// The next batch of sampled frames, or `None` once the stream is
    /// exhausted.
    fn next_batch(&mut self) -> Result<Option<Vec<FrameSample>>, VideoError>;

    /// The decodable frame nearest to `timestamp`, or `None` when the
    /// timestamp falls outside the video.
    fn frame_at(&mut self, timestamp: f64) -> Result<Option<FrameSample>, VideoError>;
}

/// Sequential access to the frames of a single video file.
///
/// A source decodes forward through the file, keeping every `interval`th
/// frame and handing them out in batches of up to `batch_size` via
/// [`FrameSource::next_batch`] (or the [`Iterator`] impl, which logs and
/// stops on mid-stream decode errors instead of surfacing them).
/// [`FrameSource::frame_at`] seeks and therefore invalidates the batch
/// cursor; open a fresh source per pass.
pub struct FrameSource {
    path: Utf8PathBuf,
    ictx: format::context::Input,
    decoder: codec::decoder::Video,
    scaler: Option<scaling::Context>,
    stream_index: usize,
    time_base: f64,
    frame_rate: f64,
    duration: f64,
    width: u32,
    height: u32,
    options: SamplingOptions,
    sampler: Sampler,
    eof_sent: bool,
}

// SAFETY: the FFmpeg contexts inside are only ever touched by one thread at
// a time. A FrameSource is moved between blocking tasks, never shared.
unsafe impl Send for FrameSource {}

impl FrameSource {
    /// Opens the video at `path` and prepares a decoder for its best video
    /// stream.
    ///
    /// # Arguments
    ///
    /// * `path` - Path of the video file to read frames from
    /// * `options` - Batch size and sampling interval for sequential decoding
    pub fn open(path: &Utf8Path, options: SamplingOptions) -> Result<FrameSource, VideoError> {
        if options.batch_size == 0 || options.interval == 0 {
            return Err(VideoError::InvalidOptions {
                batch_size: options.batch_size,
                interval: options.interval,
            });
        }

        // Safe to call repeatedly
        ffmpeg_next::init()
            .map_err(|e| VideoError::Open { path: path.to_owned(), source: e.into() })?;

        let ictx = format::input(&path.as_str())
            .map_err(|e| VideoError::Open { path: path.to_owned(), source: e.into() })?;

        let stream = ictx
            .streams()
            .best(media::Type::Video)
            .ok_or_else(|| VideoError::NoVideoStream { path: path.to_owned() })?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());
        let frame_rate = f64::from(stream.avg_frame_rate());
        let duration = if stream.duration() > 0 {
            stream.duration() as f64 * time_base
        } else if ictx.duration() > 0 {
            // Container duration is in AV_TIME_BASE (microsecond) ticks
            ictx.duration() as f64 / MICROS_PER_SECOND
        } else {
            0.0
        };

        let decoder = codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| VideoError::Decoder { path: path.to_owned(), source: e.into() })?
            .decoder()
            .video()
            .map_err(|e| VideoError::Decoder { path: path.to_owned(), source: e.into() })?;
        let width = decoder.width();
        let height = decoder.height();

        Ok(FrameSource {
            path: path.to_owned(),
            ictx,
            decoder,
            scaler: None,
            stream_index,
            time_base,
            frame_rate,
            duration,
            width,
            height,
            options,
            sampler: Sampler::every(options.interval),
            eof_sent: false,
        })
    }

    /// Decodes forward and returns the next batch of sampled frames, or
    /// `None` once the stream is exhausted. The final batch may hold fewer
    /// than `batch_size` frames.
    pub fn next_batch(&mut self) -> Result<Option<Vec<FrameSample>>, VideoError> {
        let mut batch = Vec::with_capacity(self.options.batch_size);
        while batch.len() < self.options.batch_size {
            match self.next_decoded()? {
                Some((timestamp, image)) => {
                    if self.sampler.admit() {
                        batch.push(FrameSample { image, timestamp });
                    }
                }
                None => break,
            }
        }

        if batch.is_empty() { Ok(None) } else { Ok(Some(batch)) }
    }

    /// Returns the decodable frame nearest to `timestamp` (seconds), or
    /// `None` when the timestamp falls outside the video.
    ///
    /// Seeks the underlying demuxer, so batch iteration cannot be resumed
    /// on this source afterwards.
    pub fn frame_at(&mut self, timestamp: f64) -> Result<Option<FrameSample>, VideoError> {
        if timestamp < 0.0 || (self.duration > 0.0 && timestamp > self.duration) {
            return Ok(None);
        }

        let target = (timestamp * MICROS_PER_SECOND) as i64;
        self.ictx
            .seek(target, ..target)
            .map_err(|e| VideoError::Seek { timestamp, source: e.into() })?;
        self.decoder.flush();
        self.eof_sent = false;

        // Seeking lands on the keyframe at or before the target; decode
        // forward from there and keep whichever frame lands closest.
        let mut best: Option<FrameSample> = None;
        while let Some((ts, image)) = self.next_decoded()? {
            let closer = best
                .as_ref()
                .map(|b| (ts - timestamp).abs() < (b.timestamp - timestamp).abs())
                .unwrap_or(true);
            if closer {
                best = Some(FrameSample { image, timestamp: ts });
            }
            if ts >= timestamp {
                break;
            }
        }

        Ok(best)
    }

    /// Duration of the video in seconds, or 0.0 when the container does not
    /// report one.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Average frame rate of the video stream, or 0.0 when unknown.
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    // Private variables and functions

    /// Decodes until the next frame of the selected stream is available.
    /// Returns the frame's timestamp in seconds along with its rgb pixels.
    fn next_decoded(&mut self) -> Result<Option<(f64, RgbImage)>, VideoError> {
        let mut decoded = frame::video::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let timestamp = decoded.timestamp().unwrap_or(0).max(0) as f64 * self.time_base;
                let image = self.frame_to_image(&decoded)?;
                return Ok(Some((timestamp, image)));
            }
            if self.eof_sent {
                return Ok(None);
            }
            self.feed_decoder()?;
        }
    }

    /// Forwards the next packet of the selected stream to the decoder.
    /// Signals end of stream to the decoder once the demuxer runs dry.
    fn feed_decoder(&mut self) -> Result<(), VideoError> {
        let next = {
            let mut packets = self.ictx.packets();
            loop {
                match packets.next() {
                    Some((stream, packet)) => {
                        if stream.index() == self.stream_index {
                            break Some(packet);
                        }
                    }
                    None => break None,
                }
            }
        };

        match next {
            Some(packet) => self
                .decoder
                .send_packet(&packet)
                .map_err(|e| VideoError::Decode { source: e.into() }),
            None => {
                self.eof_sent = true;
                self.decoder
                    .send_eof()
                    .map_err(|e| VideoError::Decode { source: e.into() })
            }
        }
    }

    fn frame_to_image(&mut self, decoded: &frame::video::Video) -> Result<RgbImage, VideoError> {
        // The pixel format is only known once the first frame arrives
        if self.scaler.is_none() {
            self.scaler = Some(
                scaling::Context::get(
                    decoded.format(),
                    self.width,
                    self.height,
                    Pixel::RGB24,
                    self.width,
                    self.height,
                    scaling::Flags::BILINEAR,
                )
                .map_err(|e| VideoError::Scale { source: e.into() })?,
            );
        }

        let mut rgb = frame::video::Video::empty();
        self.scaler
            .as_mut()
            .unwrap()
            .run(decoded, &mut rgb)
            .map_err(|e| VideoError::Scale { source: e.into() })?;

        // Frame rows are padded to the stride, strip the padding
        let data = rgb.data(0);
        let stride = rgb.stride(0);
        let row_len = self.width as usize * 3;
        let mut flat = Vec::with_capacity(row_len * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * stride;
            let end = start + row_len;
            if end <= data.len() {
                flat.extend_from_slice(&data[start..end]);
            }
        }

        RgbImage::from_raw(self.width, self.height, flat).ok_or_else(|| VideoError::Scale {
            source: anyhow::anyhow!("scaled frame buffer does not match frame dimensions"),
        })
    }
}

impl ReadFrames for FrameSource {
    fn next_batch(&mut self) -> Result<Option<Vec<FrameSample>>, VideoError> {
        FrameSource::next_batch(self)
    }

    fn frame_at(&mut self, timestamp: f64) -> Result<Option<FrameSample>, VideoError> {
        FrameSource::frame_at(self, timestamp)
    }
}

/// Opens a [`FrameSource`] over each video file; the opener production
/// summarizers read through.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoFiles;

impl OpenVideos for VideoFiles {
    type Source = FrameSource;

    fn open(&self, path: &Utf8Path, options: SamplingOptions) -> Result<FrameSource, VideoError> {
        FrameSource::open(path, options)
    }
}

impl Iterator for FrameSource {
    type Item = Vec<FrameSample>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Stopping frame iteration over {} early: {e}", self.path);
                None
            }
        }
    }
}

// AV_TIME_BASE: container level timestamps are microsecond ticks
const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Decides which decoded frames are kept when sampling every `interval`th
/// frame of a stream.
#[derive(Debug, Clone)]
struct Sampler {
    interval: u64,
    seen: u64,
}

impl Sampler {
    fn every(interval: usize) -> Sampler {
        Sampler { interval: interval.max(1) as u64, seen: 0 }
    }

    /// Returns true when the frame about to be inspected should be kept.
    fn admit(&mut self) -> bool {
        let admitted = self.seen % self.interval == 0;
        self.seen += 1;
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_options_default_matches_documented_values() {
        let options = SamplingOptions::default();
        assert_eq!(options.batch_size, 5);
        assert_eq!(options.interval, 10);
    }

    #[test]
    fn sampler_keeps_first_frame_and_every_interval_after() {
        let mut sampler = Sampler::every(3);
        let admitted: Vec<bool> = (0..7).map(|_| sampler.admit()).collect();
        assert_eq!(admitted, vec![true, false, false, true, false, false, true]);
    }

    #[test]
    fn sampler_interval_one_keeps_everything() {
        let mut sampler = Sampler::every(1);
        assert!((0..10).all(|_| sampler.admit()));
    }

    #[test]
    fn sampler_admission_count_is_ceiling_of_frames_over_interval() {
        for (frames, interval) in [(0u64, 10usize), (1, 10), (9, 10), (10, 10), (11, 10), (100, 7)] {
            let mut sampler = Sampler::every(interval);
            let admitted = (0..frames).filter(|_| sampler.admit()).count() as u64;
            let expected = frames.div_ceil(interval as u64);
            assert_eq!(admitted, expected, "frames={frames} interval={interval}");
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = FrameSource::open(
            Utf8Path::new("does-not-matter.mp4"),
            SamplingOptions { batch_size: 0, interval: 10 },
        );
        assert!(matches!(result, Err(VideoError::InvalidOptions { .. })));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = FrameSource::open(
            Utf8Path::new("does-not-matter.mp4"),
            SamplingOptions { batch_size: 5, interval: 0 },
        );
        assert!(matches!(result, Err(VideoError::InvalidOptions { .. })));
    }

    #[test]
    fn opening_nonexistent_file_is_an_error() {
        let result = FrameSource::open(
            Utf8Path::new("/nonexistent/video.mp4"),
            SamplingOptions::default(),
        );
        assert!(matches!(result, Err(VideoError::Open { .. })));
    }

    // Integration test: only runs when a fixture video is supplied
    #[test]
    fn batches_from_a_real_video_respect_sampling() {
        let Ok(fixture) = std::env::var("GLIMPSE_TEST_VIDEO") else {
            eprintln!("Skipping real video test: GLIMPSE_TEST_VIDEO not set");
            return;
        };
        let path = Utf8PathBuf::from(fixture);

        let options = SamplingOptions { batch_size: 4, interval: 5 };
        let mut source = FrameSource::open(&path, options).expect("fixture video should open");
        assert!(source.duration() > 0.0);

        let mut previous_ts = f64::NEG_INFINITY;
        let mut first_ts = None;
        let mut batches = 0;
        let mut samples = 0;
        while let Some(batch) = source.next_batch().expect("fixture video should decode") {
            assert!(!batch.is_empty());
            assert!(batch.len() <= options.batch_size);
            for sample in &batch {
                assert!(sample.timestamp >= previous_ts, "timestamps must be nondecreasing");
                previous_ts = sample.timestamp;
                first_ts.get_or_insert(sample.timestamp);
                assert!(sample.image.width() > 0 && sample.image.height() > 0);
            }
            batches += 1;
            samples += batch.len();
        }
        assert!(batches > 0, "fixture video should produce at least one batch");

        // Draining through the Iterator impl sees the same frames
        let source = FrameSource::open(&path, options).expect("fixture video should reopen");
        let iterated: usize = source.map(|batch| batch.len()).sum();
        assert_eq!(iterated, samples);

        // Direct lookup should land within one frame interval of the request
        let mut source =
            FrameSource::open(&path, SamplingOptions::default()).expect("fixture video should reopen");
        let target = first_ts.unwrap();
        let sample = source
            .frame_at(target)
            .expect("lookup should not error")
            .expect("a frame should exist at the first sampled timestamp");
        let tolerance = if source.frame_rate() > 0.0 { 1.0 / source.frame_rate() } else { 0.1 };
        assert!((sample.timestamp - target).abs() <= tolerance + f64::EPSILON);
    }

    #[test]
    fn lookup_outside_duration_returns_none() {
        let Ok(fixture) = std::env::var("GLIMPSE_TEST_VIDEO") else {
            eprintln!("Skipping real video test: GLIMPSE_TEST_VIDEO not set");
            return;
        };
        let path = Utf8PathBuf::from(fixture);

        let mut source =
            FrameSource::open(&path, SamplingOptions::default()).expect("fixture video should open");
        let beyond = source.duration() + 100.0;
        assert!(source.frame_at(beyond).expect("lookup should not error").is_none());
        assert!(source.frame_at(-1.0).expect("lookup should not error").is_none());
    }
}

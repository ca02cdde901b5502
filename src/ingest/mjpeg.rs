//! HTTP MJPEG / JPEG frame source.
//!
//! Connects to a `multipart/x-mixed-replace` MJPEG stream, or polls a single
//! JPEG snapshot URL when the server does not stream. Frames are decoded
//! in memory and decimated to the target rate.

use std::io::Read;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct MjpegSource {
    url: String,
    target_fps: u32,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl MjpegSource {
    pub fn new(url: &str, target_fps: u32) -> Result<Self> {
        let parsed = Url::parse(url).context("parse stream url")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!(
                "unsupported stream scheme '{}'; expected http(s)",
                parsed.scheme()
            ));
        }
        Ok(Self {
            url: url.to_string(),
            target_fps,
            stream: None,
            last_frame_at: None,
            frame_count: 0,
        })
    }
}

impl FrameSource for MjpegSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn open(&mut self) -> Result<()> {
        let response = ureq::get(&self.url)
            .call()
            .with_context(|| format!("connect to stream {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
            log::info!("MjpegSource: streaming {}", self.url);
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
            log::info!("MjpegSource: polling snapshots from {}", self.url);
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("stream source not opened; call open() first"))?;
        let min_interval = frame_interval(self.target_fps);
        loop {
            let jpeg_bytes = match stream {
                HttpStream::Mjpeg(stream) => match stream.read_next_jpeg()? {
                    Some(bytes) => bytes,
                    None => return Ok(None),
                },
                HttpStream::SingleJpeg => {
                    // Pace snapshot polling instead of fetching and discarding.
                    let wait = remaining_wait(self.last_frame_at, Instant::now(), min_interval);
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    fetch_single_jpeg(&self.url)?
                }
            };

            // A live stream must keep draining, so early frames are dropped.
            let now = Instant::now();
            if matches!(stream, HttpStream::Mjpeg(_))
                && !remaining_wait(self.last_frame_at, now, min_interval).is_zero()
            {
                continue;
            }

            let image = image::load_from_memory(&jpeg_bytes)
                .context("decode jpeg")?
                .into_rgb8();
            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(Some(Frame::new(image, self.frame_count)));
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, or `None` when the server closes the stream.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

/// Time left before the next frame is due.
fn remaining_wait(last: Option<Instant>, now: Instant, min_interval: Duration) -> Duration {
    match last {
        Some(last) => min_interval.saturating_sub(now.saturating_duration_since(last)),
        None => Duration::ZERO,
    }
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_jpeg_markers_in_multipart_noise() {
        let buffer = [
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_slice(),
            &[0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9],
            b"\r\n--frame",
        ]
        .concat();
        let (start, end) = find_jpeg_bounds(&buffer).unwrap();
        assert_eq!(&buffer[start..end], &[0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);

        assert!(find_jpeg_bounds(&[0xFF, 0xD8, 0x00]).is_none());
    }

    #[test]
    fn stream_reports_end_when_reader_closes() -> Result<()> {
        let jpeg = vec![0xFF, 0xD8, 0xAA, 0xFF, 0xD9];
        let mut stream = MjpegStream::new(Box::new(std::io::Cursor::new(jpeg.clone())));
        assert_eq!(stream.read_next_jpeg()?, Some(jpeg));
        assert_eq!(stream.read_next_jpeg()?, None);
        Ok(())
    }

    #[test]
    fn snapshot_wait_covers_the_rest_of_the_interval() {
        let interval = frame_interval(10);
        let start = Instant::now();
        assert_eq!(remaining_wait(None, start, interval), Duration::ZERO);
        assert_eq!(
            remaining_wait(Some(start), start + Duration::from_millis(30), interval),
            Duration::from_millis(70)
        );
        assert_eq!(
            remaining_wait(Some(start), start + Duration::from_millis(150), interval),
            Duration::ZERO
        );
        assert_eq!(remaining_wait(Some(start), start, frame_interval(0)), Duration::ZERO);
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(MjpegSource::new("udp://0.0.0.0:5000", 10).is_err());
        assert!(MjpegSource::new("http://127.0.0.1:81/stream", 10).is_ok());
    }
}

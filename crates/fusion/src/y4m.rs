//! Reader for YUV4MPEG2 (`.y4m`) streams: uncompressed 8-bit YUV frames behind a text header.

use crate::error::{FusionError, Result};
use crate::frames::{RgbFrame, VideoStream};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const STREAM_MAGIC: &[u8] = b"YUV4MPEG2";
const FRAME_MAGIC: &[u8] = b"FRAME";
const MAX_HEADER_LEN: u64 = 4096;
/// Largest decoded frame accepted, in raw YUV bytes (8K 4:4:4).
const MAX_FRAME_LEN: usize = 7680 * 4320 * 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chroma {
    C420,
    C422,
    C444,
    Mono,
}

impl Chroma {
    fn parse(tag: &str) -> Result<Self> {
        match tag {
            "420" | "420jpeg" | "420paldv" | "420mpeg2" => Ok(Self::C420),
            "422" => Ok(Self::C422),
            "444" => Ok(Self::C444),
            "mono" => Ok(Self::Mono),
            other => Err(FusionError::InvalidVideo(format!(
                "unsupported y4m colorspace C{other}"
            ))),
        }
    }

    /// Horizontal and vertical chroma subsampling shifts.
    const fn shifts(self) -> (u32, u32) {
        match self {
            Self::C420 => (1, 1),
            Self::C422 => (1, 0),
            Self::C444 | Self::Mono => (0, 0),
        }
    }
}

pub struct Y4mVideo<R> {
    reader: R,
    width: u32,
    height: u32,
    frame_rate: f64,
    chroma: Chroma,
    frame_len: usize,
    frame_offsets: Vec<u64>,
}

impl Y4mVideo<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| {
            FusionError::InvalidVideo(format!("could not open {}: {err}", path.display()))
        })?;
        Self::new(BufReader::new(file))
    }
}

impl<R: BufRead + Seek> Y4mVideo<R> {
    /// Parse the stream header and index the position of every complete frame.
    pub fn new(mut reader: R) -> Result<Self> {
        let header = read_line(&mut reader)?
            .ok_or_else(|| FusionError::InvalidVideo("empty stream".to_string()))?;
        let mut fields = header.split(|b| *b == b' ');
        if fields.next() != Some(STREAM_MAGIC) {
            return Err(FusionError::InvalidVideo(
                "missing YUV4MPEG2 signature".to_string(),
            ));
        }

        let mut width = None;
        let mut height = None;
        let mut frame_rate = 0.0;
        let mut chroma = Chroma::C420;
        for field in fields.filter(|f| !f.is_empty()) {
            let value = std::str::from_utf8(&field[1..])
                .map_err(|_| FusionError::InvalidVideo("non-utf8 y4m header".to_string()))?;
            match field[0] {
                b'W' => width = Some(parse_dimension(value)?),
                b'H' => height = Some(parse_dimension(value)?),
                b'F' => frame_rate = parse_ratio(value)?,
                b'C' => chroma = Chroma::parse(value)?,
                _ => {}
            }
        }
        let (Some(width), Some(height)) = (width, height) else {
            return Err(FusionError::InvalidVideo(
                "y4m header lacks width or height".to_string(),
            ));
        };

        let frame_len = frame_len(width, height, chroma)?;
        let mut video = Self {
            reader,
            width,
            height,
            frame_rate,
            chroma,
            frame_len,
            frame_offsets: Vec::new(),
        };
        video.index_frames()?;
        Ok(video)
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    fn index_frames(&mut self) -> Result<()> {
        let end = self.reader.seek(SeekFrom::End(0))?;
        let frame_len = self.frame_len as u64;
        self.reader.seek(SeekFrom::Start(0))?;
        // Skip the stream header again.
        read_line(&mut self.reader)?;
        let mut pos = self.reader.stream_position()?;

        while pos < end {
            let Some(line) = read_line(&mut self.reader)? else {
                break;
            };
            if !line.starts_with(FRAME_MAGIC) {
                return Err(FusionError::InvalidVideo(format!(
                    "expected FRAME marker at byte {pos}"
                )));
            }
            let data_start = self.reader.stream_position()?;
            if data_start.checked_add(frame_len).map_or(true, |stop| stop > end) {
                log::debug!("Ignoring truncated trailing y4m frame at byte {pos}");
                break;
            }
            self.frame_offsets.push(data_start);
            pos = self.reader.seek(SeekFrom::Start(data_start + frame_len))?;
        }
        Ok(())
    }

    fn decode(&self, raw: &[u8]) -> Result<RgbFrame> {
        let (w, h) = (self.width as usize, self.height as usize);
        let (luma, chroma) = raw.split_at(w * h);
        let (cb, cr) = chroma.split_at(chroma.len() / 2);
        let (sx, sy) = self.chroma.shifts();
        let cw = (w + (1 << sx) - 1) >> sx;

        let mut pixels = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                let y_sample = luma[y * w + x];
                if self.chroma == Chroma::Mono {
                    pixels.extend_from_slice(&[y_sample, y_sample, y_sample]);
                    continue;
                }
                let l = f32::from(y_sample);
                let ci = (y >> sy) * cw + (x >> sx);
                let u = f32::from(cb[ci]) - 128.0;
                let v = f32::from(cr[ci]) - 128.0;
                pixels.push(clamp_channel(l + 1.402 * v));
                pixels.push(clamp_channel(l - 0.344_136 * u - 0.714_136 * v));
                pixels.push(clamp_channel(l + 1.772 * u));
            }
        }
        RgbFrame::new(self.width, self.height, pixels)
    }
}

impl<R: BufRead + Seek> VideoStream for Y4mVideo<R> {
    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn frame_count(&self) -> u64 {
        self.frame_offsets.len() as u64
    }

    fn read_frame(&mut self, index: u64) -> Result<Option<RgbFrame>> {
        let Some(&offset) = usize::try_from(index)
            .ok()
            .and_then(|i| self.frame_offsets.get(i))
        else {
            return Ok(None);
        };
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut raw = vec![0u8; self.frame_len];
        self.reader.read_exact(&mut raw)?;
        self.decode(&raw).map(Some)
    }
}

/// Raw bytes of one frame, rejecting sizes that overflow or exceed [`MAX_FRAME_LEN`].
fn frame_len(width: u32, height: u32, chroma: Chroma) -> Result<usize> {
    let overflow = || FusionError::InvalidVideo(format!("frame size {width}x{height} overflows"));
    let (w, h) = (width as usize, height as usize);
    let luma = w.checked_mul(h).ok_or_else(overflow)?;
    let plane = if chroma == Chroma::Mono {
        0
    } else {
        let (sx, sy) = chroma.shifts();
        let cw = w.div_ceil(1 << sx);
        let ch = h.div_ceil(1 << sy);
        cw.checked_mul(ch).ok_or_else(overflow)?
    };
    let len = plane
        .checked_mul(2)
        .and_then(|planes| planes.checked_add(luma))
        .ok_or_else(overflow)?;
    if len > MAX_FRAME_LEN {
        return Err(FusionError::InvalidVideo(format!(
            "frame size {width}x{height} exceeds the supported maximum"
        )));
    }
    Ok(len)
}

fn clamp_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// One `\n`-terminated line without the terminator, `None` at end of stream.
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let read = reader.by_ref().take(MAX_HEADER_LEN).read_until(b'\n', &mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if line.pop() != Some(b'\n') {
        return Err(FusionError::InvalidVideo(
            "unterminated or oversized y4m header".to_string(),
        ));
    }
    Ok(Some(line))
}

fn parse_dimension(value: &str) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(FusionError::InvalidVideo(format!(
            "invalid y4m dimension '{value}'"
        ))),
    }
}

/// `F30000:1001` style frame rate. A zero denominator is reported as a zero rate.
fn parse_ratio(value: &str) -> Result<f64> {
    let invalid = || FusionError::InvalidVideo(format!("invalid y4m frame rate '{value}'"));
    let (num, den) = value.split_once(':').ok_or_else(invalid)?;
    let num: u32 = num.parse().map_err(|_| invalid())?;
    let den: u32 = den.parse().map_err(|_| invalid())?;
    if den == 0 {
        return Ok(0.0);
    }
    Ok(f64::from(num) / f64::from(den))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn y4m(header: &str, frames: &[Vec<u8>]) -> Vec<u8> {
        let mut out = format!("{header}\n").into_bytes();
        for frame in frames {
            out.extend_from_slice(b"FRAME\n");
            out.extend_from_slice(frame);
        }
        out
    }

    #[test]
    fn decodes_grey_444_frames() {
        let frame = [vec![128u8; 4], vec![128u8; 4], vec![128u8; 4]].concat();
        let bytes = y4m("YUV4MPEG2 W2 H2 F25:1 Ip A1:1 C444", &[frame.clone(), frame]);
        let mut video = Y4mVideo::new(Cursor::new(bytes)).unwrap();

        assert_eq!(video.frame_count(), 2);
        assert_eq!(video.frame_rate(), 25.0);
        let decoded = video.read_frame(1).unwrap().unwrap();
        assert_eq!(decoded.pixels(), &[128u8; 12][..]);
        assert!(video.read_frame(2).unwrap().is_none());
    }

    #[test]
    fn decodes_420_chroma() {
        // 2x2 luma, one chroma sample: pure red-ish (V high).
        let frame = vec![100, 100, 100, 100, 128, 228];
        let bytes = y4m("YUV4MPEG2 W2 H2 F1:1 C420jpeg", &[frame]);
        let mut video = Y4mVideo::new(Cursor::new(bytes)).unwrap();
        let decoded = video.read_frame(0).unwrap().unwrap();
        let px = &decoded.pixels()[0..3];
        assert_eq!(px[0], 240);
        assert!(px[1] < 100);
        assert_eq!(px[2], 100);
    }

    #[test]
    fn default_colorspace_is_420_and_truncated_tail_is_ignored() {
        let frame = vec![16u8; 6];
        let mut bytes = y4m("YUV4MPEG2 W2 H2 F30:1", &[frame.clone(), frame]);
        bytes.extend_from_slice(b"FRAME\n\x01\x02");
        let video = Y4mVideo::new(Cursor::new(bytes)).unwrap();
        assert_eq!(video.frame_count(), 2);
    }

    #[test]
    fn zero_denominator_means_zero_rate() {
        let bytes = y4m("YUV4MPEG2 W2 H2 F30:0 Cmono", &[vec![0u8; 4]]);
        let video = Y4mVideo::new(Cursor::new(bytes)).unwrap();
        assert_eq!(video.frame_rate(), 0.0);
    }

    #[test]
    fn oversized_frame_header_is_invalid_not_a_panic() {
        for header in [
            "YUV4MPEG2 W4294967295 H4294967295 F1:1 C420",
            "YUV4MPEG2 W4294967295 H4294967295 F1:1 C444",
            "YUV4MPEG2 W100000 H100000 F1:1 Cmono",
        ] {
            let bytes = y4m(header, &[vec![0u8; 64]]);
            let err = Y4mVideo::new(Cursor::new(bytes)).err().unwrap();
            assert!(matches!(err, FusionError::InvalidVideo(_)), "{header}: {err}");
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(Y4mVideo::new(Cursor::new(b"RIFF....".to_vec())).is_err());
        assert!(Y4mVideo::new(Cursor::new(Vec::new())).is_err());
        assert!(Y4mVideo::new(Cursor::new(b"YUV4MPEG2 W2 F1:1\n".to_vec())).is_err());
        assert!(Y4mVideo::new(Cursor::new(b"YUV4MPEG2 W2 H2 F1:1 C420p10\n".to_vec())).is_err());
        let bad_marker = y4m("YUV4MPEG2 W2 H2 F1:1 Cmono", &[]);
        let mut bytes = bad_marker;
        bytes.extend_from_slice(b"FRAMX\n\0\0\0\0");
        assert!(Y4mVideo::new(Cursor::new(bytes)).is_err());
    }
}

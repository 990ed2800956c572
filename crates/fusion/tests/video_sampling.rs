use postsearch_fusion::{EmbeddingFuser, FrameSampler, FusionError, SpooledVideo};

const W: usize = 16;
const H: usize = 8;

/// 4:4:4 y4m where `luma(frame, x)` gives each column's brightness.
fn y4m_video(fps: u32, frames: usize, luma: impl Fn(usize, usize) -> u8) -> Vec<u8> {
    let mut out = format!("YUV4MPEG2 W{W} H{H} F{fps}:1 Ip A1:1 C444\n").into_bytes();
    for f in 0..frames {
        out.extend_from_slice(b"FRAME\n");
        for _y in 0..H {
            for x in 0..W {
                out.push(luma(f, x));
            }
        }
        out.extend(std::iter::repeat(128u8).take(2 * W * H));
    }
    out
}

#[test]
fn solid_color_video_yields_no_frames() {
    let bytes = y4m_video(10, 100, |_, _| 90);
    let spool = SpooledVideo::from_bytes(&bytes).unwrap();
    let frames = FrameSampler::default().sample_path(spool.path()).unwrap();
    assert!(frames.is_empty());
}

#[test]
fn alternating_two_tone_video_yields_duration_times_rate() {
    let bytes = y4m_video(10, 100, |f, x| {
        let left = x < W / 2;
        if left ^ (f % 2 == 0) {
            30
        } else {
            220
        }
    });
    let spool = SpooledVideo::from_bytes(&bytes).unwrap();
    let frames = FrameSampler::default().sample_path(spool.path()).unwrap();
    assert_eq!(frames.len(), 10);
    assert!(frames.iter().all(|f| f.width() == W as u32 && f.height() == H as u32));
}

#[test]
fn zero_rate_video_is_invalid_and_spool_still_cleans_up() {
    let mut bytes = y4m_video(10, 3, |_, x| if x < W / 2 { 0 } else { 255 });
    let header_end = bytes.iter().position(|b| *b == b'\n').unwrap();
    let header = String::from_utf8(bytes[..header_end].to_vec()).unwrap();
    let patched = header.replace("F10:1", "F0:1");
    bytes.splice(..header_end, patched.into_bytes());

    let spool = SpooledVideo::from_bytes(&bytes).unwrap();
    let path = spool.path().to_path_buf();
    let err = FrameSampler::default().sample_path(&path).unwrap_err();
    assert!(matches!(err, FusionError::InvalidVideo(_)), "{err}");
    drop(spool);
    assert!(!path.exists());
}

#[test]
fn sampled_frames_fuse_to_unit_vector() {
    let bytes = y4m_video(5, 25, |f, x| ((f * 13 + x * 17) % 256) as u8);
    let spool = SpooledVideo::from_bytes(&bytes).unwrap();
    let frames = FrameSampler::default().sample_path(spool.path()).unwrap();
    assert_eq!(frames.len(), 5);

    // Toy frame embedding: mean brightness per third of the raster.
    let embeddings: Vec<Vec<f32>> = frames
        .iter()
        .map(|frame| {
            frame
                .pixels()
                .chunks(frame.pixels().len() / 3)
                .map(|c| c.iter().map(|&p| f32::from(p)).sum::<f32>() / c.len() as f32)
                .collect()
        })
        .collect();

    let fused = EmbeddingFuser::new().fuse(&[], &embeddings, None).unwrap();
    let norm = fused.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
}

#[test]
fn ten_second_one_fps_video_drops_blank_frames() {
    // Frames 3 and 7 are flat fades.
    let bytes = y4m_video(1, 10, |f, x| match f {
        3 | 7 => 16,
        _ => (x * 15) as u8,
    });
    let spool = SpooledVideo::from_bytes(&bytes).unwrap();
    let frames = FrameSampler::default().sample_path(spool.path()).unwrap();
    assert_eq!(frames.len(), 8);
}

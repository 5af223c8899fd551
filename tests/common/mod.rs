//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::fs::{self, File};
use std::path::Path;

use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, Rgba, RgbaImage};

pub fn solid(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

/// Single-image lossless WebP.
pub fn write_static_webp(path: &Path, image: &RgbaImage) {
    let file = File::create(path).unwrap();
    WebPEncoder::new_lossless(file)
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .unwrap();
}

/// Animated WebP with one lossless ANMF chunk per `(image, duration_ms)`.
/// All frames must share the canvas size.
pub fn write_animated_webp(path: &Path, frames: &[(RgbaImage, u32)]) {
    fs::write(path, animated_webp(frames)).unwrap();
}

pub fn animated_webp(frames: &[(RgbaImage, u32)]) -> Vec<u8> {
    assert!(!frames.is_empty());
    let (width, height) = frames[0].0.dimensions();

    let mut body = Vec::new();
    body.extend_from_slice(b"WEBP");

    let mut vp8x = vec![0x02 | 0x10, 0, 0, 0];
    push_u24(&mut vp8x, width - 1);
    push_u24(&mut vp8x, height - 1);
    push_chunk(&mut body, b"VP8X", &vp8x);

    // white background, loop forever
    let mut anim = vec![0xff, 0xff, 0xff, 0xff];
    anim.extend_from_slice(&0u16.to_le_bytes());
    push_chunk(&mut body, b"ANIM", &anim);

    for (image, duration) in frames {
        assert_eq!(image.dimensions(), (width, height));
        let mut anmf = Vec::new();
        push_u24(&mut anmf, 0);
        push_u24(&mut anmf, 0);
        push_u24(&mut anmf, width - 1);
        push_u24(&mut anmf, height - 1);
        push_u24(&mut anmf, *duration);
        // no blending, no disposal
        anmf.push(0x02);
        push_chunk(&mut anmf, b"VP8L", &lossless_bitstream(image));
        push_chunk(&mut body, b"ANMF", &anmf);
    }

    let mut file = Vec::with_capacity(body.len() + 8);
    file.extend_from_slice(b"RIFF");
    file.extend_from_slice(&(body.len() as u32).to_le_bytes());
    file.extend_from_slice(&body);
    file
}

/// The VP8L payload of a still lossless encode of `image`.
fn lossless_bitstream(image: &RgbaImage) -> Vec<u8> {
    let mut encoded = Vec::new();
    WebPEncoder::new_lossless(&mut encoded)
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .unwrap();

    let mut pos = 12;
    while pos + 8 <= encoded.len() {
        let fourcc = &encoded[pos..pos + 4];
        let size = u32::from_le_bytes(encoded[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let data = &encoded[pos + 8..pos + 8 + size];
        if fourcc == b"VP8L" {
            return data.to_vec();
        }
        pos += 8 + size + (size & 1);
    }
    panic!("encoder produced no VP8L chunk");
}

fn push_u24(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes()[..3]);
}

fn push_chunk(buf: &mut Vec<u8>, fourcc: &[u8; 4], data: &[u8]) {
    buf.extend_from_slice(fourcc);
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    if data.len() % 2 == 1 {
        buf.push(0);
    }
}

/// Whether a real ffmpeg is on PATH.
pub fn ffmpeg_available() -> bool {
    alchemist::transcode::tool_available(Path::new("ffmpeg"))
}

/// Shell script standing in for ffmpeg. `body` runs with ffmpeg's arguments.
#[cfg(unix)]
pub fn scripted_ffmpeg(dir: &Path, body: &str) -> alchemist::FfmpegConfig {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    alchemist::FfmpegConfig {
        ffmpeg_path: path,
        ..alchemist::FfmpegConfig::default()
    }
}

/// Fake ffmpeg body that copies the raw frame stream into the output path.
#[cfg(unix)]
pub const RAW_TO_OUTPUT: &str = "for last; do :; done\ncat > \"$last\"";

//! 测试用媒体文件（逐字节写出，由 FFmpeg 自带的 wav / yuv4mpegpipe / avi 解封装器读取）

use std::fs;
use std::path::{Path, PathBuf};

/// 16-bit PCM 正弦波 WAV
pub fn write_wav(dir: &Path, sample_rate: u32, channels: u16, seconds: f32) -> PathBuf {
    let frames = (sample_rate as f32 * seconds) as u32;
    let block_align = channels as u32 * 2;
    let data_len = frames * block_align;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * block_align).to_le_bytes());
    bytes.extend_from_slice(&(block_align as u16).to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let value = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    let path = dir.join("tone.wav");
    fs::write(&path, bytes).unwrap();
    path
}

/// 25fps YUV420P 原始视频（YUV4MPEG2），每帧亮度递增
pub fn write_y4m(dir: &Path, width: u32, height: u32, frames: u32) -> PathBuf {
    let luma = (width * height) as usize;
    let chroma = ((width / 2) * (height / 2)) as usize;

    let mut bytes = format!("YUV4MPEG2 W{} H{} F25:1 Ip A1:1 C420mpeg2\n", width, height).into_bytes();
    for i in 0..frames {
        bytes.extend_from_slice(b"FRAME\n");
        bytes.extend(std::iter::repeat((16 + i * 8 % 200) as u8).take(luma));
        bytes.extend(std::iter::repeat(128u8).take(chroma * 2));
    }

    let path = dir.join("clip.y4m");
    fs::write(&path, bytes).unwrap();
    path
}

fn chunk(bytes: &mut Vec<u8>, id: &[u8; 4], body: &[u8]) {
    bytes.extend_from_slice(id);
    bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
    bytes.extend_from_slice(body);
    if body.len() % 2 == 1 {
        bytes.push(0);
    }
}

fn list(bytes: &mut Vec<u8>, kind: &[u8; 4], body: &[u8]) {
    let mut inner = kind.to_vec();
    inner.extend_from_slice(body);
    chunk(bytes, b"LIST", &inner);
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// 25fps 未压缩 BGR24 视频 + 48kHz 立体声 PCM 的交织 AVI
///
/// 每个视频帧后跟 40ms 音频，两个流都从 0 开始。
pub fn write_avi(dir: &Path, width: u32, height: u32, frames: u32) -> PathBuf {
    const RATE: u32 = 48000;
    const CHANNELS: u32 = 2;
    let block_align = CHANNELS * 2;
    let samples_per_frame = RATE / 25;
    let picture_len = width * height * 3;
    let pcm_len = samples_per_frame * block_align;

    let avih = u32s(&[
        40_000,                        // 每帧微秒数
        (picture_len + pcm_len) * 25,  // 最大码率
        0,
        0x10,                          // AVIF_HASINDEX
        frames,
        0,
        2,
        picture_len,
        width,
        height,
        0, 0, 0, 0,
    ]);

    let mut video_strl = Vec::new();
    let mut strh = b"vids".to_vec();
    strh.extend(u32s(&[0, 0, 0, 0, 1, 25, 0, frames, picture_len, u32::MAX, 0]));
    strh.extend(u32s(&[0, (height << 16) | width]));
    chunk(&mut video_strl, b"strh", &strh);
    let mut bitmap = u32s(&[40, width, height]);
    bitmap.extend_from_slice(&1u16.to_le_bytes()); // planes
    bitmap.extend_from_slice(&24u16.to_le_bytes()); // bit count
    bitmap.extend(u32s(&[0, picture_len, 0, 0, 0, 0]));
    chunk(&mut video_strl, b"strf", &bitmap);

    let mut audio_strl = Vec::new();
    let mut strh = b"auds".to_vec();
    strh.extend(u32s(&[
        0,
        0,
        0,
        0,
        block_align,
        RATE * block_align,
        0,
        samples_per_frame * frames,
        pcm_len,
        u32::MAX,
        block_align,
    ]));
    strh.extend(u32s(&[0, 0]));
    chunk(&mut audio_strl, b"strh", &strh);
    let mut wave = Vec::new();
    wave.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wave.extend_from_slice(&(CHANNELS as u16).to_le_bytes());
    wave.extend(u32s(&[RATE, RATE * block_align]));
    wave.extend_from_slice(&(block_align as u16).to_le_bytes());
    wave.extend_from_slice(&16u16.to_le_bytes());
    chunk(&mut audio_strl, b"strf", &wave);

    let mut hdrl = Vec::new();
    chunk(&mut hdrl, b"avih", &avih);
    list(&mut hdrl, b"strl", &video_strl);
    list(&mut hdrl, b"strl", &audio_strl);

    // movi 数据块与索引，索引偏移相对 "movi" 标记
    let mut movi = Vec::new();
    let mut index = Vec::new();
    for i in 0..frames {
        let picture = vec![(16 + i * 8 % 200) as u8; picture_len as usize];
        let mut pcm = Vec::with_capacity(pcm_len as usize);
        for n in 0..samples_per_frame {
            let t = (i * samples_per_frame + n) as f32 / RATE as f32;
            let value = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
            for _ in 0..CHANNELS {
                pcm.extend_from_slice(&value.to_le_bytes());
            }
        }

        for (id, body) in [(b"00db", picture), (b"01wb", pcm)] {
            index.extend_from_slice(id);
            index.extend(u32s(&[0x10, movi.len() as u32 + 4, body.len() as u32]));
            chunk(&mut movi, id, &body);
        }
    }

    let mut riff = b"AVI ".to_vec();
    list(&mut riff, b"hdrl", &hdrl);
    list(&mut riff, b"movi", &movi);
    chunk(&mut riff, b"idx1", &index);

    let mut bytes = Vec::with_capacity(riff.len() + 8);
    chunk(&mut bytes, b"RIFF", &riff);

    let path = dir.join("mixed.avi");
    fs::write(&path, bytes).unwrap();
    path
}
